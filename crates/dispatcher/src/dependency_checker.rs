use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::{debug, warn};
use uuid::Uuid;

use cronflow_core::models::{
    CycleDetectionResult, DagTaskStatus, DependencyCheckResult, ScheduledTask,
    WorkflowValidationResult,
};

/// DAG依赖检查器
///
/// 纯函数集合，不持有状态也不访问存储。所有"预期内"的非法输入（缺失依赖、
/// 循环依赖、空工作流）都通过结果结构体返回，不会产生错误。
#[derive(Debug, Clone, Copy, Default)]
pub struct DagDependencyChecker;

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Done,
}

fn index_tasks(tasks: &[ScheduledTask]) -> HashMap<Uuid, &ScheduledTask> {
    tasks.iter().map(|task| (task.id, task)).collect()
}

impl DagDependencyChecker {
    /// 检查单个任务的依赖：不存在的为缺失依赖，存在但已禁用的为无效依赖
    pub fn check_dependencies(
        task: &ScheduledTask,
        all_tasks: &[ScheduledTask],
    ) -> DependencyCheckResult {
        let index = index_tasks(all_tasks);
        let mut missing_dependency_ids = Vec::new();
        let mut invalid_dependency_ids = Vec::new();

        for dep_id in &task.dependencies {
            match index.get(dep_id) {
                None => missing_dependency_ids.push(*dep_id),
                Some(dep) if !dep.enabled => invalid_dependency_ids.push(*dep_id),
                Some(_) => {}
            }
        }

        let is_valid = missing_dependency_ids.is_empty() && invalid_dependency_ids.is_empty();
        let error_message = if is_valid {
            None
        } else {
            debug!(
                "任务 {} 依赖检查失败: 缺失 {:?}, 已禁用 {:?}",
                task.name, missing_dependency_ids, invalid_dependency_ids
            );
            Some(format!(
                "任务 {} 的依赖无效: 缺失依赖 {:?}, 已禁用依赖 {:?}",
                task.name, missing_dependency_ids, invalid_dependency_ids
            ))
        };

        DependencyCheckResult {
            is_valid,
            missing_dependency_ids,
            invalid_dependency_ids,
            error_message,
        }
    }

    /// 所有依赖都存在且处于 `Completed` 状态时返回true，无依赖的任务总是返回true
    pub fn dependencies_satisfied(task: &ScheduledTask, all_tasks: &[ScheduledTask]) -> bool {
        if task.dependencies.is_empty() {
            return true;
        }
        let index = index_tasks(all_tasks);
        task.dependencies.iter().all(|dep_id| {
            index
                .get(dep_id)
                .is_some_and(|dep| dep.dag_status == DagTaskStatus::Completed)
        })
    }

    /// 沿 `dependencies` 边做深度优先搜索检测循环依赖
    ///
    /// 每个环以闭合路径返回（首尾相同），从每个未访问的任务重新发起搜索，
    /// 互不相连的多个环都会被报告。使用显式栈，不受依赖链深度限制。
    pub fn detect_cycles(tasks: &[ScheduledTask]) -> CycleDetectionResult {
        let index = index_tasks(tasks);
        let adjacency: HashMap<Uuid, Vec<Uuid>> = tasks
            .iter()
            .map(|task| {
                let deps = task
                    .dependencies
                    .iter()
                    .copied()
                    .filter(|dep| index.contains_key(dep))
                    .collect();
                (task.id, deps)
            })
            .collect();

        let mut states: HashMap<Uuid, VisitState> = HashMap::new();
        let mut cycles: Vec<Vec<Uuid>> = Vec::new();

        for task in tasks {
            if states.contains_key(&task.id) {
                continue;
            }

            let mut path: Vec<Uuid> = vec![task.id];
            let mut stack: Vec<(Uuid, usize)> = vec![(task.id, 0)];
            states.insert(task.id, VisitState::Visiting);

            while let Some((node, cursor)) = stack.last_mut() {
                let current = *node;
                let next = adjacency
                    .get(&current)
                    .and_then(|deps| deps.get(*cursor))
                    .copied();
                *cursor += 1;

                match next {
                    Some(dep) => match states.get(&dep) {
                        Some(VisitState::Visiting) => {
                            if let Some(start) = path.iter().position(|id| *id == dep) {
                                let mut cycle = path[start..].to_vec();
                                cycle.push(dep);
                                cycles.push(cycle);
                            }
                        }
                        Some(VisitState::Done) => {}
                        None => {
                            states.insert(dep, VisitState::Visiting);
                            path.push(dep);
                            stack.push((dep, 0));
                        }
                    },
                    None => {
                        states.insert(current, VisitState::Done);
                        path.pop();
                        stack.pop();
                    }
                }
            }
        }

        let has_cycle = !cycles.is_empty();
        let error_message = if has_cycle {
            warn!("检测到 {} 个循环依赖: {:?}", cycles.len(), cycles);
            Some(format!("检测到循环依赖: {cycles:?}"))
        } else {
            None
        };

        CycleDetectionResult {
            has_cycle,
            cycles,
            error_message,
        }
    }

    /// 枚举从任务到根任务的所有依赖链
    ///
    /// 每条链以 `task_id` 开头。已在当前链上的任务不会被重复访问，
    /// 所以存在环时链在回到环上之前结束。引用了不存在任务的依赖作为链的终点。
    pub fn get_dependency_paths(task_id: Uuid, all_tasks: &[ScheduledTask]) -> Vec<Vec<Uuid>> {
        let index = index_tasks(all_tasks);
        if !index.contains_key(&task_id) {
            return Vec::new();
        }
        collect_paths(&index, task_id)
    }

    /// 校验工作流：非空、无环、至少一个入口任务和一个出口任务，并计算执行层级
    ///
    /// `tasks` 为该工作流的全部成员。入口任务没有依赖；出口任务不被任何成员依赖，
    /// 且 `next_task_ids` 中不含成员。
    pub fn validate_workflow(workflow_id: &str, tasks: &[ScheduledTask]) -> WorkflowValidationResult {
        if tasks.is_empty() {
            return WorkflowValidationResult::invalid(format!("工作流 {workflow_id} 不包含任何任务"));
        }

        let cycles = Self::detect_cycles(tasks);
        if cycles.has_cycle {
            return WorkflowValidationResult::invalid(format!(
                "工作流 {} 存在循环依赖: {}",
                workflow_id,
                cycles.error_message.unwrap_or_default()
            ));
        }

        let member_ids: HashSet<Uuid> = tasks.iter().map(|task| task.id).collect();
        let depended_upon: HashSet<Uuid> = tasks
            .iter()
            .flat_map(|task| task.dependencies.iter().copied())
            .collect();

        let entry_tasks: Vec<Uuid> = tasks
            .iter()
            .filter(|task| task.dependencies.is_empty())
            .map(|task| task.id)
            .collect();
        if entry_tasks.is_empty() {
            return WorkflowValidationResult::invalid(format!(
                "工作流 {workflow_id} 没有入口任务"
            ));
        }

        let exit_tasks: Vec<Uuid> = tasks
            .iter()
            .filter(|task| {
                !depended_upon.contains(&task.id)
                    && task.next_task_ids.iter().all(|id| !member_ids.contains(id))
            })
            .map(|task| task.id)
            .collect();
        if exit_tasks.is_empty() {
            return WorkflowValidationResult::invalid(format!(
                "工作流 {workflow_id} 没有出口任务"
            ));
        }

        let execution_levels = compute_execution_levels(tasks, &member_ids);
        debug!(
            "工作流 {} 校验通过: {} 个任务, {} 个层级",
            workflow_id,
            tasks.len(),
            execution_levels.len()
        );

        WorkflowValidationResult {
            is_valid: true,
            error_message: None,
            entry_tasks,
            exit_tasks,
            execution_levels,
        }
    }
}

/// 显式栈深度优先枚举依赖链，依赖链很深时也不会耗尽调用栈
fn collect_paths(index: &HashMap<Uuid, &ScheduledTask>, start: Uuid) -> Vec<Vec<Uuid>> {
    let mut paths = Vec::new();
    let mut stack: Vec<Vec<Uuid>> = vec![vec![start]];

    while let Some(mut path) = stack.pop() {
        let Some(current) = path.last().copied() else {
            continue;
        };
        let next: Vec<Uuid> = index
            .get(&current)
            .map(|task| {
                task.dependencies
                    .iter()
                    .copied()
                    .filter(|dep| !path.contains(dep))
                    .collect()
            })
            .unwrap_or_default();

        if next.is_empty() {
            paths.push(path);
            continue;
        }

        // 逆序入栈，保证按依赖顺序输出；最后入栈的分支直接复用当前链
        let mut branches = next.into_iter().rev().peekable();
        while let Some(dep) = branches.next() {
            let mut extended = if branches.peek().is_some() {
                path.clone()
            } else {
                std::mem::take(&mut path)
            };
            extended.push(dep);
            stack.push(extended);
        }
    }

    paths
}

/// Kahn算法分层：入度为成员内依赖数，入度为0的任务构成第0层
///
/// 入度只按 `dependencies` 计算，出边也取反向的依赖边，仅填写了
/// `dependencies` 的工作流同样能正确分层。
fn compute_execution_levels(tasks: &[ScheduledTask], member_ids: &HashSet<Uuid>) -> Vec<Vec<Uuid>> {
    let mut in_degree: HashMap<Uuid, usize> = HashMap::new();
    let mut downstream: HashMap<Uuid, BTreeSet<Uuid>> = HashMap::new();

    for task in tasks {
        let deps: Vec<Uuid> = task
            .dependencies
            .iter()
            .copied()
            .filter(|dep| member_ids.contains(dep))
            .collect();
        in_degree.insert(task.id, deps.len());
        for dep in deps {
            downstream.entry(dep).or_default().insert(task.id);
        }
    }

    let mut queue: VecDeque<Uuid> = tasks
        .iter()
        .filter(|task| in_degree.get(&task.id) == Some(&0))
        .map(|task| task.id)
        .collect();
    let mut levels: Vec<Vec<Uuid>> = Vec::new();

    while !queue.is_empty() {
        let current_level: Vec<Uuid> = queue.drain(..).collect();
        for id in &current_level {
            if let Some(children) = downstream.get(id) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(*child);
                        }
                    }
                }
            }
        }
        levels.push(current_level);
    }

    levels
}
