use std::collections::HashMap;

use uuid::Uuid;

use cronflow_dispatcher::DagDependencyChecker;
use cronflow_testing_utils::{TaskBuilder, WorkflowBuilder};

#[test]
fn test_cycle_is_reported_as_closed_path() {
    let wf = WorkflowBuilder::new("wf")
        .edge("A", "B")
        .edge("B", "C")
        .edge("C", "A")
        .build();

    let result = DagDependencyChecker::detect_cycles(&wf.tasks);
    assert!(result.has_cycle);
    assert_eq!(result.cycles.len(), 1);

    let cycle = &result.cycles[0];
    assert_eq!(cycle.len(), 4);
    assert_eq!(cycle.first(), cycle.last());
    for name in ["A", "B", "C"] {
        assert!(cycle.contains(&wf.id(name)));
    }
}

#[test]
fn test_disjoint_cycles_are_all_reported() {
    let wf = WorkflowBuilder::new("wf")
        .edge("A", "B")
        .edge("B", "A")
        .edge("X", "Y")
        .edge("Y", "X")
        .task("lonely")
        .build();

    let result = DagDependencyChecker::detect_cycles(&wf.tasks);
    assert!(result.has_cycle);
    assert_eq!(result.cycles.len(), 2);
    assert!(result.error_message.is_some());
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let wf = WorkflowBuilder::new("wf").edge("A", "A").build();

    let result = DagDependencyChecker::detect_cycles(&wf.tasks);
    assert!(result.has_cycle);
    assert_eq!(result.cycles[0], vec![wf.id("A"), wf.id("A")]);
}

#[test]
fn test_deep_chain_has_no_cycle() {
    let mut builder = WorkflowBuilder::new("wf");
    for i in 0..2_000 {
        builder = builder.edge(&format!("t{i}"), &format!("t{}", i + 1));
    }
    let wf = builder.build();

    let result = DagDependencyChecker::detect_cycles(&wf.tasks);
    assert!(!result.has_cycle);
    assert!(result.cycles.is_empty());
}

#[test]
fn test_deep_chain_yields_single_dependency_path() {
    let depth = 3_000;
    let mut builder = WorkflowBuilder::new("wf");
    for i in 0..depth {
        builder = builder.edge(&format!("t{i}"), &format!("t{}", i + 1));
    }
    let wf = builder.build();

    let last = wf.id(&format!("t{depth}"));
    let paths = DagDependencyChecker::get_dependency_paths(last, &wf.tasks);

    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].len(), depth + 1);
    assert_eq!(paths[0][0], last);
    assert_eq!(*paths[0].last().unwrap(), wf.id("t0"));
}

#[test]
fn test_execution_levels_respect_every_edge() {
    let wf = WorkflowBuilder::new("wf")
        .edge("extract", "clean")
        .edge("extract", "enrich")
        .edge("clean", "load")
        .edge("enrich", "load")
        .edge("load", "report")
        .task("audit")
        .build();

    let validation = DagDependencyChecker::validate_workflow("wf", &wf.tasks);
    assert!(validation.is_valid, "{:?}", validation.error_message);

    let levels: HashMap<Uuid, usize> = wf
        .tasks
        .iter()
        .map(|t| (t.id, validation.level_of(&t.id).unwrap()))
        .collect();
    for task in &wf.tasks {
        for dep in &task.dependencies {
            assert!(levels[dep] < levels[&task.id]);
        }
    }

    assert_eq!(validation.execution_levels.len(), 4);
    assert_eq!(levels[&wf.id("extract")], 0);
    assert_eq!(levels[&wf.id("audit")], 0);
    assert_eq!(levels[&wf.id("report")], 3);

    let mut entries = validation.entry_tasks.clone();
    entries.sort();
    let mut expected_entries = vec![wf.id("extract"), wf.id("audit")];
    expected_entries.sort();
    assert_eq!(entries, expected_entries);

    let mut exits = validation.exit_tasks.clone();
    exits.sort();
    let mut expected_exits = vec![wf.id("report"), wf.id("audit")];
    expected_exits.sort();
    assert_eq!(exits, expected_exits);
}

#[test]
fn test_levels_with_dependencies_only() {
    // 只填写了 dependencies、没有 next_task_ids 的工作流
    let a = TaskBuilder::new("a").with_workflow("wf").build();
    let mut b = TaskBuilder::new("b").with_workflow("wf").build();
    let mut c = TaskBuilder::new("c").with_workflow("wf").build();
    b.dependencies.insert(a.id);
    c.dependencies.insert(a.id);
    c.dependencies.insert(b.id);

    let tasks = vec![a.clone(), b.clone(), c.clone()];
    let validation = DagDependencyChecker::validate_workflow("wf", &tasks);
    assert!(validation.is_valid);
    assert_eq!(
        validation.execution_levels,
        vec![vec![a.id], vec![b.id], vec![c.id]]
    );
}

#[test]
fn test_empty_workflow_is_invalid() {
    let validation = DagDependencyChecker::validate_workflow("wf", &[]);
    assert!(!validation.is_valid);
    assert!(validation.error_message.is_some());
}

#[test]
fn test_dependency_paths_of_diamond() {
    let wf = WorkflowBuilder::new("wf")
        .edge("A", "B")
        .edge("A", "C")
        .edge("B", "D")
        .edge("C", "D")
        .build();

    let mut paths = DagDependencyChecker::get_dependency_paths(wf.id("D"), &wf.tasks);
    paths.sort();
    let mut expected = vec![
        vec![wf.id("D"), wf.id("B"), wf.id("A")],
        vec![wf.id("D"), wf.id("C"), wf.id("A")],
    ];
    expected.sort();
    assert_eq!(paths, expected);

    assert_eq!(
        DagDependencyChecker::get_dependency_paths(wf.id("A"), &wf.tasks),
        vec![vec![wf.id("A")]]
    );
    assert!(DagDependencyChecker::get_dependency_paths(Uuid::new_v4(), &wf.tasks).is_empty());
}

#[test]
fn test_dependency_paths_stop_at_cycle() {
    let wf = WorkflowBuilder::new("wf").edge("A", "B").edge("B", "A").build();

    let paths = DagDependencyChecker::get_dependency_paths(wf.id("A"), &wf.tasks);
    assert_eq!(paths, vec![vec![wf.id("A"), wf.id("B")]]);
}

#[test]
fn test_missing_and_disabled_dependencies_are_separated() {
    let disabled = TaskBuilder::new("disabled").disabled().build();
    let ghost = Uuid::new_v4();
    let mut task = TaskBuilder::new("task").build();
    task.dependencies.insert(disabled.id);
    task.dependencies.insert(ghost);

    let all = vec![disabled.clone(), task.clone()];
    let result = DagDependencyChecker::check_dependencies(&task, &all);
    assert!(!result.is_valid);
    assert_eq!(result.missing_dependency_ids, vec![ghost]);
    assert_eq!(result.invalid_dependency_ids, vec![disabled.id]);
    assert!(!DagDependencyChecker::dependencies_satisfied(&task, &all));
}
