use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::broadcast;

use cronflow_core::{
    config::{RetryConfig, SchedulerConfig},
    models::{DagTaskStatus, RetryStrategy, ScheduledTask, WorkflowState},
    traits::TaskStore,
    MetricsCollector,
};
use cronflow_dispatcher::{
    DagExecutionManager, InMemoryTaskStore, LoadBalancer, NodeRegistry, RetryManager,
    TaskDispatcher, TaskScheduler,
};
use cronflow_testing_utils::{
    node_urls, MockWorkerClient, RecordingListener, TaskBuilder, TestEnv, WorkflowBuilder,
};

struct Harness {
    store: Arc<InMemoryTaskStore>,
    client: Arc<MockWorkerClient>,
    listener: Arc<RecordingListener>,
    dag_manager: Arc<DagExecutionManager>,
    scheduler: Arc<TaskScheduler>,
    urls: Vec<String>,
}

fn harness(nodes: usize, tasks: Vec<ScheduledTask>, config: SchedulerConfig) -> Harness {
    let registry = Arc::new(NodeRegistry::new());
    let urls = node_urls(nodes);
    for url in &urls {
        registry.register(url).unwrap();
    }
    let balancer = Arc::new(LoadBalancer::new(Arc::clone(&registry)));
    let client = Arc::new(MockWorkerClient::new());
    let metrics = Arc::new(MetricsCollector::new());
    let dispatcher = Arc::new(TaskDispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&balancer),
        client.clone(),
        Arc::clone(&metrics),
    ));
    let retry_manager = Arc::new(RetryManager::new(
        registry,
        balancer,
        client.clone(),
        Arc::clone(&metrics),
        RetryConfig::default(),
    ));
    let store = Arc::new(InMemoryTaskStore::with_tasks(tasks));
    let dag_manager = Arc::new(DagExecutionManager::new());
    let listener = Arc::new(RecordingListener::new());
    let scheduler = TaskScheduler::new(
        store.clone(),
        dispatcher,
        retry_manager,
        Arc::clone(&dag_manager),
        metrics,
        config,
    )
    .with_listener(listener.clone());

    Harness {
        store,
        client,
        listener,
        dag_manager,
        scheduler: Arc::new(scheduler),
        urls,
    }
}

impl Harness {
    async fn task(&self, id: uuid::Uuid) -> ScheduledTask {
        self.store.get_task(id).await.unwrap().unwrap()
    }

    async fn start_workflow(&self, workflow_id: &str) {
        let mut tasks = self.store.get_all_tasks().await.unwrap();
        let start = self.dag_manager.start_workflow(workflow_id, &mut tasks).await;
        assert!(start.is_success, "{:?}", start.error_message);
        self.store.update_tasks(&tasks).await.unwrap();
    }
}

#[tokio::test]
async fn test_due_task_is_dispatched_and_rescheduled() {
    let task = TaskBuilder::new("report").with_cron("*/5 * * * *").due_now().build();
    let h = harness(1, vec![task.clone()], SchedulerConfig::default());

    let dispatched = h.scheduler.run_once().await.unwrap();

    assert_eq!(dispatched, vec![task.id]);
    assert_eq!(h.client.calls_for_task(task.id), 1);
    assert_eq!(h.listener.successes(), 1);
    let stored = h.task(task.id).await;
    assert!(stored.next_run_time.unwrap() > Utc::now());

    // 下一次触发时间未到，不会重复分发
    assert!(h.scheduler.run_once().await.unwrap().is_empty());
    assert_eq!(h.client.call_count(), 1);
}

#[tokio::test]
async fn test_tasks_not_due_are_skipped() {
    let future = TaskBuilder::new("later")
        .with_next_run_time(Utc::now() + Duration::hours(1))
        .build();
    let unscheduled = TaskBuilder::new("unscheduled").build();
    let disabled = TaskBuilder::new("disabled").due_now().disabled().build();
    let h = harness(
        1,
        vec![future, unscheduled, disabled],
        SchedulerConfig::default(),
    );

    assert!(h.scheduler.run_once().await.unwrap().is_empty());
    assert_eq!(h.client.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_cron_backs_off() {
    let task = TaskBuilder::new("broken").with_cron("every day").due_now().build();
    let config = SchedulerConfig {
        invalid_cron_backoff_seconds: 90,
        ..Default::default()
    };
    let h = harness(1, vec![task.clone()], config);

    let before = Utc::now();
    h.scheduler.run_once().await.unwrap();

    let next = h.task(task.id).await.next_run_time.unwrap();
    assert!(next >= before + Duration::seconds(90));
    assert!(next <= Utc::now() + Duration::seconds(90));
}

#[tokio::test]
async fn test_unmet_dependency_holds_plain_task() {
    let upstream = TaskBuilder::new("upstream").build();
    let mut downstream = TaskBuilder::new("downstream").due_now().build();
    downstream.dependencies.insert(upstream.id);
    let h = harness(1, vec![upstream, downstream], SchedulerConfig::default());

    assert!(h.scheduler.run_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_workflow_runs_to_completion() {
    let wf = WorkflowBuilder::new("etl").edge("extract", "load").build();
    let mut tasks = wf.tasks.clone();
    tasks[0].next_run_time = Some(Utc::now() - Duration::seconds(1));
    let h = harness(2, tasks, SchedulerConfig::default());
    h.start_workflow("etl").await;

    let first = h.scheduler.run_once().await.unwrap();
    assert_eq!(first, vec![wf.id("extract")]);
    assert_eq!(h.task(wf.id("extract")).await.dag_status, DagTaskStatus::Completed);
    let load = h.task(wf.id("load")).await;
    assert_eq!(load.dag_status, DagTaskStatus::Ready);
    assert!(load.next_run_time.is_some());

    let second = h.scheduler.run_once().await.unwrap();
    assert_eq!(second, vec![wf.id("load")]);
    assert_eq!(
        h.dag_manager.workflow_state("etl").await,
        Some(WorkflowState::Completed)
    );
}

#[tokio::test]
async fn test_paused_workflow_is_not_dispatched() {
    let wf = WorkflowBuilder::new("etl").task("extract").due_now().build();
    let h = harness(1, wf.tasks.clone(), SchedulerConfig::default());
    h.start_workflow("etl").await;
    assert!(h.dag_manager.pause_workflow("etl").await);

    assert!(h.scheduler.run_once().await.unwrap().is_empty());
    assert_eq!(h.task(wf.id("extract")).await.dag_status, DagTaskStatus::Ready);

    h.dag_manager
        .resume_stored_workflow(h.store.as_ref(), "etl")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.scheduler.run_once().await.unwrap(), vec![wf.id("extract")]);
}

#[tokio::test]
async fn test_task_released_during_pause_runs_after_resume() {
    let wf = WorkflowBuilder::new("etl").edge("extract", "load").build();
    let (extract_id, load_id) = (wf.id("extract"), wf.id("load"));
    let mut tasks = wf.tasks.clone();
    for task in &mut tasks {
        task.next_run_time = if task.id == extract_id {
            Some(Utc::now() - Duration::seconds(1))
        } else {
            // 下游的CRON触发时间很远，只能靠恢复时的立即调度运行
            Some(Utc::now() + Duration::days(100))
        };
    }
    let h = harness(1, tasks, SchedulerConfig::default());
    h.client.set_delay(StdDuration::from_millis(50));
    h.start_workflow("etl").await;

    let outcome = h.scheduler.tick().await.unwrap();
    assert!(h.dag_manager.pause_workflow("etl").await);
    assert_eq!(outcome.join().await, vec![extract_id]);

    assert_eq!(h.task(extract_id).await.dag_status, DagTaskStatus::Completed);
    assert_eq!(h.task(load_id).await.dag_status, DagTaskStatus::Waiting);
    assert!(h.scheduler.run_once().await.unwrap().is_empty());

    let promoted = h
        .dag_manager
        .resume_stored_workflow(h.store.as_ref(), "etl")
        .await
        .unwrap();
    assert_eq!(promoted, Some(vec![load_id]));
    let load = h.task(load_id).await;
    assert_eq!(load.dag_status, DagTaskStatus::Ready);
    assert!(load.next_run_time.unwrap() <= Utc::now());

    assert_eq!(h.scheduler.run_once().await.unwrap(), vec![load_id]);
    assert_eq!(
        h.dag_manager.workflow_state("etl").await,
        Some(WorkflowState::Completed)
    );
}

#[tokio::test]
async fn test_resume_of_running_workflow_is_rejected() {
    let wf = WorkflowBuilder::new("etl").task("extract").build();
    let h = harness(1, wf.tasks.clone(), SchedulerConfig::default());
    h.start_workflow("etl").await;

    let resumed = h
        .dag_manager
        .resume_stored_workflow(h.store.as_ref(), "etl")
        .await
        .unwrap();
    assert!(resumed.is_none());
    assert!(h
        .dag_manager
        .resume_stored_workflow(h.store.as_ref(), "missing")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_workflow_not_started_is_not_dispatched() {
    let wf = WorkflowBuilder::new("etl").task("extract").due_now().build();
    let h = harness(1, wf.tasks.clone(), SchedulerConfig::default());

    assert!(h.scheduler.run_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transport_failure_retries_on_another_node() {
    let wf = WorkflowBuilder::new("etl").edge("extract", "load").build();
    let mut tasks = wf.tasks.clone();
    tasks[0] = tasks[0]
        .clone()
        .with_retry(2, 10, RetryStrategy::Fixed)
        .with_next_run_time(Utc::now() - Duration::seconds(1));
    let h = harness(2, tasks, SchedulerConfig::default());
    h.client.fail_node(&h.urls[0]);
    h.start_workflow("etl").await;

    h.scheduler.run_once().await.unwrap();

    assert_eq!(h.client.calls_to(&h.urls[0]), 1);
    assert_eq!(h.client.calls_to(&h.urls[1]), 1);
    let extract = h.task(wf.id("extract")).await;
    assert_eq!(extract.dag_status, DagTaskStatus::Completed);
    assert_eq!(extract.current_retry_count, 0);
    assert_eq!(h.task(wf.id("load")).await.dag_status, DagTaskStatus::Ready);

    // 首次失败和重试成功都会通知监听器，重试结果带有实际执行节点
    let results = h.listener.results();
    assert_eq!(results.len(), 2);
    assert!(!results[0].success);
    assert_eq!(results[0].worker_node_url, h.urls[0]);
    assert!(results[1].success);
    assert_eq!(results[1].worker_node_url, h.urls[1]);
}

#[tokio::test]
async fn test_failure_without_retry_fails_workflow_task() {
    let wf = WorkflowBuilder::new("etl").task("extract").due_now().build();
    let h = harness(1, wf.tasks.clone(), SchedulerConfig::default());
    h.client.fail_node(&h.urls[0]);
    h.start_workflow("etl").await;

    h.scheduler.run_once().await.unwrap();

    assert_eq!(h.task(wf.id("extract")).await.dag_status, DagTaskStatus::Failed);
    assert_eq!(h.listener.failures(), 1);
    assert_eq!(
        h.dag_manager.workflow_state("etl").await,
        Some(WorkflowState::Failed)
    );
}

#[tokio::test]
async fn test_failed_retry_is_dispatched_when_due() {
    let task = TaskBuilder::new("sync")
        .with_cron("0 0 1 1 *")
        .with_retry(3, 1, RetryStrategy::Fixed)
        .due_now()
        .build();
    let h = harness(2, vec![task.clone()], SchedulerConfig::default());
    h.client.fail_node(&h.urls[0]);
    h.client.fail_node(&h.urls[1]);

    h.scheduler.run_once().await.unwrap();
    let stored = h.task(task.id).await;
    assert_eq!(stored.current_retry_count, 1);
    let retry_at = stored.next_retry_time.unwrap();
    assert!(retry_at > Utc::now() - Duration::seconds(1));

    // 两个节点都已剔除，到期的重试因为没有节点而重新排期
    tokio::time::sleep(StdDuration::from_millis(1_100)).await;
    let dispatched = h.scheduler.run_once().await.unwrap();
    assert_eq!(dispatched, vec![task.id]);
    let stored = h.task(task.id).await;
    assert!(stored.next_retry_time.unwrap() > Utc::now());
    assert_eq!(stored.current_retry_count, 2);
    assert_eq!(h.client.calls_for_task(task.id), 2);
}

#[tokio::test]
async fn test_unplaced_retries_count_toward_limit() {
    let wf = WorkflowBuilder::new("etl").task("extract").build();
    let id = wf.id("extract");
    let mut task = wf.tasks[0]
        .clone()
        .with_retry(2, 1, RetryStrategy::Fixed)
        .with_next_run_time(Utc::now() - Duration::seconds(1));
    task.cron_expression = "0 0 1 1 *".to_string();
    let h = harness(0, vec![task], SchedulerConfig::default());
    h.start_workflow("etl").await;

    assert_eq!(h.scheduler.run_once().await.unwrap(), vec![id]);
    let stored = h.task(id).await;
    assert_eq!(stored.current_retry_count, 1);
    assert_eq!(stored.dag_status, DagTaskStatus::Running);
    assert!(stored.next_retry_time.is_some());

    let mut due = stored;
    due.next_retry_time = Some(Utc::now() - Duration::seconds(1));
    h.store.update_task(&due).await.unwrap();

    assert_eq!(h.scheduler.run_once().await.unwrap(), vec![id]);
    let stored = h.task(id).await;
    assert_eq!(stored.current_retry_count, 2);
    assert_eq!(stored.dag_status, DagTaskStatus::Failed);
    assert_eq!(
        h.dag_manager.workflow_state("etl").await,
        Some(WorkflowState::Failed)
    );

    assert!(h.scheduler.run_once().await.unwrap().is_empty());
    assert_eq!(h.client.call_count(), 0);
}

#[tokio::test]
async fn test_retry_bookkeeping_keeps_changes_made_during_dispatch() {
    let task = TaskBuilder::new("sync")
        .with_cron("0 0 1 1 *")
        .with_retry(3, 10, RetryStrategy::Fixed)
        .due_now()
        .build();
    let h = harness(2, vec![task.clone()], SchedulerConfig::default());
    h.client.fail_node(&h.urls[0]);
    h.client.fail_node(&h.urls[1]);
    h.client.set_delay(StdDuration::from_millis(300));

    let outcome = h.scheduler.tick().await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(100)).await;

    // 远程调用尚未返回时禁用任务并改期
    let rescheduled = Utc::now() + Duration::days(7);
    let mut edited = h.task(task.id).await;
    edited.enabled = false;
    edited.next_run_time = Some(rescheduled);
    h.store.update_task(&edited).await.unwrap();

    outcome.join().await;

    let stored = h.task(task.id).await;
    assert_eq!(h.client.calls_for_task(task.id), 2);
    assert!(!stored.enabled);
    assert_eq!(stored.next_run_time, Some(rescheduled));
    assert_eq!(stored.current_retry_count, 1);
    assert!(stored.next_retry_time.is_some());
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown() {
    let task = TaskBuilder::new("report").due_now().build();
    let config = SchedulerConfig {
        tick_interval_ms: 10,
        ..Default::default()
    };
    let h = harness(1, vec![task.clone()], config);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let scheduler = Arc::clone(&h.scheduler);
    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let client = Arc::clone(&h.client);
    assert!(
        TestEnv::wait_for(
            || {
                let client = Arc::clone(&client);
                async move { client.call_count() == 1 }
            },
            StdDuration::from_secs(2),
        )
        .await
    );

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(StdDuration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_disabled_scheduler_returns_immediately() {
    let config = SchedulerConfig {
        enabled: false,
        ..Default::default()
    };
    let h = harness(1, vec![TaskBuilder::new("report").due_now().build()], config);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    tokio::time::timeout(StdDuration::from_secs(1), h.scheduler.run(shutdown_rx))
        .await
        .unwrap();
    assert_eq!(h.client.call_count(), 0);
}
