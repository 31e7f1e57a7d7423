use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use datapipe_application::{JobListener, Managers};
use datapipe_core::{
    CoreConfig, DataPipeError, FailurePolicy, FunctionRegistry, JobConfig, RepositoryType,
};
use datapipe_dispatcher::{OrchestrationContext, SubmitOptions, Submittable};
use datapipe_domain::{
    Blueprints, DataNodeConfig, Job, JobStatus, Pipeline, PipelineConfig, Scenario, ScenarioConfig,
    Task, TaskConfig,
};
use serde_json::{json, Value};

struct Fixture {
    context: OrchestrationContext,
    calls: Arc<AtomicUsize>,
    _dir: tempfile::TempDir,
}

fn managers(dir: &std::path::Path) -> Managers {
    Managers::from_config(&CoreConfig {
        root_folder: dir.to_string_lossy().to_string(),
        repository_type: RepositoryType::InMemory,
        ..CoreConfig::default()
    })
}

async fn functions(calls: &Arc<AtomicUsize>) -> FunctionRegistry {
    let functions = FunctionRegistry::new();
    let counter = Arc::clone(calls);
    functions
        .register_fn("plus_one", move |inputs: Vec<Value>| {
            counter.fetch_add(1, Ordering::SeqCst);
            let n = inputs[0].as_i64().unwrap_or_default();
            Ok(vec![json!(n + 1)])
        })
        .await;
    functions
        .register_fn("fail", |_inputs: Vec<Value>| anyhow::bail!("upstream broke"))
        .await;
    functions
}

async fn fixture(job_config: JobConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let context = OrchestrationContext::new(managers(dir.path()), functions(&calls).await, job_config);
    Fixture {
        context,
        calls,
        _dir: dir,
    }
}

/// input -> a -> b -> {c, d}，B 可跳过
fn blueprints(first_function: &str, a_skippable: bool) -> Blueprints {
    let mut blueprints = Blueprints::new();
    blueprints
        .configure_data_node(DataNodeConfig::new("input", "in_memory").property("default_data", 1))
        .configure_data_node(DataNodeConfig::new("a", "in_memory"))
        .configure_data_node(DataNodeConfig::new("b", "in_memory"))
        .configure_data_node(DataNodeConfig::new("c", "in_memory"))
        .configure_data_node(DataNodeConfig::new("d", "in_memory"))
        .configure_task(TaskConfig::new("task_a", first_function, &["input"], &["a"]).skippable(a_skippable))
        .configure_task(TaskConfig::new("task_b", "plus_one", &["a"], &["b"]).skippable(true))
        .configure_task(TaskConfig::new("task_c", "plus_one", &["b"], &["c"]))
        .configure_task(TaskConfig::new("task_d", "plus_one", &["b"], &["d"]))
        .configure_pipeline(PipelineConfig::new("p", &["task_a", "task_b", "task_c", "task_d"]))
        .configure_scenario(ScenarioConfig::new("s", &["p"]));
    blueprints
}

async fn scenario(context: &OrchestrationContext, blueprints: &Blueprints) -> Scenario {
    context
        .managers()
        .scenarios
        .create(blueprints, "s", Utc::now(), None)
        .await
        .unwrap()
}

fn statuses(jobs: &[Job]) -> Vec<JobStatus> {
    jobs.iter().map(|j| j.status).collect()
}

async fn value_of(managers: &Managers, config_id: &str) -> Value {
    let dn = managers.data.get_by_config_id(config_id).await.unwrap().remove(0);
    managers.data.read(&dn.id).await.unwrap()
}

async fn assert_all_unlocked(managers: &Managers) {
    for dn in managers.data.get_all().await.unwrap() {
        assert!(!dn.edit_in_progress, "{} 仍处于锁定状态", dn.config_id);
    }
}

#[tokio::test]
async fn test_submit_without_dispatcher_fails() {
    let f = fixture(JobConfig::development()).await;
    let scenario = scenario(&f.context, &blueprints("plus_one", false)).await;

    let result = f
        .context
        .submit(&scenario.id.clone().into(), &[], &SubmitOptions::default())
        .await;
    assert!(matches!(result, Err(DataPipeError::DispatcherNotBuilt)));
    assert!(f.context.managers().jobs.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_development_resubmission_skips_up_to_date_task() {
    let f = fixture(JobConfig::development()).await;
    f.context.build_dispatcher(false).await.unwrap();
    let scenario = scenario(&f.context, &blueprints("plus_one", false)).await;
    let target = Submittable::Scenario(scenario.id.clone());
    let managers = f.context.managers();

    let first = f.context.submit(&target, &[], &SubmitOptions::default()).await.unwrap();
    assert_eq!(statuses(&first), vec![JobStatus::Completed; 4]);
    assert_eq!(value_of(managers, "d").await, json!(4));
    assert_eq!(f.calls.load(Ordering::SeqCst), 4);
    // 同一次提交共享 SubmitId
    assert!(first.iter().all(|j| j.submit_id == first[0].submit_id));

    let second = f.context.submit(&target, &[], &SubmitOptions::default()).await.unwrap();
    assert_eq!(
        statuses(&second),
        vec![
            JobStatus::Completed,
            JobStatus::Skipped,
            JobStatus::Completed,
            JobStatus::Completed
        ]
    );
    assert_eq!(f.calls.load(Ordering::SeqCst), 7);
    assert_ne!(second[0].submit_id, first[0].submit_id);

    let forced = f
        .context
        .submit(&target, &[], &SubmitOptions::default().force())
        .await
        .unwrap();
    assert_eq!(statuses(&forced), vec![JobStatus::Completed; 4]);
    assert_eq!(value_of(managers, "b").await, json!(3));
    assert_eq!(managers.jobs.get_all().await.unwrap().len(), 12);
    assert_all_unlocked(managers).await;
}

#[tokio::test]
async fn test_skipped_task_does_not_call_function() {
    let f = fixture(JobConfig::development()).await;
    f.context.build_dispatcher(false).await.unwrap();
    let scenario = scenario(&f.context, &blueprints("plus_one", true)).await;
    let target = Submittable::Scenario(scenario.id.clone());

    f.context.submit(&target, &[], &SubmitOptions::default()).await.unwrap();
    let calls = f.calls.load(Ordering::SeqCst);

    let second = f.context.submit(&target, &[], &SubmitOptions::default()).await.unwrap();
    assert_eq!(
        statuses(&second),
        vec![
            JobStatus::Skipped,
            JobStatus::Skipped,
            JobStatus::Completed,
            JobStatus::Completed
        ]
    );
    assert_eq!(f.calls.load(Ordering::SeqCst), calls + 2);
}

#[tokio::test]
async fn test_failure_abandons_dependents() {
    let f = fixture(JobConfig::development()).await;
    f.context.build_dispatcher(false).await.unwrap();
    let scenario = scenario(&f.context, &blueprints("fail", false)).await;

    let jobs = f
        .context
        .submit(&scenario.id.clone().into(), &[], &SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(
        statuses(&jobs),
        vec![
            JobStatus::Failed,
            JobStatus::Abandoned,
            JobStatus::Abandoned,
            JobStatus::Abandoned
        ]
    );
    assert_eq!(jobs[0].stacktrace, vec!["upstream broke".to_string()]);
    assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    assert_all_unlocked(f.context.managers()).await;
}

#[tokio::test]
async fn test_continue_policy_runs_dependents_into_no_data() {
    let f = fixture(JobConfig::development().with_failure_policy(FailurePolicy::Continue)).await;
    f.context.build_dispatcher(false).await.unwrap();
    let scenario = scenario(&f.context, &blueprints("fail", false)).await;

    let jobs = f
        .context
        .submit(&scenario.id.clone().into(), &[], &SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(statuses(&jobs), vec![JobStatus::Failed; 4]);
    assert!(jobs[1].stacktrace[0].contains("没有可读数据"));
    assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    assert_all_unlocked(f.context.managers()).await;
}

#[tokio::test]
async fn test_cancel_pending_job_abandons_dependents() {
    let f = fixture(JobConfig::development()).await;
    let scenario = scenario(&f.context, &blueprints("plus_one", false)).await;

    // 没有调度器时只入队，不执行
    let jobs = f
        .context
        .orchestrator()
        .submit(&scenario.id.clone().into(), &[], false)
        .await
        .unwrap();
    assert_eq!(statuses(&jobs), vec![JobStatus::Pending; 4]);
    assert_eq!(f.context.orchestrator().queue().pending_len().await, 4);

    let cancelled = f.context.cancel_job(&jobs[1].id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let managers = f.context.managers();
    let current = f.context.orchestrator().refresh(&jobs).await.unwrap();
    assert_eq!(
        statuses(&current),
        vec![
            JobStatus::Pending,
            JobStatus::Cancelled,
            JobStatus::Abandoned,
            JobStatus::Abandoned
        ]
    );
    assert_eq!(f.context.orchestrator().queue().pending_len().await, 1);

    // 已结束的 Job 再次取消保持原状态
    let again = f.context.cancel_job(&jobs[2].id).await.unwrap();
    assert_eq!(again.status, JobStatus::Abandoned);

    f.context.build_dispatcher(false).await.unwrap();
    let a = managers.jobs.get(&jobs[0].id).await.unwrap();
    assert_eq!(a.status, JobStatus::Completed);
    assert_all_unlocked(managers).await;
}

#[tokio::test]
async fn test_externally_locked_input_blocks_jobs() {
    let f = fixture(JobConfig::development()).await;
    let dispatcher = f.context.build_dispatcher(false).await.unwrap();
    let scenario = scenario(&f.context, &blueprints("plus_one", false)).await;
    let managers = f.context.managers();
    let input = managers.data.get_by_config_id("input").await.unwrap().remove(0);
    managers.data.lock_edit(&input.id).await.unwrap();

    let jobs = f
        .context
        .submit(&scenario.id.clone().into(), &[], &SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(statuses(&jobs), vec![JobStatus::Pending; 4]);

    managers.data.unlock_edit(&input.id).await.unwrap();
    dispatcher.dispatch().await.unwrap();
    let jobs = f.context.orchestrator().refresh(&jobs).await.unwrap();
    assert_eq!(statuses(&jobs), vec![JobStatus::Completed; 4]);
}

#[tokio::test]
async fn test_waiting_submission_runs_jobs_once_input_is_unlocked() {
    let f = fixture(JobConfig::development()).await;
    f.context.build_dispatcher(false).await.unwrap();
    let scenario = scenario(&f.context, &blueprints("plus_one", false)).await;
    let managers = f.context.managers().clone();
    let input = managers.data.get_by_config_id("input").await.unwrap().remove(0);
    managers.data.lock_edit(&input.id).await.unwrap();

    let unlocker = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        managers.data.unlock_edit(&input.id).await.unwrap();
    });

    let jobs = f
        .context
        .submit(
            &scenario.id.clone().into(),
            &[],
            &SubmitOptions::default().wait(Some(Duration::from_secs(2))),
        )
        .await
        .unwrap();
    unlocker.await.unwrap();
    assert_eq!(statuses(&jobs), vec![JobStatus::Completed; 4]);
    assert_eq!(value_of(f.context.managers(), "d").await, json!(4));
}

#[tokio::test]
async fn test_cancel_after_dequeue_prevents_skip_and_abandons_dependents() {
    let f = fixture(JobConfig::development()).await;
    let scenario = scenario(&f.context, &blueprints("plus_one", true)).await;
    let orchestrator = f.context.orchestrator();
    let managers = f.context.managers();

    let jobs = orchestrator
        .submit(&scenario.id.clone().into(), &[], false)
        .await
        .unwrap();
    let entry = orchestrator
        .queue()
        .pop_ready(&managers.data)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.job_id, jobs[0].id);

    // 已出队的 Job 只改状态，由出队方收尾
    let cancelled = orchestrator.cancel_job(&entry.job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    orchestrator.skip(&entry).await.unwrap();
    let current = orchestrator.refresh(&jobs).await.unwrap();
    assert_eq!(
        statuses(&current),
        vec![
            JobStatus::Cancelled,
            JobStatus::Abandoned,
            JobStatus::Abandoned,
            JobStatus::Abandoned
        ]
    );
    assert_eq!(orchestrator.queue().pending_len().await, 0);
    assert_eq!(orchestrator.queue().running_len().await, 0);
    assert_all_unlocked(managers).await;
}

#[tokio::test]
async fn test_cyclic_pipeline_rejected_before_jobs_exist() {
    let f = fixture(JobConfig::development()).await;
    f.context.build_dispatcher(false).await.unwrap();
    let managers = f.context.managers();

    let x = managers.data.create(&DataNodeConfig::new("x", "in_memory"), None).await.unwrap();
    let y = managers.data.create(&DataNodeConfig::new("y", "in_memory"), None).await.unwrap();
    let forward = Task::new("forward", "plus_one", vec![x.id.clone()], vec![y.id.clone()]).unwrap();
    let backward = Task::new("backward", "plus_one", vec![y.id], vec![x.id]).unwrap();
    managers.tasks.set(&forward).await.unwrap();
    managers.tasks.set(&backward).await.unwrap();
    let pipeline = Pipeline::new("loop", vec![forward.id, backward.id]).unwrap();
    managers.pipelines.set(&pipeline).await.unwrap();

    let result = f
        .context
        .submit(&pipeline.id.into(), &[], &SubmitOptions::default())
        .await;
    assert!(matches!(result, Err(DataPipeError::CircularDependency { .. })));
    assert!(managers.jobs.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_submission_listeners_see_every_transition() {
    let f = fixture(JobConfig::development()).await;
    f.context.build_dispatcher(false).await.unwrap();
    let scenario = scenario(&f.context, &blueprints("plus_one", false)).await;
    let pipeline = f.context.managers().scenarios.pipelines_of(&scenario).await.unwrap().remove(0);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener: Arc<dyn JobListener> = Arc::new(move |job: &Job| {
        sink.lock().unwrap().push(job.status);
    });

    let jobs = f
        .context
        .submit(&Submittable::Task(pipeline.task_ids[0].clone()), &[listener], &SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
    );
}
