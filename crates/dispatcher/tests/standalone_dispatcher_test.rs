use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use datapipe_application::Managers;
use datapipe_core::{CoreConfig, FunctionRegistry, JobConfig, JobMode, RepositoryType};
use datapipe_dispatcher::{OrchestrationContext, SubmitOptions, Submittable};
use datapipe_domain::{Blueprints, DataNodeConfig, JobStatus, PipelineConfig, ScenarioConfig, TaskConfig};
use serde_json::{json, Value};

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

async fn context(dir: &std::path::Path, job_config: JobConfig) -> OrchestrationContext {
    let managers = Managers::from_config(&CoreConfig {
        root_folder: dir.to_string_lossy().to_string(),
        repository_type: RepositoryType::InMemory,
        ..CoreConfig::default()
    });
    let functions = FunctionRegistry::new();
    functions
        .register_fn("double", |inputs: Vec<Value>| {
            std::thread::sleep(Duration::from_millis(20));
            let n = inputs[0].as_i64().unwrap_or_default();
            Ok(vec![json!(n * 2)])
        })
        .await;
    functions
        .register_fn("sum", |inputs: Vec<Value>| {
            let total: i64 = inputs.iter().filter_map(Value::as_i64).sum();
            Ok(vec![json!(total)])
        })
        .await;
    let mut job_config = job_config;
    job_config.poll_interval_ms = 10;
    OrchestrationContext::new(managers, functions, job_config)
}

fn configure_pipeline(blueprints: &mut Blueprints, prefix: &str, seed: i64) {
    let [d0, d1, d2, d3] = [0, 1, 2, 3].map(|i| format!("{prefix}{i}"));
    let [first, second, total] = ["first", "second", "total"].map(|name| format!("{prefix}_{name}"));
    blueprints
        .configure_data_node(DataNodeConfig::new(d0.as_str(), "in_memory").property("default_data", seed))
        .configure_data_node(DataNodeConfig::new(d1.as_str(), "in_memory"))
        .configure_data_node(DataNodeConfig::new(d2.as_str(), "in_memory"))
        .configure_data_node(DataNodeConfig::new(d3.as_str(), "in_memory"))
        .configure_task(TaskConfig::new(first.as_str(), "double", &[d0.as_str()], &[d1.as_str()]))
        .configure_task(TaskConfig::new(second.as_str(), "double", &[d1.as_str()], &[d2.as_str()]))
        .configure_task(TaskConfig::new(
            total.as_str(),
            "sum",
            &[d1.as_str(), d2.as_str()],
            &[d3.as_str()],
        ))
        .configure_pipeline(PipelineConfig::new(
            format!("{prefix}_pipeline"),
            &[first.as_str(), second.as_str(), total.as_str()],
        ));
}

/// 两个互不共享数据节点的管道
fn blueprints() -> Blueprints {
    let mut blueprints = Blueprints::new();
    configure_pipeline(&mut blueprints, "x", 3);
    configure_pipeline(&mut blueprints, "y", 5);
    blueprints.configure_scenario(ScenarioConfig::new("s", &["x_pipeline", "y_pipeline"]));
    blueprints
}

async fn results(context: &OrchestrationContext) -> Vec<Value> {
    let managers = context.managers();
    let mut values = Vec::new();
    for config_id in ["x1", "x2", "x3", "y1", "y2", "y3"] {
        let dn = managers.data.get_by_config_id(config_id).await.unwrap().remove(0);
        values.push(managers.data.read(&dn.id).await.unwrap());
    }
    values
}

async fn run_scenario(context: &OrchestrationContext) -> Vec<JobStatus> {
    let scenario = context
        .managers()
        .scenarios
        .create(&blueprints(), "s", Utc::now(), None)
        .await
        .unwrap();
    let jobs = context
        .submit(
            &Submittable::Scenario(scenario.id),
            &[],
            &SubmitOptions::default().wait(WAIT),
        )
        .await
        .unwrap();
    jobs.iter().map(|j| j.status).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_matches_development_results() {
    let dev_dir = tempfile::tempdir().unwrap();
    let development = context(dev_dir.path(), JobConfig::development()).await;
    development.build_dispatcher(false).await.unwrap();
    assert_eq!(run_scenario(&development).await, vec![JobStatus::Completed; 6]);

    let pool_dir = tempfile::tempdir().unwrap();
    let standalone = context(pool_dir.path(), JobConfig::standalone(2)).await;
    let dispatcher = standalone.build_dispatcher(false).await.unwrap();
    assert_eq!(dispatcher.mode(), JobMode::Standalone);
    assert_eq!(run_scenario(&standalone).await, vec![JobStatus::Completed; 6]);

    assert_eq!(results(&development).await, results(&standalone).await);
    assert_eq!(
        results(&standalone).await,
        vec![json!(6), json!(12), json!(18), json!(10), json!(20), json!(30)]
    );
    for dn in standalone.managers().data.get_all().await.unwrap() {
        assert!(!dn.edit_in_progress);
    }
    standalone.stop(true).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_build_dispatcher_reuses_running_pool() {
    let dir = tempfile::tempdir().unwrap();
    let context = context(dir.path(), JobConfig::standalone(2)).await;

    let first = context.build_dispatcher(false).await.unwrap();
    let second = context.build_dispatcher(false).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.nb_available_workers(), 2);

    let restarted = context.build_dispatcher(true).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &restarted));
    assert!(!first.is_running());
    assert!(restarted.is_running());
    context.stop(true).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_force_restart_resets_workers_and_abandons_queue() {
    let dir = tempfile::tempdir().unwrap();
    let context = context(dir.path(), JobConfig::standalone(2)).await;
    context.build_dispatcher(false).await.unwrap();

    let scenario = context
        .managers()
        .scenarios
        .create(&blueprints(), "s", Utc::now(), None)
        .await
        .unwrap();
    // 锁住两个管道的源数据，Job 全部留在队列中
    for config_id in ["x0", "y0"] {
        let dn = context.managers().data.get_by_config_id(config_id).await.unwrap().remove(0);
        context.managers().data.lock_edit(&dn.id).await.unwrap();
    }
    let jobs = context
        .submit(&Submittable::Scenario(scenario.id), &[], &SubmitOptions::default())
        .await
        .unwrap();
    assert!(jobs.iter().all(|j| j.status == JobStatus::Pending));

    let dispatcher = context
        .reconfigure(JobConfig { poll_interval_ms: 10, ..JobConfig::standalone(3) }, true)
        .await
        .unwrap();
    assert!(dispatcher.is_running());
    assert_eq!(dispatcher.nb_available_workers(), 3);

    let jobs = context.orchestrator().refresh(&jobs).await.unwrap();
    assert!(jobs.iter().all(|j| j.status == JobStatus::Abandoned));
    assert_eq!(context.orchestrator().queue().pending_len().await, 0);
    context.stop(true).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wait_timeout_returns_current_state() {
    let dir = tempfile::tempdir().unwrap();
    let context = context(dir.path(), JobConfig::standalone(1)).await;
    context.build_dispatcher(false).await.unwrap();

    let scenario = context
        .managers()
        .scenarios
        .create(&blueprints(), "s", Utc::now(), None)
        .await
        .unwrap();
    let x0 = context.managers().data.get_by_config_id("x0").await.unwrap().remove(0);
    context.managers().data.lock_edit(&x0.id).await.unwrap();

    let jobs = context
        .submit(
            &Submittable::Scenario(scenario.id),
            &[],
            &SubmitOptions::default().wait(Some(Duration::from_millis(500))),
        )
        .await
        .unwrap();
    // x 管道被锁住，y 管道正常完成
    assert!(jobs[..3].iter().all(|j| j.status == JobStatus::Pending));
    assert!(jobs[3..].iter().all(|j| j.status == JobStatus::Completed));
    context.stop(false).await;
}
