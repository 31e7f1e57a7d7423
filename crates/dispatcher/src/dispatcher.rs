//! Job 调度器
//!
//! 两种互斥的调度模式：
//!
//! - [`DevelopmentJobDispatcher`]: 在调用方上下文中按提交顺序逐个同步执行
//! - [`StandaloneJobDispatcher`]: 固定大小的工作池，后台循环从队列取出就绪的 Job

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use datapipe_core::{DataPipeResult, FunctionRegistry, JobMode};
use datapipe_worker::{ExecutionMode, JobRunner};
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::orchestrator::Orchestrator;
use crate::queue::QueuedJob;

#[async_trait]
pub trait JobDispatcher: Send + Sync {
    fn mode(&self) -> JobMode;

    /// 通知调度器队列中有新的 Job
    ///
    /// 开发模式下会在返回前执行完所有就绪的 Job。
    async fn dispatch(&self) -> DataPipeResult<()>;

    fn is_running(&self) -> bool;

    fn max_workers(&self) -> usize;

    fn nb_available_workers(&self) -> usize;

    /// 停止取出新的 Job，`wait` 为 true 时等待执行中的 Job 结束
    async fn stop(&self, wait: bool);
}

/// 执行一个已出队的 Job 并通知编排器
async fn execute(orchestrator: &Orchestrator, runner: &JobRunner, entry: QueuedJob) {
    let result = match runner.run(&entry.job_id).await {
        Ok(job) => orchestrator.on_job_finished(&entry, &job).await,
        Err(e) => {
            // 执行流程本身出错（例如仓储不可用），Job 可能停留在中间状态
            error!("Job {} 执行流程出错: {}", entry.job_id, e);
            orchestrator.queue().finish(&entry.job_id).await;
            Err(e)
        }
    };
    if let Err(e) = result {
        error!("Job {} 结束处理失败: {}", entry.job_id, e);
    }
}

/// 同步调度器，用于开发和测试
pub struct DevelopmentJobDispatcher {
    orchestrator: Arc<Orchestrator>,
    runner: JobRunner,
    dispatching: Mutex<()>,
}

impl DevelopmentJobDispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>, functions: FunctionRegistry) -> Self {
        let runner = JobRunner::new(
            orchestrator.managers().clone(),
            functions,
            ExecutionMode::Inline,
        );
        Self {
            orchestrator,
            runner,
            dispatching: Mutex::new(()),
        }
    }
}

#[async_trait]
impl JobDispatcher for DevelopmentJobDispatcher {
    fn mode(&self) -> JobMode {
        JobMode::Development
    }

    async fn dispatch(&self) -> DataPipeResult<()> {
        let _guard = self.dispatching.lock().await;
        while let Some(entry) = self.orchestrator.next_ready().await? {
            execute(&self.orchestrator, &self.runner, entry).await;
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        true
    }

    fn max_workers(&self) -> usize {
        1
    }

    fn nb_available_workers(&self) -> usize {
        1
    }

    async fn stop(&self, _wait: bool) {}
}

/// 工作池调度器
///
/// 后台循环在拿到空闲 Worker 后从队列取出就绪的 Job，交给独立的 tokio 任务执行。
/// 任务函数在阻塞线程池中运行，不占用异步工作线程。
pub struct StandaloneJobDispatcher {
    orchestrator: Arc<Orchestrator>,
    runner: JobRunner,
    max_workers: usize,
    workers: Arc<Semaphore>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StandaloneJobDispatcher {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        functions: FunctionRegistry,
        max_workers: usize,
        poll_interval: Duration,
    ) -> Self {
        let runner = JobRunner::new(
            orchestrator.managers().clone(),
            functions,
            ExecutionMode::Blocking,
        );
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            orchestrator,
            runner,
            max_workers,
            workers: Arc::new(Semaphore::new(max_workers)),
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// 启动调度循环，重复调用没有效果
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        self.orchestrator.metrics().set_available_workers(self.max_workers);

        let orchestrator = Arc::clone(&self.orchestrator);
        let runner = self.runner.clone();
        let workers = Arc::clone(&self.workers);
        let running = Arc::clone(&self.running);
        let poll_interval = self.poll_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *handle = Some(tokio::spawn(async move {
            info!("工作池调度器已启动");
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                // 只有调度循环会获取 Worker，空闲时不占用
                if workers.available_permits() == 0 {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = orchestrator.queue().notified() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                    continue;
                }

                match orchestrator.next_ready().await {
                    Ok(Some(entry)) => {
                        let Ok(permit) = Arc::clone(&workers).acquire_owned().await else {
                            break;
                        };
                        orchestrator.metrics().set_available_workers(workers.available_permits());
                        let orchestrator = Arc::clone(&orchestrator);
                        let runner = runner.clone();
                        let workers = Arc::clone(&workers);
                        tokio::spawn(async move {
                            execute(&orchestrator, &runner, entry).await;
                            drop(permit);
                            orchestrator.metrics().set_available_workers(workers.available_permits());
                            orchestrator.queue().wake();
                        });
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            _ = orchestrator.queue().notified() => {}
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                    }
                    Err(e) => {
                        error!("从队列取出 Job 失败: {}", e);
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
            info!("工作池调度器已停止");
        }));
    }
}

#[async_trait]
impl JobDispatcher for StandaloneJobDispatcher {
    fn mode(&self) -> JobMode {
        JobMode::Standalone
    }

    async fn dispatch(&self) -> DataPipeResult<()> {
        if !self.is_running() {
            warn!("工作池调度器未运行，Job 将留在队列中");
        }
        self.orchestrator.queue().wake();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn nb_available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    async fn stop(&self, wait: bool) {
        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };
        let _ = self.shutdown_tx.send(());
        self.running.store(false, Ordering::SeqCst);
        if !wait {
            // 不等待：循环在下一次检查时退出，已开始的 Job 继续执行完
            return;
        }

        if let Err(e) = handle.await {
            error!("工作池调度循环异常退出: {}", e);
        }
        // 拿回全部 Worker 即表示执行中的 Job 都已结束
        match self.workers.acquire_many(self.max_workers as u32).await {
            Ok(permits) => drop(permits),
            Err(e) => warn!("等待执行中的 Job 结束失败: {}", e),
        }
        debug!("工作池中的 Job 已全部结束");
    }
}
