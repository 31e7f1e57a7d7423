//! Job 编排与调度
//!
//! [`Orchestrator`] 把提交的实体转换为按依赖排序的 Job 并放入 [`JobQueue`]，
//! [`JobDispatcher`] 的两种实现负责从队列取出就绪的 Job 执行。
//! [`OrchestrationContext`] 持有两者，是对外的入口。

pub mod context;
pub mod dispatcher;
pub mod metrics;
pub mod orchestrator;
pub mod queue;

pub use context::{OrchestrationContext, SubmitOptions};
pub use dispatcher::{DevelopmentJobDispatcher, JobDispatcher, StandaloneJobDispatcher};
pub use metrics::DispatcherMetrics;
pub use orchestrator::{Orchestrator, Submittable};
pub use queue::{JobQueue, QueuedJob};
