//! Job 执行：单个 Job 的完整执行协议

pub mod components;

pub use components::{ExecutionMode, JobRunner};
