pub mod job_execution;

pub use job_execution::{ExecutionMode, JobRunner};
