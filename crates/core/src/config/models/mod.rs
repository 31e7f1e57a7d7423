pub mod app_config;
pub mod core_config;
pub mod job_config;
pub mod observability;

pub use app_config::AppConfig;
pub use core_config::{CoreConfig, RepositoryType};
pub use job_config::{FailurePolicy, JobConfig, JobMode};
pub use observability::ObservabilityConfig;
