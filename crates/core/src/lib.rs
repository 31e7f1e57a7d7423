pub mod config;
pub mod errors;
pub mod function_registry;
pub mod logging;
pub mod traits;

pub use config::*;
pub use errors::*;
pub use function_registry::*;
pub use traits::*;

/// 持久化模型默认携带的版本号
pub const MODEL_VERSION: &str = env!("CARGO_PKG_VERSION");
