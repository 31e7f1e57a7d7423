//! 配置模型
//!
//! 运行时配置分为三部分：
//!
//! - `core`: 存储目录、仓储类型、模型版本号
//! - `job`: Job 执行模式（同步开发模式或工作池模式）与工作池大小
//! - `observability`: 日志级别和输出格式
//!
//! 配置通过 [`AppConfig::load`] 从 TOML 文件和 `DATAPIPE__` 前缀的环境变量加载。

pub mod models;

pub use models::*;
