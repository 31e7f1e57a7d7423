use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{core_config::CoreConfig, job_config::JobConfig, observability::ObservabilityConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub core: CoreConfig,
    pub job: JobConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 按 文件 -> 环境变量 的顺序加载配置
    ///
    /// 未指定路径时依次尝试默认位置，都不存在则使用默认值。环境变量使用
    /// `DATAPIPE__` 前缀和双下划线分隔，例如 `DATAPIPE__JOB__MODE=standalone`。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/datapipe.toml", "datapipe.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("DATAPIPE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.core.validate()?;
        self.job.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FailurePolicy, JobMode, RepositoryType};

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.core.storage_folder, ".data/");
        assert_eq!(config.core.root_folder, "./datapipe/");
        assert_eq!(config.core.repository_type, RepositoryType::Filesystem);
        assert_eq!(config.job.mode, JobMode::Development);
        assert_eq!(config.job.max_nb_of_workers, 1);
        assert_eq!(config.job.failure_policy, FailurePolicy::Abandon);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_from_toml() {
        let toml_str = r#"
[core]
storage_folder = "/tmp/datapipe"
repository_type = "in_memory"

[job]
mode = "standalone"
max_nb_of_workers = 4
failure_policy = "continue"
"#;

        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.core.storage_folder, "/tmp/datapipe");
        assert_eq!(config.core.repository_type, RepositoryType::InMemory);
        assert_eq!(config.job.mode, JobMode::Standalone);
        assert_eq!(config.job.max_nb_of_workers, 4);
        assert_eq!(config.job.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_standalone_requires_workers() {
        let toml_str = r#"
[job]
mode = "standalone"
max_nb_of_workers = 0
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_invalid_log_format_rejected() {
        let mut config = AppConfig::default();
        config.observability.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datapipe.toml");
        std::fs::write(&path, "[job]\nmax_nb_of_workers = 3\n").unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.job.max_nb_of_workers, 3);
        assert_eq!(config.job.mode, JobMode::Development);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/definitely/not/here.toml")).is_err());
    }

    #[test]
    fn test_toml_round_trip_keeps_mode() {
        let mut config = AppConfig::default();
        config.job = JobConfig::standalone(2);
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.job.mode, JobMode::Standalone);
        assert_eq!(parsed.job.max_nb_of_workers, 2);
    }
}
