use serde::{Deserialize, Serialize};

/// Job 执行模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// 在调用方上下文中逐个同步执行
    #[default]
    Development,
    /// 固定大小的工作池
    Standalone,
}

/// 上游 Job 失败后下游 Job 的处理策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 同一次提交中依赖失败输出的 Job 被放弃
    #[default]
    Abandon,
    /// 依然尝试执行下游 Job
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub mode: JobMode,
    pub max_nb_of_workers: usize,
    pub failure_policy: FailurePolicy,
    pub poll_interval_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            mode: JobMode::Development,
            max_nb_of_workers: 1,
            failure_policy: FailurePolicy::Abandon,
            poll_interval_ms: 100,
        }
    }
}

impl JobConfig {
    pub fn development() -> Self {
        Self::default()
    }

    pub fn standalone(max_nb_of_workers: usize) -> Self {
        Self {
            mode: JobMode::Standalone,
            max_nb_of_workers,
            ..Self::default()
        }
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn is_standalone(&self) -> bool {
        self.mode == JobMode::Standalone
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.is_standalone() && self.max_nb_of_workers == 0 {
            return Err(anyhow::anyhow!("工作池模式下Worker数量必须大于0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("调度轮询间隔必须大于0"));
        }
        Ok(())
    }
}
