use thiserror::Error;

/// 编排框架错误类型定义
///
/// 按照来源分为配置错误、无数据错误、任务函数执行错误、持久化错误和
/// 调度器生命周期错误几类。任务函数执行错误只会记录在对应的 Job 上，
/// 不会中断调度循环。
#[derive(Debug, Error)]
pub enum DataPipeError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("无效的配置ID: {0}")]
    InvalidConfigId(String),

    #[error("检测到循环依赖，涉及任务: {task_ids:?}")]
    CircularDependency { task_ids: Vec<String> },

    #[error("缺少依赖: {owner} 引用了不存在的 {missing}")]
    MissingDependency { owner: String, missing: String },

    #[error("无效的存储类型: {storage_type}")]
    InvalidStorageType { storage_type: String },

    #[error("数据节点 {id} 没有可读数据")]
    NoData { id: String },

    #[error("{entity} 未找到: {id}")]
    ModelNotFound { entity: String, id: String },

    #[error("任务函数未注册: {name}")]
    FunctionNotFound { name: String },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("无效的状态转换: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Job {id} 尚未结束，不能删除")]
    JobNotDeletable { id: String },

    #[error("调度器未初始化")]
    DispatcherNotBuilt,

    #[error("不支持的过滤操作: {0}")]
    UnsupportedFilter(String),

    #[error("存储后端错误: {0}")]
    Storage(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

impl DataPipeError {
    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Self::ModelNotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }

    /// 配置类错误需要在提交前立即暴露
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::InvalidConfigId(_)
                | Self::CircularDependency { .. }
                | Self::MissingDependency { .. }
                | Self::InvalidStorageType { .. }
        )
    }
}

impl From<serde_json::Error> for DataPipeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type DataPipeResult<T> = std::result::Result<T, DataPipeError>;
