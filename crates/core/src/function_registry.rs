use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::{traits::TaskFunction, DataPipeError, DataPipeResult};

/// 任务函数注册表
///
/// 函数名到函数实现的映射。可以克隆，克隆后的实例共享同一张表。
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: Arc<RwLock<HashMap<String, Arc<dyn TaskFunction>>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: impl Into<String>, function: Arc<dyn TaskFunction>) {
        let name = name.into();
        debug!("注册任务函数: {}", name);
        let mut registry = self.functions.write().await;
        registry.insert(name, function);
    }

    /// 注册闭包形式的任务函数
    pub async fn register_fn<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(Vec<serde_json::Value>) -> anyhow::Result<Vec<serde_json::Value>>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, Arc::new(function)).await;
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn TaskFunction>> {
        let registry = self.functions.read().await;
        registry.get(name).cloned()
    }

    pub async fn resolve(&self, name: &str) -> DataPipeResult<Arc<dyn TaskFunction>> {
        self.get(name)
            .await
            .ok_or_else(|| DataPipeError::FunctionNotFound {
                name: name.to_string(),
            })
    }

    pub async fn contains(&self, name: &str) -> bool {
        let registry = self.functions.read().await;
        registry.contains_key(name)
    }

    pub async fn list_functions(&self) -> Vec<String> {
        let registry = self.functions.read().await;
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn unregister(&self, name: &str) -> bool {
        let mut registry = self.functions.write().await;
        registry.remove(name).is_some()
    }

    pub async fn count(&self) -> usize {
        let registry = self.functions.read().await;
        registry.len()
    }
}
