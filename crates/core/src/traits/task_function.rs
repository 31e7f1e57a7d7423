//! 任务函数接口
//!
//! Task 只保存函数名，运行时通过 [`crate::FunctionRegistry`] 解析为
//! 实现了 [`TaskFunction`] 的对象。函数按输入数据节点的声明顺序接收输入值，
//! 按输出数据节点的声明顺序返回输出值。

use serde_json::Value;

/// 任务函数
///
/// 返回的 `Vec` 长度必须与 Task 的输出数量一致，否则 Job 以失败结束。
/// 函数一旦开始执行就会运行到结束，不支持中途抢占。
pub trait TaskFunction: Send + Sync {
    fn call(&self, inputs: Vec<Value>) -> anyhow::Result<Vec<Value>>;
}

impl<F> TaskFunction for F
where
    F: Fn(Vec<Value>) -> anyhow::Result<Vec<Value>> + Send + Sync,
{
    fn call(&self, inputs: Vec<Value>) -> anyhow::Result<Vec<Value>> {
        self(inputs)
    }
}
