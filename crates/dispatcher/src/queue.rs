//! 待执行 Job 队列
//!
//! 队列按提交顺序保存 PENDING 的 Job，同时记录已出队正在执行的 Job。
//! 出队时按顺序找到第一个满足条件的 Job：
//!
//! - 排在它前面的 Job（包括正在执行的）都不写它的输入，也不读写它的输出
//! - 它的输入没有被队列之外的编辑锁住
//!
//! 同一次提交内 Job 按拓扑序入队，因此下游 Job 总是等到上游写完之后才会出队。

use std::collections::{HashMap, HashSet, VecDeque};

use datapipe_application::DataManager;
use datapipe_core::DataPipeResult;
use datapipe_domain::{DataNodeId, JobId, SubmitId, Task};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// 队列中的一个 Job
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: JobId,
    pub submit_id: SubmitId,
    pub task: Task,
    pub force: bool,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedJob>,
    running: HashMap<JobId, QueuedJob>,
}

impl QueueState {
    fn claims(&self, id: &DataNodeId, except: Option<&JobId>) -> bool {
        self.pending
            .iter()
            .chain(self.running.values())
            .filter(|entry| Some(&entry.job_id) != except)
            .any(|entry| entry.task.output_ids.contains(id))
    }
}

#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, entry: QueuedJob) {
        self.state.lock().await.pending.push_back(entry);
        self.notify.notify_one();
    }

    /// 取出第一个可以执行的 Job 并标记为执行中
    pub async fn pop_ready(&self, data: &DataManager) -> DataPipeResult<Option<QueuedJob>> {
        let mut state = self.state.lock().await;

        let mut written: HashSet<DataNodeId> = HashSet::new();
        let mut read: HashSet<DataNodeId> = HashSet::new();
        for entry in state.running.values() {
            written.extend(entry.task.output_ids.iter().cloned());
            read.extend(entry.task.input_ids.iter().cloned());
        }

        let mut selected = None;
        for (index, entry) in state.pending.iter().enumerate() {
            let conflict = entry.task.input_ids.iter().any(|id| written.contains(id))
                || entry
                    .task
                    .output_ids
                    .iter()
                    .any(|id| written.contains(id) || read.contains(id));

            if !conflict && !Self::externally_locked(&state, entry, data).await? {
                selected = Some(index);
                break;
            }
            written.extend(entry.task.output_ids.iter().cloned());
            read.extend(entry.task.input_ids.iter().cloned());
        }

        let Some(entry) = selected.and_then(|index| state.pending.remove(index)) else {
            return Ok(None);
        };
        debug!("Job {} 出队", entry.job_id);
        state.running.insert(entry.job_id.clone(), entry.clone());
        Ok(Some(entry))
    }

    async fn externally_locked(
        state: &QueueState,
        entry: &QueuedJob,
        data: &DataManager,
    ) -> DataPipeResult<bool> {
        for id in &entry.task.input_ids {
            if state.claims(id, None) {
                continue;
            }
            if data.get(id).await?.edit_in_progress {
                debug!("Job {} 的输入 {} 被锁定，暂不执行", entry.job_id, id);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Job 执行结束后移出执行集合，唤醒等待的调度循环
    pub async fn finish(&self, job_id: &JobId) {
        self.state.lock().await.running.remove(job_id);
        self.notify.notify_one();
    }

    /// 从待执行列表中移除 Job（执行中的 Job 不受影响）
    pub async fn remove(&self, job_id: &JobId) -> Option<QueuedJob> {
        let mut state = self.state.lock().await;
        let index = state.pending.iter().position(|entry| &entry.job_id == job_id)?;
        let entry = state.pending.remove(index);
        self.notify.notify_one();
        entry
    }

    /// 移除同一次提交中直接或间接读取 `root` 输出的待执行 Job
    pub async fn take_dependents(&self, root: &QueuedJob) -> Vec<QueuedJob> {
        let mut state = self.state.lock().await;
        let mut produced: HashSet<DataNodeId> = root.task.output_ids.iter().cloned().collect();
        let mut taken = Vec::new();
        state.pending.retain(|entry| {
            let depends = entry.submit_id == root.submit_id
                && entry.task.input_ids.iter().any(|id| produced.contains(id));
            if depends {
                produced.extend(entry.task.output_ids.iter().cloned());
                taken.push(entry.clone());
            }
            !depends
        });
        taken
    }

    /// 清空待执行列表
    pub async fn drain_pending(&self) -> Vec<QueuedJob> {
        self.state.lock().await.pending.drain(..).collect()
    }

    /// 除 `except` 之外是否还有排队或执行中的 Job 会写入该数据节点
    pub async fn is_claimed(&self, id: &DataNodeId, except: &JobId) -> bool {
        self.state.lock().await.claims(id, Some(except))
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn running_len(&self) -> usize {
        self.state.lock().await.running.len()
    }

    pub async fn contains(&self, job_id: &JobId) -> bool {
        let state = self.state.lock().await;
        state.running.contains_key(job_id) || state.pending.iter().any(|e| &e.job_id == job_id)
    }

    /// 等待队列变化（入队、出队或 Job 结束）
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub fn wake(&self) {
        self.notify.notify_one();
    }
}
