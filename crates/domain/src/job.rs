//! Job 及其状态机

use std::fmt;

use chrono::{DateTime, Utc};
use datapipe_core::{DataPipeError, DataPipeResult, Entity, MODEL_VERSION};
use serde::{Deserialize, Serialize};

use crate::ids::{JobId, SubmitId, TaskId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
    Abandoned,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Skipped => "SKIPPED",
            JobStatus::Abandoned => "ABANDONED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::Cancelled
                | JobStatus::Skipped
                | JobStatus::Abandoned
        )
    }

    /// 状态机允许的转换
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Submitted, Pending | Skipped | Cancelled | Abandoned)
                | (Pending, Running | Skipped | Cancelled | Abandoned)
                | (Running, Completed | Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub task_id: TaskId,
    pub submit_id: SubmitId,
    /// 被提交的实体（任务、管道或场景）的ID
    pub submit_entity_id: String,
    pub status: JobStatus,
    pub force: bool,
    pub creation_date: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stacktrace: Vec<String>,
    pub version: String,
}

impl Job {
    pub fn new(
        task_config_id: &str,
        task_id: TaskId,
        submit_id: SubmitId,
        submit_entity_id: impl Into<String>,
        force: bool,
    ) -> Self {
        Self {
            id: JobId::generate(task_config_id),
            task_id,
            submit_id,
            submit_entity_id: submit_entity_id.into(),
            status: JobStatus::Submitted,
            force,
            creation_date: Utc::now(),
            started_at: None,
            completed_at: None,
            stacktrace: Vec::new(),
            version: MODEL_VERSION.to_string(),
        }
    }

    /// 执行一次状态转换，非法转换返回错误且不修改 Job
    pub fn transition(&mut self, next: JobStatus) -> DataPipeResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DataPipeError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        let now = Utc::now();
        if next == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    pub fn execution_duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some((completed - started).num_milliseconds()),
            _ => None,
        }
    }
}

impl Entity for Job {
    const ENTITY_NAME: &'static str = "job";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            "task_a",
            TaskId::new("TASK_task_a_1"),
            SubmitId::new_submission(),
            "TASK_task_a_1",
            false,
        )
    }

    #[test]
    fn test_happy_path_sets_timestamps() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Submitted);
        assert!(job.id.as_str().starts_with("JOB_task_a_"));

        job.transition(JobStatus::Pending).unwrap();
        job.transition(JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_none());

        job.transition(JobStatus::Completed).unwrap();
        assert!(job.is_finished());
        assert!(job.execution_duration_ms().is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Skipped,
            JobStatus::Abandoned,
        ] {
            for next in [JobStatus::Pending, JobStatus::Running, JobStatus::Completed, JobStatus::Abandoned] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_invalid_transition_leaves_job_untouched() {
        let mut job = job();
        let err = job.transition(JobStatus::Completed).unwrap_err();
        assert!(matches!(err, DataPipeError::InvalidStatusTransition { .. }));
        assert_eq!(job.status, JobStatus::Submitted);

        // RUNNING 不能被取消
        job.transition(JobStatus::Pending).unwrap();
        job.transition(JobStatus::Running).unwrap();
        assert!(job.transition(JobStatus::Cancelled).is_err());
        assert!(job.transition(JobStatus::Pending).is_err());
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&JobStatus::Abandoned).unwrap(), "\"ABANDONED\"");
    }
}
