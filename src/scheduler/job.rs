use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Dispatched,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    ///
    /// `Pending -> Succeeded/Failed` is allowed because a fast worker can report
    /// completion before the distributor records the dispatch.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Dispatched)
                | (Pending, Succeeded)
                | (Pending, Failed)
                | (Dispatched, Succeeded)
                | (Dispatched, Failed)
                | (Dispatched, Pending)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Dispatched => write!(f, "dispatched"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What a submitter provides. Identity, status and timestamps are assigned on submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub command: String,
    #[serde(default, alias = "timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub priority: i32,
}

impl NewJob {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub command: String,
    #[serde(default)]
    pub timeout_secs: u64,
    pub status: JobStatus,
    #[serde(default)]
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dispatch_attempts: u32,
}

impl Job {
    pub fn new(command: String) -> Self {
        Self::from_request(NewJob::new(command))
    }

    pub fn from_request(req: NewJob) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: req.command,
            timeout_secs: req.timeout_secs,
            status: JobStatus::Pending,
            priority: req.priority,
            created_at: Utc::now(),
            assigned_worker: None,
            result: None,
            completed_at: None,
            dispatch_attempts: 0,
        }
    }

    /// Serialize the queue copy of this job.
    pub fn to_record(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_record(record: &str) -> serde_json::Result<Self> {
        serde_json::from_str(record)
    }
}
