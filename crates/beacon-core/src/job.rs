//! Job snapshots and job events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{BuildId, Error, JobId, ProjectId};

/// Lifecycle state of a job as recorded by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Scheduled,
    Running,
    Finished,
    Failure,
    Error,
    Killed,
    Skipped,
}

impl JobState {
    /// No further transitions happen from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Finished
                | JobState::Failure
                | JobState::Error
                | JobState::Killed
                | JobState::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Scheduled => "scheduled",
            JobState::Running => "running",
            JobState::Finished => "finished",
            JobState::Failure => "failure",
            JobState::Error => "error",
            JobState::Killed => "killed",
            JobState::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "scheduled" => Ok(JobState::Scheduled),
            "running" => Ok(JobState::Running),
            "finished" => Ok(JobState::Finished),
            "failure" => Ok(JobState::Failure),
            "error" => Ok(JobState::Error),
            "killed" => Ok(JobState::Killed),
            "skipped" => Ok(JobState::Skipped),
            other => Err(Error::UnknownState(other.to_string())),
        }
    }
}

/// Denormalized view of a job together with its build context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub state: JobState,
    /// Executor-defined stage name (e.g. "test", "deploy").
    #[serde(default)]
    pub stage: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Last modification time; orders snapshots of the same job.
    pub updated_at: DateTime<Utc>,
    pub build: BuildInfo,
    pub project: ProjectInfo,
    pub commit: CommitInfo,
    #[serde(default)]
    pub pull_request: Option<PullRequestInfo>,
    #[serde(default)]
    pub source_upload: Option<SourceUploadInfo>,
}

impl JobSnapshot {
    pub fn project_id(&self) -> ProjectId {
        self.project.id
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub id: BuildId,
    pub number: i64,
    pub branch: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: ProjectId,
    pub name: String,
    pub full_name: String,
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: i64,
    pub title: String,
}

/// Present when the build was started from an uploaded source archive rather
/// than a commit push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUploadInfo {
    pub id: i64,
    pub filename: String,
}

/// Row operation that produced a job notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobOp {
    Insert,
    Update,
}

/// Event delivered to job subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "UPPERCASE")]
pub enum JobEvent {
    Insert(JobSnapshot),
    Update(JobSnapshot),
}

impl JobEvent {
    pub fn new(op: JobOp, job: JobSnapshot) -> Self {
        match op {
            JobOp::Insert => JobEvent::Insert(job),
            JobOp::Update => JobEvent::Update(job),
        }
    }

    pub fn job(&self) -> &JobSnapshot {
        match self {
            JobEvent::Insert(job) | JobEvent::Update(job) => job,
        }
    }

    pub fn op(&self) -> JobOp {
        match self {
            JobEvent::Insert(_) => JobOp::Insert,
            JobEvent::Update(_) => JobOp::Update,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sample_job(id: i64, state: JobState) -> JobSnapshot {
        JobSnapshot {
            id: JobId::new(id),
            state,
            stage: Some("test".to_string()),
            started_at: None,
            ended_at: None,
            updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            build: BuildInfo {
                id: BuildId::new(1),
                number: 3,
                branch: Some("main".to_string()),
                created_at: Utc.with_ymd_and_hms(2024, 5, 1, 11, 59, 0).unwrap(),
            },
            project: ProjectInfo {
                id: ProjectId::new(9),
                name: "beacon".to_string(),
                full_name: "acme/beacon".to_string(),
                public: true,
            },
            commit: CommitInfo {
                sha: "abc123".to_string(),
                message: "Fix the thing".to_string(),
                author: Some("dev".to_string()),
            },
            pull_request: None,
            source_upload: None,
        }
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = [
            JobState::Queued,
            JobState::Scheduled,
            JobState::Running,
            JobState::Finished,
            JobState::Failure,
            JobState::Error,
            JobState::Killed,
            JobState::Skipped,
        ]
        .into_iter()
        .filter(JobState::is_terminal)
        .map(|s| s.as_str())
        .collect();

        assert_eq!(
            terminal,
            vec!["finished", "failure", "error", "killed", "skipped"]
        );
    }

    #[test]
    fn test_state_round_trips_through_str() {
        assert_eq!("running".parse::<JobState>().unwrap(), JobState::Running);
        assert!("bogus".parse::<JobState>().is_err());
    }

    #[test]
    fn test_event_wire_shape() {
        let event = JobEvent::Insert(sample_job(5, JobState::Queued));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "INSERT");
        assert_eq!(value["data"]["id"], 5);
        assert_eq!(value["data"]["state"], "queued");
    }
}
