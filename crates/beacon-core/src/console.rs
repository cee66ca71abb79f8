//! Console output types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobState};

/// A fragment of console output as persisted by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleChunk {
    /// Storage sequence key; chunks of one job are ordered by it.
    pub id: i64,
    pub job_id: JobId,
    pub data: String,
}

impl ConsoleChunk {
    /// A chunk standing for the complete stored console text of a finished job.
    pub fn full_log(job_id: JobId, log: String) -> Self {
        Self {
            id: 0,
            job_id,
            data: log,
        }
    }
}

/// Point-in-time view of a job's console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleSnapshot {
    pub job_id: JobId,
    pub state: JobState,
    /// Full console text, written once the job is terminal.
    pub log: Option<String>,
    pub ended_at: Option<DateTime<Utc>>,
}
