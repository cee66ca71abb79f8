//! Store-backed stream sources for single-job and console subscriptions.

use async_trait::async_trait;
use beacon_core::{ConsoleChunk, JobEvent, JobId};
use beacon_db::{BuildStore, DbResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::channel::{Bootstrap, StreamSource};

/// Updates of one job, ending with its terminal update.
pub struct JobEvents {
    store: Arc<dyn BuildStore>,
}

impl JobEvents {
    pub fn new(store: Arc<dyn BuildStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StreamSource for JobEvents {
    type Key = JobId;
    type Item = JobEvent;
    type Position = DateTime<Utc>;

    const NAME: &'static str = "job";

    fn position(item: &JobEvent) -> DateTime<Utc> {
        item.job().updated_at
    }

    fn is_terminal(item: &JobEvent) -> bool {
        item.job().is_terminal()
    }

    async fn bootstrap(&self, job: JobId) -> DbResult<Bootstrap<JobEvent>> {
        let Some(snapshot) = self.store.job_snapshot(job).await? else {
            return Ok(Bootstrap::NotFound);
        };
        let terminal = snapshot.is_terminal();
        let history = vec![JobEvent::Insert(snapshot)];
        Ok(if terminal {
            Bootstrap::Terminal(history)
        } else {
            Bootstrap::Live(history)
        })
    }

    /// The current snapshot as an update of the cached job.
    async fn refresh(&self, job: JobId) -> DbResult<Bootstrap<JobEvent>> {
        let Some(snapshot) = self.store.job_snapshot(job).await? else {
            return Ok(Bootstrap::NotFound);
        };
        let terminal = snapshot.is_terminal();
        let events = vec![JobEvent::Update(snapshot)];
        Ok(if terminal {
            Bootstrap::Terminal(events)
        } else {
            Bootstrap::Live(events)
        })
    }
}

/// Console output of one job.
///
/// A finished job is served as a single chunk carrying its stored log; the
/// chunk history is only read for jobs that are still running.
pub struct ConsoleEvents {
    store: Arc<dyn BuildStore>,
}

impl ConsoleEvents {
    pub fn new(store: Arc<dyn BuildStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StreamSource for ConsoleEvents {
    type Key = JobId;
    type Item = ConsoleChunk;
    type Position = i64;

    const NAME: &'static str = "console";

    fn position(item: &ConsoleChunk) -> i64 {
        item.id
    }

    // Console completion comes from the job's terminal update.
    fn is_terminal(_: &ConsoleChunk) -> bool {
        false
    }

    async fn bootstrap(&self, job: JobId) -> DbResult<Bootstrap<ConsoleChunk>> {
        let Some(snapshot) = self.store.console_snapshot(job).await? else {
            return Ok(Bootstrap::NotFound);
        };
        if snapshot.state.is_terminal() {
            let log = snapshot.log.unwrap_or_default();
            return Ok(Bootstrap::Terminal(vec![ConsoleChunk::full_log(job, log)]));
        }
        let history = self.store.console_history(job).await?;
        Ok(Bootstrap::Live(history))
    }

    /// The stored chunks, even once the job is over, so a running cache can
    /// pick up the tail it missed.
    async fn refresh(&self, job: JobId) -> DbResult<Bootstrap<ConsoleChunk>> {
        let Some(snapshot) = self.store.console_snapshot(job).await? else {
            return Ok(Bootstrap::NotFound);
        };
        let history = self.store.console_history(job).await?;
        Ok(if snapshot.state.is_terminal() {
            Bootstrap::Terminal(history)
        } else {
            Bootstrap::Live(history)
        })
    }
}
