//! In-memory store and notification source for tests.

use async_trait::async_trait;
use beacon_core::{
    AccessGrant, BuildId, BuildInfo, CommitInfo, ConsoleChunk, ConsoleSnapshot, JobId,
    JobSnapshot, JobState, Principal, ProjectId, ProjectInfo, UserId,
};
use beacon_db::{BuildStore, DbError, DbResult, NotificationSource, NotificationStream};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::seconds(seconds)
}

pub fn job(id: i64, project: i64, public: bool, state: JobState, updated: i64) -> JobSnapshot {
    JobSnapshot {
        id: JobId::new(id),
        state,
        stage: Some("test".to_string()),
        started_at: Some(at(0)),
        ended_at: state.is_terminal().then(|| at(updated)),
        updated_at: at(updated),
        build: BuildInfo {
            id: BuildId::new(id * 10),
            number: id,
            branch: Some("main".to_string()),
            created_at: at(0),
        },
        project: ProjectInfo {
            id: ProjectId::new(project),
            name: format!("project-{project}"),
            full_name: format!("acme/project-{project}"),
            public,
        },
        commit: CommitInfo {
            sha: format!("{id:040x}"),
            message: "Change things".to_string(),
            author: Some("dev".to_string()),
        },
        pull_request: None,
        source_upload: None,
    }
}

pub fn chunk(id: i64, job: i64, data: &str) -> ConsoleChunk {
    ConsoleChunk {
        id,
        job_id: JobId::new(job),
        data: data.to_string(),
    }
}

/// Query counters kept by [`MemoryStore`].
#[derive(Default)]
pub struct Queries {
    pub access: AtomicUsize,
    pub job_snapshot: AtomicUsize,
    pub active_jobs: AtomicUsize,
    pub console_snapshot: AtomicUsize,
    pub console_history: AtomicUsize,
    pub console_chunk: AtomicUsize,
}

impl Queries {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<JobId, JobSnapshot>>,
    logs: Mutex<HashMap<JobId, String>>,
    chunks: Mutex<HashMap<JobId, Vec<ConsoleChunk>>>,
    collaborators: Mutex<HashSet<(ProjectId, UserId)>>,
    pub queries: Queries,
    pub fail: AtomicBool,
    hold_history: AtomicBool,
    pub history_entered: Notify,
    pub history_release: Notify,
}

impl MemoryStore {
    pub fn put_job(&self, job: JobSnapshot) {
        self.jobs.lock().insert(job.id, job);
    }

    pub fn put_log(&self, job: i64, log: &str) {
        self.logs.lock().insert(JobId::new(job), log.to_string());
    }

    pub fn put_chunk(&self, chunk: ConsoleChunk) {
        self.chunks.lock().entry(chunk.job_id).or_default().push(chunk);
    }

    pub fn add_collaborator(&self, project: i64, user: i64) {
        self.collaborators
            .lock()
            .insert((ProjectId::new(project), UserId::new(user)));
    }

    /// Make the next `console_history` wait for `history_release` after
    /// signalling `history_entered`.
    pub fn hold_history(&self) {
        self.hold_history.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> DbResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DbError::InvalidRow("injected failure".to_string()));
        }
        Ok(())
    }

    fn grant(&self, project: &ProjectInfo, principal: Principal) -> AccessGrant {
        let collaborator = principal
            .user_id()
            .is_some_and(|user| self.collaborators.lock().contains(&(project.id, user)));
        AccessGrant {
            project_id: project.id,
            public: project.public,
            collaborator,
        }
    }

    fn visible(&self, project: &ProjectInfo, principal: Principal) -> bool {
        let grant = self.grant(project, principal);
        grant.public || grant.collaborator
    }
}

#[async_trait]
impl BuildStore for MemoryStore {
    async fn job_access(
        &self,
        job: JobId,
        principal: Principal,
    ) -> DbResult<Option<AccessGrant>> {
        self.queries.access.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let project = self.jobs.lock().get(&job).map(|job| job.project.clone());
        Ok(project.map(|project| self.grant(&project, principal)))
    }

    async fn project_access(
        &self,
        project: ProjectId,
        principal: Principal,
    ) -> DbResult<Option<AccessGrant>> {
        self.queries.access.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let info = self
            .jobs
            .lock()
            .values()
            .find(|job| job.project.id == project)
            .map(|job| job.project.clone());
        Ok(info.map(|info| self.grant(&info, principal)))
    }

    async fn job_snapshot(&self, job: JobId) -> DbResult<Option<JobSnapshot>> {
        self.queries.job_snapshot.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.jobs.lock().get(&job).cloned())
    }

    async fn active_jobs(&self, principal: Principal) -> DbResult<Vec<JobSnapshot>> {
        self.queries.active_jobs.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let jobs: Vec<JobSnapshot> = self.jobs.lock().values().cloned().collect();
        let mut active: Vec<JobSnapshot> = jobs
            .into_iter()
            .filter(|job| !job.is_terminal() && self.visible(&job.project, principal))
            .collect();
        active.sort_by_key(|job| (job.updated_at, job.id));
        Ok(active)
    }

    async fn console_snapshot(&self, job: JobId) -> DbResult<Option<ConsoleSnapshot>> {
        self.queries.console_snapshot.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let state = self.jobs.lock().get(&job).map(|job| (job.state, job.ended_at));
        Ok(state.map(|(state, ended_at)| ConsoleSnapshot {
            job_id: job,
            state,
            log: self.logs.lock().get(&job).cloned(),
            ended_at,
        }))
    }

    async fn console_history(&self, job: JobId) -> DbResult<Vec<ConsoleChunk>> {
        self.queries.console_history.fetch_add(1, Ordering::SeqCst);
        self.history_entered.notify_one();
        if self.hold_history.swap(false, Ordering::SeqCst) {
            self.history_release.notified().await;
        }
        self.check()?;
        Ok(self.chunks.lock().get(&job).cloned().unwrap_or_default())
    }

    async fn console_chunk(&self, id: i64) -> DbResult<Option<ConsoleChunk>> {
        self.queries.console_chunk.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self
            .chunks
            .lock()
            .values()
            .flatten()
            .find(|chunk| chunk.id == id)
            .cloned())
    }
}

enum Session {
    Fail,
    Payloads(Vec<String>),
}

/// Notification source replaying scripted sessions per channel. Each connect
/// consumes one session; once a channel's script runs out, its connections
/// stay open and silent until [`hang_up`](Self::hang_up).
#[derive(Default)]
pub struct ScriptedSource {
    sessions: Mutex<HashMap<String, VecDeque<Session>>>,
    connects: AtomicUsize,
    hang_up: Arc<Notify>,
}

impl ScriptedSource {
    pub fn push_failure(&self, channel: &str) {
        self.script(channel, Session::Fail);
    }

    /// A connection that delivers `payloads` and is then lost.
    pub fn push_session(&self, channel: &str, payloads: Vec<String>) {
        self.script(channel, Session::Payloads(payloads));
    }

    /// Drop every open silent connection.
    pub fn hang_up(&self) {
        self.hang_up.notify_waiters();
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn script(&self, channel: &str, session: Session) {
        self.sessions
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push_back(session);
    }
}

#[async_trait]
impl NotificationSource for ScriptedSource {
    async fn connect(&self, channel: &str) -> DbResult<NotificationStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let session = self
            .sessions
            .lock()
            .get_mut(channel)
            .and_then(VecDeque::pop_front);
        match session {
            Some(Session::Fail) => Err(DbError::Database(sqlx::Error::PoolTimedOut)),
            Some(Session::Payloads(payloads)) => {
                Ok(futures::stream::iter(payloads.into_iter().map(Ok)).boxed())
            }
            None => {
                let hang_up = self.hang_up.clone();
                Ok(futures::stream::once(async move { hang_up.notified().await })
                    .filter_map(|()| async { None::<DbResult<String>> })
                    .boxed())
            }
        }
    }
}
