//! Read-side store queries used by the distribution hub.

use async_trait::async_trait;
use beacon_core::{
    AccessGrant, BuildId, BuildInfo, CommitInfo, ConsoleChunk, ConsoleSnapshot, JobId,
    JobSnapshot, JobState, Principal, ProjectId, ProjectInfo, PullRequestInfo, SourceUploadInfo,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// Point-in-time queries against the build store.
///
/// Every method returns `Ok(None)` (or an empty list) for rows that do not
/// exist; errors are reserved for the store itself failing.
#[async_trait]
pub trait BuildStore: Send + Sync + 'static {
    /// Visibility of the project owning `job`, resolved for `principal`.
    async fn job_access(&self, job: JobId, principal: Principal)
    -> DbResult<Option<AccessGrant>>;

    /// Visibility of `project`, resolved for `principal`.
    async fn project_access(
        &self,
        project: ProjectId,
        principal: Principal,
    ) -> DbResult<Option<AccessGrant>>;

    /// Current snapshot of one job.
    async fn job_snapshot(&self, job: JobId) -> DbResult<Option<JobSnapshot>>;

    /// Non-terminal jobs visible to `principal`, oldest `updated_at` first.
    async fn active_jobs(&self, principal: Principal) -> DbResult<Vec<JobSnapshot>>;

    /// State and stored log of one job.
    async fn console_snapshot(&self, job: JobId) -> DbResult<Option<ConsoleSnapshot>>;

    /// Console chunks recorded so far, in storage order.
    async fn console_history(&self, job: JobId) -> DbResult<Vec<ConsoleChunk>>;

    /// One stored console chunk.
    async fn console_chunk(&self, id: i64) -> DbResult<Option<ConsoleChunk>>;
}

const JOB_SELECT: &str = r#"
    SELECT j.id, j.state, j.stage, j.started_at, j.ended_at, j.updated_at,
           b.id AS build_id, b.number AS build_number, b.branch,
           b.created_at AS build_created_at,
           p.id AS project_id, p.name AS project_name,
           p.full_name AS project_full_name, p.public AS project_public,
           b.commit_sha, b.commit_message, b.commit_author,
           b.pr_number, b.pr_title,
           u.id AS upload_id, u.filename AS upload_filename
    FROM jobs j
    JOIN builds b ON b.id = j.build_id
    JOIN projects p ON p.id = b.project_id
    LEFT JOIN source_uploads u ON u.id = b.source_upload_id
"#;

const TERMINAL_STATES: &str = "('finished', 'failure', 'error', 'killed', 'skipped')";

/// A flattened job row as returned by [`JOB_SELECT`].
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    state: String,
    stage: Option<String>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    build_id: i64,
    build_number: i64,
    branch: Option<String>,
    build_created_at: DateTime<Utc>,
    project_id: i64,
    project_name: String,
    project_full_name: String,
    project_public: bool,
    commit_sha: String,
    commit_message: String,
    commit_author: Option<String>,
    pr_number: Option<i64>,
    pr_title: Option<String>,
    upload_id: Option<i64>,
    upload_filename: Option<String>,
}

impl TryFrom<JobRow> for JobSnapshot {
    type Error = DbError;

    fn try_from(row: JobRow) -> DbResult<Self> {
        let state: JobState = row.state.parse()?;
        Ok(JobSnapshot {
            id: JobId::new(row.id),
            state,
            stage: row.stage,
            started_at: row.started_at,
            ended_at: row.ended_at,
            updated_at: row.updated_at,
            build: BuildInfo {
                id: BuildId::new(row.build_id),
                number: row.build_number,
                branch: row.branch,
                created_at: row.build_created_at,
            },
            project: ProjectInfo {
                id: ProjectId::new(row.project_id),
                name: row.project_name,
                full_name: row.project_full_name,
                public: row.project_public,
            },
            commit: CommitInfo {
                sha: row.commit_sha,
                message: row.commit_message,
                author: row.commit_author,
            },
            pull_request: row.pr_number.map(|number| PullRequestInfo {
                number,
                title: row.pr_title.unwrap_or_default(),
            }),
            source_upload: row.upload_id.map(|id| SourceUploadInfo {
                id,
                filename: row.upload_filename.unwrap_or_default(),
            }),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccessRow {
    project_id: i64,
    public: bool,
    collaborator: bool,
}

impl From<AccessRow> for AccessGrant {
    fn from(row: AccessRow) -> Self {
        AccessGrant {
            project_id: ProjectId::new(row.project_id),
            public: row.public,
            collaborator: row.collaborator,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConsoleRow {
    id: i64,
    state: String,
    log: Option<String>,
    ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct ChunkRow {
    id: i64,
    job_id: i64,
    data: String,
}

impl From<ChunkRow> for ConsoleChunk {
    fn from(row: ChunkRow) -> Self {
        ConsoleChunk {
            id: row.id,
            job_id: JobId::new(row.job_id),
            data: row.data,
        }
    }
}

/// PostgreSQL implementation of BuildStore.
pub struct PgBuildStore {
    pool: PgPool,
}

impl PgBuildStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildStore for PgBuildStore {
    async fn job_access(
        &self,
        job: JobId,
        principal: Principal,
    ) -> DbResult<Option<AccessGrant>> {
        let row = sqlx::query_as::<_, AccessRow>(
            r#"
            SELECT p.id AS project_id, p.public,
                   EXISTS (
                       SELECT 1 FROM project_collaborators c
                       WHERE c.project_id = p.id AND c.user_id = $2
                   ) AS collaborator
            FROM jobs j
            JOIN builds b ON b.id = j.build_id
            JOIN projects p ON p.id = b.project_id
            WHERE j.id = $1
            "#,
        )
        .bind(job.get())
        .bind(principal.user_id().map(i64::from))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AccessGrant::from))
    }

    async fn project_access(
        &self,
        project: ProjectId,
        principal: Principal,
    ) -> DbResult<Option<AccessGrant>> {
        let row = sqlx::query_as::<_, AccessRow>(
            r#"
            SELECT p.id AS project_id, p.public,
                   EXISTS (
                       SELECT 1 FROM project_collaborators c
                       WHERE c.project_id = p.id AND c.user_id = $2
                   ) AS collaborator
            FROM projects p
            WHERE p.id = $1
            "#,
        )
        .bind(project.get())
        .bind(principal.user_id().map(i64::from))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AccessGrant::from))
    }

    async fn job_snapshot(&self, job: JobId) -> DbResult<Option<JobSnapshot>> {
        let sql = format!("{JOB_SELECT} WHERE j.id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job.get())
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobSnapshot::try_from).transpose()
    }

    async fn active_jobs(&self, principal: Principal) -> DbResult<Vec<JobSnapshot>> {
        let sql = format!(
            r#"{JOB_SELECT}
            WHERE j.state NOT IN {TERMINAL_STATES}
              AND (p.public OR EXISTS (
                  SELECT 1 FROM project_collaborators c
                  WHERE c.project_id = p.id AND c.user_id = $1
              ))
            ORDER BY j.updated_at ASC, j.id ASC
            "#
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(principal.user_id().map(i64::from))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(JobSnapshot::try_from).collect()
    }

    async fn console_snapshot(&self, job: JobId) -> DbResult<Option<ConsoleSnapshot>> {
        let row = sqlx::query_as::<_, ConsoleRow>(
            "SELECT id, state, log, ended_at FROM jobs WHERE id = $1",
        )
        .bind(job.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> DbResult<ConsoleSnapshot> {
            Ok(ConsoleSnapshot {
                job_id: JobId::new(row.id),
                state: row.state.parse()?,
                log: row.log,
                ended_at: row.ended_at,
            })
        })
        .transpose()
    }

    async fn console_history(&self, job: JobId) -> DbResult<Vec<ConsoleChunk>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            r#"
            SELECT id, job_id, data
            FROM console_chunks
            WHERE job_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(job.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ConsoleChunk::from).collect())
    }

    async fn console_chunk(&self, id: i64) -> DbResult<Option<ConsoleChunk>> {
        let row = sqlx::query_as::<_, ChunkRow>(
            "SELECT id, job_id, data FROM console_chunks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ConsoleChunk::from))
    }
}
