//! Core domain types for the Beacon live build-event service.
//!
//! This crate contains:
//! - Entity identifiers
//! - Job snapshots, job states and job events
//! - Console chunks
//! - Change events decoded from store notifications
//! - Principals and access grants

pub mod access;
pub mod console;
pub mod error;
pub mod event;
pub mod id;
pub mod job;

pub use access::{AccessGrant, Principal};
pub use console::{ConsoleChunk, ConsoleSnapshot};
pub use error::{Error, Result};
pub use event::{ChangeEvent, ChangeKind, ChangePayload};
pub use id::{BuildId, JobId, ProjectId, UserId};
pub use job::{
    BuildInfo, CommitInfo, JobEvent, JobOp, JobSnapshot, JobState, ProjectInfo, PullRequestInfo,
    SourceUploadInfo,
};
