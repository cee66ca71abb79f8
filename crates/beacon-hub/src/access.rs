//! Subscription access checks.

use beacon_core::{AccessGrant, JobId, Principal, ProjectId};
use beacon_db::BuildStore;
use std::sync::Arc;
use tracing::warn;

/// Result of an access check.
///
/// Unknown entities, denied principals and failed lookups all come back as
/// `Hidden`, so a caller cannot tell a private entity from a missing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    Hidden,
}

impl Access {
    pub fn is_granted(self) -> bool {
        self == Access::Granted
    }

    /// Public projects are open to everyone; private ones to collaborators.
    pub fn decide(principal: Principal, grant: Option<&AccessGrant>) -> Self {
        match grant {
            Some(grant) if grant.public => Access::Granted,
            Some(grant) if grant.collaborator && principal.user_id().is_some() => Access::Granted,
            _ => Access::Hidden,
        }
    }
}

/// Decides whether a principal may see a job or project.
#[derive(Clone)]
pub struct AccessGate {
    store: Arc<dyn BuildStore>,
}

impl AccessGate {
    pub fn new(store: Arc<dyn BuildStore>) -> Self {
        Self { store }
    }

    pub async fn can_access(&self, principal: Principal, job: JobId) -> Access {
        match self.store.job_access(job, principal).await {
            Ok(grant) => Access::decide(principal, grant.as_ref()),
            Err(e) => {
                warn!(job_id = %job, principal = %principal, error = %e, "Access lookup failed");
                Access::Hidden
            }
        }
    }

    pub async fn can_access_project(
        &self,
        principal: Principal,
        project: ProjectId,
    ) -> Access {
        match self.store.project_access(project, principal).await {
            Ok(grant) => Access::decide(principal, grant.as_ref()),
            Err(e) => {
                warn!(project_id = %project, principal = %principal, error = %e, "Access lookup failed");
                Access::Hidden
            }
        }
    }
}
