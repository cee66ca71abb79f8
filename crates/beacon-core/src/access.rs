//! Principals and project visibility.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{ProjectId, UserId};

/// Who is asking for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Principal {
    #[display("anonymous")]
    Anonymous,
    #[display("user:{_0}")]
    User(UserId),
}

impl Principal {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Principal::Anonymous => None,
            Principal::User(id) => Some(*id),
        }
    }
}

impl From<Option<UserId>> for Principal {
    fn from(user: Option<UserId>) -> Self {
        user.map_or(Principal::Anonymous, Principal::User)
    }
}

/// Visibility facts about the project owning an entity, resolved for one
/// principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub project_id: ProjectId,
    pub public: bool,
    /// Whether the principal is recorded as a collaborator. Always false for
    /// anonymous principals.
    pub collaborator: bool,
}
