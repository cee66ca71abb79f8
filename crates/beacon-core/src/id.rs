//! Entity identifiers.
//!
//! Rows in the build store use serial integer keys. Each entity kind gets its
//! own newtype so a job id can never be passed where a project id is expected.

use derive_more::Display;
use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
        )]
        #[serde(transparent)]
        #[display("{_0}")]
        pub struct $name(i64);

        impl $name {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

entity_id!(
    /// Identifier of a single job (one executor run inside a build).
    JobId
);
entity_id!(
    /// Identifier of a build (a set of jobs for one commit).
    BuildId
);
entity_id!(
    /// Identifier of a project (repository).
    ProjectId
);
entity_id!(
    /// Identifier of an authenticated user.
    UserId
);
