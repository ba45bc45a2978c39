//! Directory user types and the persisted index record.

use dirsync_core::{AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Value of the `enable` field written for newly indexed users.
pub const ENABLED: u8 = 1;

/// Username used both as the `username` field and as the document id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(NonEmptyString);

impl Username {
    /// Creates a validated username.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        NonEmptyString::new(value).map(Self)
    }

    /// Returns the username string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Coarse authorization tier derived from group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Member of the configured admin group.
    Admin,
    /// Everyone else.
    Common,
}

impl Role {
    /// Returns the storage string for this role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Common => "common",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A user derived from one directory entry during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    /// Username taken from the configured identity attribute.
    pub username: Username,
    /// Role computed from group membership.
    pub role: Role,
}

/// Document stored in the user index, keyed by `username`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedUser {
    /// Username, identical to the document id.
    pub username: Username,
    /// Current role.
    pub role: Role,
    /// Enabled flag, `1` when the user may log in.
    pub enable: u8,
}

impl IndexedUser {
    /// Builds the document written the first time a username is seen.
    #[must_use]
    pub fn enabled(user: &DirectoryUser) -> Self {
        Self {
            username: user.username.clone(),
            role: user.role,
            enable: ENABLED,
        }
    }
}
