use async_trait::async_trait;

use dirsync_core::AppResult;
use dirsync_domain::{IndexedUser, Role, Username};

/// Port for the document store holding indexed users.
///
/// Documents are addressed by id, and the id of a user document is always
/// its `username` value.
#[async_trait]
pub trait UserIndex: Send + Sync {
    /// Counts documents whose `username` field equals the given username.
    async fn count_by_username(&self, username: &Username) -> AppResult<u64>;

    /// Writes a full document at id `user.username`.
    ///
    /// Never replaces an existing document: fails with
    /// [`AppError::Conflict`](dirsync_core::AppError::Conflict) when the id
    /// is already taken.
    async fn create_user(&self, user: &IndexedUser) -> AppResult<()>;

    /// Updates only the `role` field of the document at id `username`.
    async fn update_role(&self, username: &Username, role: Role) -> AppResult<()>;
}
