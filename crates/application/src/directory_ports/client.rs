use async_trait::async_trait;
use tokio::sync::mpsc;

use dirsync_core::AppResult;

use super::DirectoryEvent;

/// Parameters of a subtree search for user entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySearchRequest {
    /// Search root DN.
    pub base: String,
    /// LDAP filter selecting user entries.
    pub filter: String,
    /// Attributes to return for each entry.
    pub attributes: Vec<String>,
}

/// Port for a bound directory connection.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Starts a subtree search and returns its event stream.
    ///
    /// Failing to start the search is an error. Failures after the search
    /// started arrive as [`DirectoryEvent::Error`] on the stream, which is
    /// terminated by [`DirectoryEvent::End`].
    async fn search(
        &self,
        request: &DirectorySearchRequest,
    ) -> AppResult<mpsc::Receiver<DirectoryEvent>>;

    /// Releases the directory connection.
    async fn close(&self) -> AppResult<()>;
}
