use dirsync_domain::DirectoryEntry;

/// Final status reported by the directory when a search completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    /// LDAP result code, `0` on success.
    pub code: u32,
    /// Diagnostic message returned with the result code.
    pub message: String,
}

impl SearchOutcome {
    /// Returns whether the directory reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// One event of a directory search, in the order the directory produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    /// A matching entry.
    Entry(DirectoryEntry),
    /// A search result reference pointing at other servers.
    Referral(Vec<String>),
    /// An error raised while the search was running.
    Error(String),
    /// The search finished. No events follow.
    End(SearchOutcome),
}
