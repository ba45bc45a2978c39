use crate::SearchOutcome;

/// Result of writing one user to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No document existed and a new one was indexed.
    Created,
    /// An existing document had its role updated.
    Updated,
}

impl UpsertOutcome {
    /// Returns the log label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }
}

/// Counters collected over one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Directory entries received.
    pub entries: u64,
    /// Entries without a username.
    pub skipped: u64,
    /// Documents created.
    pub created: u64,
    /// Documents whose role was updated.
    pub updated: u64,
    /// Users whose write failed.
    pub failed: u64,
    /// Referrals received.
    pub referrals: u64,
    /// Errors reported by the directory during the search.
    pub search_errors: u64,
    /// Final search status, `None` when the stream closed without one.
    pub outcome: Option<SearchOutcome>,
}

impl ReconcileReport {
    pub(super) fn record_write(&mut self, outcome: Option<UpsertOutcome>) {
        match outcome {
            Some(UpsertOutcome::Created) => self.created = self.created.saturating_add(1),
            Some(UpsertOutcome::Updated) => self.updated = self.updated.saturating_add(1),
            None => self.failed = self.failed.saturating_add(1),
        }
    }

    /// Returns whether any write failed or the search reported a problem.
    #[must_use]
    pub fn has_problems(&self) -> bool {
        self.failed > 0
            || self.search_errors > 0
            || !self
                .outcome
                .as_ref()
                .is_some_and(SearchOutcome::is_success)
    }
}
