//! Directory-to-index reconciliation service.
//!
//! Consumes the event stream of one directory search, derives a user and
//! role from every entry, and upserts it into the user index. Writes for
//! different usernames run concurrently up to a configured bound, while
//! writes for the same username run one after another in arrival order.
//!
//! A repeated username holds up the dispatcher until the earlier write for
//! it finishes, so entries behind it wait as well.

mod report;
mod settings;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use dirsync_core::{AppError, AppResult};
use dirsync_domain::{DirectoryEntry, DirectoryUser, IndexedUser, Username, map_entry};

use crate::{DirectoryClient, DirectoryEvent, DirectorySearchRequest, UserIndex};

pub use report::{ReconcileReport, UpsertOutcome};
pub use settings::ReconcileSettings;

/// Application service reconciling directory users into the user index.
#[derive(Clone)]
pub struct ReconcileService {
    user_index: Arc<dyn UserIndex>,
    settings: Arc<ReconcileSettings>,
}

impl ReconcileService {
    /// Creates a new reconcile service.
    #[must_use]
    pub fn new(user_index: Arc<dyn UserIndex>, settings: ReconcileSettings) -> Self {
        Self {
            user_index,
            settings: Arc::new(settings),
        }
    }

    /// Builds the subtree search request projecting the mapped attributes.
    #[must_use]
    pub fn search_request(
        &self,
        base: impl Into<String>,
        filter: impl Into<String>,
    ) -> DirectorySearchRequest {
        DirectorySearchRequest {
            base: base.into(),
            filter: filter.into(),
            attributes: self.settings.projected_attributes(),
        }
    }

    /// Derives the user and role of one entry.
    #[must_use]
    pub fn map_entry(&self, entry: &DirectoryEntry) -> Option<DirectoryUser> {
        map_entry(
            entry,
            self.settings.username_field.as_str(),
            self.settings.admin_group.as_str(),
            self.settings.membership_field.as_str(),
            self.settings.group_match,
        )
    }

    /// Inserts the user when no document matches its username, otherwise
    /// updates only the role of the existing document.
    ///
    /// A create rejected because the document id is taken falls back to the
    /// role update, so an existing document is never replaced.
    pub async fn upsert(&self, user: &DirectoryUser) -> AppResult<UpsertOutcome> {
        let existing = self.user_index.count_by_username(&user.username).await?;

        if existing == 0 {
            match self
                .user_index
                .create_user(&IndexedUser::enabled(user))
                .await
            {
                Ok(()) => return Ok(UpsertOutcome::Created),
                Err(AppError::Conflict(message)) => {
                    debug!(
                        username = %user.username,
                        conflict = %message,
                        "user document already exists, updating role"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        self.user_index
            .update_role(&user.username, user.role)
            .await?;
        Ok(UpsertOutcome::Updated)
    }

    /// Runs one search against the directory and reconciles its results.
    ///
    /// Only a failure to start the search is returned as an error.
    pub async fn synchronize(
        &self,
        directory: &dyn DirectoryClient,
        request: &DirectorySearchRequest,
    ) -> AppResult<ReconcileReport> {
        info!(
            search_base = %request.base,
            search_filter = %request.filter,
            attributes = ?request.attributes,
            "starting directory search"
        );

        let events = directory.search(request).await?;
        Ok(self.run(events).await)
    }

    /// Consumes directory events until the search ends, then waits for every
    /// scheduled write to finish.
    pub async fn run(&self, mut events: mpsc::Receiver<DirectoryEvent>) -> ReconcileReport {
        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_writes.max(1)));
        let mut username_locks = UsernameLocks::new();
        let mut in_flight = JoinSet::new();
        let mut report = ReconcileReport::default();

        while let Some(event) = events.recv().await {
            match event {
                DirectoryEvent::Entry(entry) => {
                    report.entries = report.entries.saturating_add(1);

                    let Some(user) = self.map_entry(&entry) else {
                        report.skipped = report.skipped.saturating_add(1);
                        debug!(
                            dn = %entry.dn(),
                            username_field = %self.settings.username_field,
                            "skipping directory entry without username"
                        );
                        continue;
                    };

                    info!(
                        dn = %entry.dn(),
                        username = %user.username,
                        role = %user.role,
                        "resolved directory user"
                    );

                    let lock = username_locks
                        .entry(user.username.clone())
                        .or_default()
                        .clone();
                    // Taken here, in arrival order, so a later entry for the
                    // same username cannot overtake an earlier one.
                    let sequenced = lock.lock_owned().await;
                    let permit = match permits.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(error) => {
                            report.record_write(None);
                            warn!(
                                username = %user.username,
                                error = %error,
                                "failed to schedule user write"
                            );
                            continue;
                        }
                    };

                    in_flight.spawn(self.clone().write_user(user, sequenced, permit));

                    while let Some(joined) = in_flight.try_join_next() {
                        record_joined(&mut report, &mut username_locks, joined);
                    }
                }
                DirectoryEvent::Referral(uris) => {
                    report.referrals = report.referrals.saturating_add(1);
                    info!(uris = %uris.join(","), "directory returned a referral");
                }
                DirectoryEvent::Error(message) => {
                    report.search_errors = report.search_errors.saturating_add(1);
                    warn!(error = %message, "directory search reported an error");
                }
                DirectoryEvent::End(outcome) => {
                    if outcome.is_success() {
                        info!(status = outcome.code, "directory search finished");
                    } else {
                        warn!(
                            status = outcome.code,
                            message = %outcome.message,
                            "directory search finished with a non-success status"
                        );
                    }
                    report.outcome = Some(outcome);
                    break;
                }
            }
        }

        if report.outcome.is_none() {
            warn!("directory event stream closed before the search finished");
        }

        while let Some(joined) = in_flight.join_next().await {
            record_joined(&mut report, &mut username_locks, joined);
        }

        report
    }

    async fn write_user(
        self,
        user: DirectoryUser,
        _sequenced: OwnedMutexGuard<()>,
        _permit: OwnedSemaphorePermit,
    ) -> (Username, Option<UpsertOutcome>) {
        let outcome = match self.upsert(&user).await {
            Ok(outcome) => {
                info!(
                    username = %user.username,
                    role = %user.role,
                    outcome = outcome.as_str(),
                    "indexed user"
                );
                Some(outcome)
            }
            Err(error) => {
                warn!(
                    username = %user.username,
                    role = %user.role,
                    error = %error,
                    "failed to index user"
                );
                None
            }
        };

        (user.username, outcome)
    }
}

type UsernameLocks = HashMap<Username, Arc<Mutex<()>>>;

fn record_joined(
    report: &mut ReconcileReport,
    locks: &mut UsernameLocks,
    joined: Result<(Username, Option<UpsertOutcome>), JoinError>,
) {
    match joined {
        Ok((username, outcome)) => {
            release_idle_lock(locks, &username);
            report.record_write(outcome);
        }
        Err(error) => {
            warn!(error = %error, "user write task did not complete");
            report.record_write(None);
        }
    }
}

/// Drops the lock of `username` once no write holds or awaits it.
fn release_idle_lock(locks: &mut UsernameLocks, username: &Username) {
    if locks
        .get(username)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(username);
    }
}
