use std::time::Duration;

use async_trait::async_trait;
use ldap3::adapters::{Adapter, PagedResults};
use ldap3::{
    Ldap, LdapConnAsync, LdapConnSettings, LdapError, ResultEntry, Scope, SearchEntry,
    SearchStream, parse_refs,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use dirsync_application::{DirectoryClient, DirectoryEvent, DirectorySearchRequest, SearchOutcome};
use dirsync_core::{AppError, AppResult};
use dirsync_domain::DirectoryEntry;

/// Result code returned by a bind with wrong credentials.
const INVALID_CREDENTIALS: u32 = 49;

/// Events buffered between the search driver and the reconciler.
const EVENT_BUFFER: usize = 256;

type UserSearchStream = SearchStream<'static, String, Vec<String>>;

/// Connection settings for the directory.
#[derive(Clone)]
pub struct LdapSettings {
    /// Directory URL, or a bare `host:port` for plain LDAP.
    pub url: String,
    /// Bind identity.
    pub bind_dn: String,
    /// Bind secret.
    pub bind_credentials: String,
    /// Paged-results page size, `0` disables paging.
    pub page_size: u32,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for LdapSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LdapSettings")
            .field("url", &self.url)
            .field("bind_dn", &self.bind_dn)
            .field("bind_credentials", &"***REDACTED***")
            .field("page_size", &self.page_size)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Directory client over a single bound LDAP connection.
pub struct LdapDirectoryClient {
    ldap: Ldap,
    page_size: u32,
}

impl LdapDirectoryClient {
    /// Connects to the directory and performs a simple bind.
    pub async fn connect(settings: &LdapSettings) -> AppResult<Self> {
        let url = normalize_ldap_url(settings.url.as_str());
        debug!(url = %url, "connecting to directory");

        let connection_settings = LdapConnSettings::new().set_conn_timeout(settings.connect_timeout);
        let (connection, mut ldap) = LdapConnAsync::with_settings(connection_settings, &url)
            .await
            .map_err(|error| {
                AppError::Unavailable(format!("failed to connect to directory at {url}: {error}"))
            })?;

        tokio::spawn(async move {
            if let Err(error) = connection.drive().await {
                warn!(error = %error, "directory connection driver stopped");
            }
        });

        let result = ldap
            .simple_bind(settings.bind_dn.as_str(), settings.bind_credentials.as_str())
            .await
            .map_err(|error| {
                AppError::Unavailable(format!(
                    "directory bind failed for '{}': {error}",
                    settings.bind_dn
                ))
            })?;
        check_bind_result(settings.bind_dn.as_str(), result.rc, result.text.as_str())?;

        info!(url = %url, bind_dn = %settings.bind_dn, "bound to directory");

        Ok(Self {
            ldap,
            page_size: settings.page_size,
        })
    }

    fn search_adapters(&self) -> Vec<Box<dyn Adapter<'static, String, Vec<String>>>> {
        if self.page_size == 0 {
            return Vec::new();
        }

        let page_size = i32::try_from(self.page_size).unwrap_or(i32::MAX);
        vec![Box::new(PagedResults::new(page_size))]
    }
}

#[async_trait]
impl DirectoryClient for LdapDirectoryClient {
    async fn search(
        &self,
        request: &DirectorySearchRequest,
    ) -> AppResult<mpsc::Receiver<DirectoryEvent>> {
        let mut ldap = self.ldap.clone();
        let stream = ldap
            .streaming_search_with(
                self.search_adapters(),
                request.base.as_str(),
                Scope::Subtree,
                request.filter.as_str(),
                request.attributes.clone(),
            )
            .await
            .map_err(|error| {
                AppError::Unavailable(format!(
                    "failed to start directory search under '{}': {error}",
                    request.base
                ))
            })?;

        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(forward_search_events(stream, sender));

        Ok(receiver)
    }

    async fn close(&self) -> AppResult<()> {
        self.ldap
            .clone()
            .unbind()
            .await
            .map_err(|error| AppError::Unavailable(format!("directory unbind failed: {error}")))
    }
}

/// What the forwarder does with one item read from the search stream.
#[derive(Debug, PartialEq, Eq)]
enum StreamStep {
    /// Nothing to forward, keep reading.
    Skip,
    /// Forward the event and keep reading.
    Forward(DirectoryEvent),
    /// Forward the event, then stop reading and report the final status.
    Abort(DirectoryEvent),
    /// The stream is drained.
    Exhausted,
}

fn stream_step(next: Result<Option<ResultEntry>, LdapError>) -> StreamStep {
    match next {
        Ok(Some(result_entry)) if result_entry.is_intermediate() => StreamStep::Skip,
        Ok(Some(result_entry)) if result_entry.is_ref() => {
            StreamStep::Forward(DirectoryEvent::Referral(parse_refs(result_entry.0)))
        }
        Ok(Some(result_entry)) => StreamStep::Forward(DirectoryEvent::Entry(directory_entry(
            SearchEntry::construct(result_entry),
        ))),
        Ok(None) => StreamStep::Exhausted,
        Err(error) => StreamStep::Abort(DirectoryEvent::Error(error.to_string())),
    }
}

async fn forward_search_events(mut stream: UserSearchStream, sender: mpsc::Sender<DirectoryEvent>) {
    loop {
        let (event, keep_reading) = match stream_step(stream.next().await) {
            StreamStep::Skip => continue,
            StreamStep::Forward(event) => (event, true),
            StreamStep::Abort(event) => (event, false),
            StreamStep::Exhausted => break,
        };

        if sender.send(event).await.is_err() {
            debug!("directory event receiver dropped, stopping search forwarding");
            return;
        }
        if !keep_reading {
            break;
        }
    }

    let result = stream.finish().await;
    let outcome = SearchOutcome {
        code: result.rc,
        message: result.text,
    };
    if sender.send(DirectoryEvent::End(outcome)).await.is_err() {
        debug!("directory event receiver dropped before end of search");
    }
}

fn directory_entry(entry: SearchEntry) -> DirectoryEntry {
    DirectoryEntry::new(entry.dn, entry.attrs)
}

fn normalize_ldap_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("ldap://{trimmed}")
    }
}

fn check_bind_result(bind_dn: &str, code: u32, text: &str) -> AppResult<()> {
    match code {
        0 => Ok(()),
        INVALID_CREDENTIALS => Err(AppError::Unauthorized(format!(
            "directory rejected credentials for '{bind_dn}'"
        ))),
        _ => Err(AppError::Unavailable(format!(
            "directory bind for '{bind_dn}' failed with code {code}: {text}"
        ))),
    }
}
