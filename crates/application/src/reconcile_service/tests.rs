use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use dirsync_core::{AppError, AppResult};
use dirsync_domain::{DirectoryEntry, GroupMatch, IndexedUser, Role, Username};

use crate::{
    DirectoryClient, DirectoryEvent, DirectorySearchRequest, SearchOutcome, UserIndex,
};

use super::{
    ReconcileReport, ReconcileService, ReconcileSettings, UpsertOutcome, UsernameLocks,
    release_idle_lock,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredUser {
    username: String,
    role: Role,
    enable: u8,
    display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IndexCall {
    Count(String),
    Create(String),
    UpdateRole(String, Role),
}

#[derive(Default)]
struct FakeUserIndex {
    documents: Mutex<HashMap<String, StoredUser>>,
    calls: Mutex<Vec<IndexCall>>,
    failing_usernames: HashSet<String>,
    write_delay: HashMap<String, Duration>,
    count_misses: bool,
}

impl FakeUserIndex {
    fn failing_for(usernames: &[&str]) -> Self {
        Self {
            failing_usernames: usernames.iter().map(|name| (*name).to_owned()).collect(),
            ..Self::default()
        }
    }

    async fn seed(&self, username: &str, role: Role, display_name: Option<&str>) {
        self.documents.lock().await.insert(
            username.to_owned(),
            StoredUser {
                username: username.to_owned(),
                role,
                enable: 1,
                display_name: display_name.map(str::to_owned),
            },
        );
    }

    async fn document(&self, username: &str) -> Option<StoredUser> {
        self.documents.lock().await.get(username).cloned()
    }

    async fn calls(&self) -> Vec<IndexCall> {
        self.calls.lock().await.clone()
    }

    async fn pause_for(&self, username: &str) {
        if let Some(delay) = self.write_delay.get(username) {
            tokio::time::sleep(*delay).await;
        }
    }
}

#[async_trait]
impl UserIndex for FakeUserIndex {
    async fn count_by_username(&self, username: &Username) -> AppResult<u64> {
        self.calls
            .lock()
            .await
            .push(IndexCall::Count(username.as_str().to_owned()));

        if self.failing_usernames.contains(username.as_str()) {
            return Err(AppError::Unavailable("index unreachable".to_owned()));
        }
        if self.count_misses {
            return Ok(0);
        }

        let count = self
            .documents
            .lock()
            .await
            .values()
            .filter(|document| document.username == username.as_str())
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn create_user(&self, user: &IndexedUser) -> AppResult<()> {
        self.pause_for(user.username.as_str()).await;
        self.calls
            .lock()
            .await
            .push(IndexCall::Create(user.username.as_str().to_owned()));

        let mut documents = self.documents.lock().await;
        if documents.contains_key(user.username.as_str()) {
            return Err(AppError::Conflict(format!(
                "document '{}' already exists",
                user.username
            )));
        }
        documents.insert(
            user.username.as_str().to_owned(),
            StoredUser {
                username: user.username.as_str().to_owned(),
                role: user.role,
                enable: user.enable,
                display_name: None,
            },
        );
        Ok(())
    }

    async fn update_role(&self, username: &Username, role: Role) -> AppResult<()> {
        self.pause_for(username.as_str()).await;
        self.calls
            .lock()
            .await
            .push(IndexCall::UpdateRole(username.as_str().to_owned(), role));

        let mut documents = self.documents.lock().await;
        let document = documents
            .get_mut(username.as_str())
            .ok_or_else(|| AppError::NotFound(format!("document '{username}'")))?;
        document.role = role;
        Ok(())
    }
}

struct FakeDirectory {
    events: Mutex<Option<Vec<DirectoryEvent>>>,
    requests: Mutex<Vec<DirectorySearchRequest>>,
}

impl FakeDirectory {
    fn new(events: Vec<DirectoryEvent>) -> Self {
        Self {
            events: Mutex::new(Some(events)),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn search(
        &self,
        request: &DirectorySearchRequest,
    ) -> AppResult<mpsc::Receiver<DirectoryEvent>> {
        self.requests.lock().await.push(request.clone());
        let events = self
            .events
            .lock()
            .await
            .take()
            .ok_or_else(|| AppError::Unavailable("search already consumed".to_owned()))?;
        Ok(event_stream(events).await)
    }

    async fn close(&self) -> AppResult<()> {
        Ok(())
    }
}

async fn event_stream(events: Vec<DirectoryEvent>) -> mpsc::Receiver<DirectoryEvent> {
    let (sender, receiver) = mpsc::channel(events.len().max(1));
    for event in events {
        if sender.send(event).await.is_err() {
            panic!("receiver dropped");
        }
    }
    receiver
}

fn settings() -> ReconcileSettings {
    ReconcileSettings::new("userPrincipalName", "Domain Admins")
}

fn service(index: Arc<FakeUserIndex>) -> ReconcileService {
    ReconcileService::new(index, settings())
}

fn user_entry(username: &str, groups: &[&str]) -> DirectoryEvent {
    let mut entry = DirectoryEntry::new(format!("CN={username},DC=corp"), HashMap::new())
        .with_attribute("userPrincipalName", [username]);
    if !groups.is_empty() {
        entry = entry.with_attribute("memberOf", groups.iter().copied());
    }
    DirectoryEvent::Entry(entry)
}

fn search_success() -> SearchOutcome {
    SearchOutcome {
        code: 0,
        message: String::new(),
    }
}

fn end() -> DirectoryEvent {
    DirectoryEvent::End(search_success())
}

async fn run(index: &Arc<FakeUserIndex>, events: Vec<DirectoryEvent>) -> ReconcileReport {
    service(index.clone()).run(event_stream(events).await).await
}

#[tokio::test]
async fn admin_member_is_created_as_enabled_admin() {
    let index = Arc::new(FakeUserIndex::default());

    let report = run(
        &index,
        vec![user_entry("alice", &["Domain Admins", "Staff"]), end()],
    )
    .await;

    assert_eq!(report.created, 1);
    assert_eq!(
        index.document("alice").await,
        Some(StoredUser {
            username: "alice".to_owned(),
            role: Role::Admin,
            enable: 1,
            display_name: None,
        })
    );
}

#[tokio::test]
async fn entry_without_membership_is_created_as_common() {
    let index = Arc::new(FakeUserIndex::default());

    run(&index, vec![user_entry("bob", &[]), end()]).await;

    let document = index
        .document("bob")
        .await
        .unwrap_or_else(|| panic!("bob should be indexed"));
    assert_eq!(document.role, Role::Common);
    assert_eq!(document.enable, 1);
}

#[tokio::test]
async fn existing_document_only_has_its_role_updated() {
    let index = Arc::new(FakeUserIndex::default());
    index.seed("alice", Role::Common, Some("Alice")).await;
    {
        let mut documents = index.documents.lock().await;
        if let Some(document) = documents.get_mut("alice") {
            document.enable = 0;
        }
    }

    let report = run(&index, vec![user_entry("alice", &["Domain Admins"]), end()]).await;

    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 0);
    assert_eq!(
        index.document("alice").await,
        Some(StoredUser {
            username: "alice".to_owned(),
            role: Role::Admin,
            enable: 0,
            display_name: Some("Alice".to_owned()),
        })
    );
    assert_eq!(
        index.calls().await,
        vec![
            IndexCall::Count("alice".to_owned()),
            IndexCall::UpdateRole("alice".to_owned(), Role::Admin),
        ]
    );
}

#[tokio::test]
async fn entries_without_username_make_no_index_calls() {
    let index = Arc::new(FakeUserIndex::default());
    let missing = DirectoryEvent::Entry(
        DirectoryEntry::default().with_attribute("memberOf", ["Domain Admins"]),
    );
    let empty =
        DirectoryEvent::Entry(DirectoryEntry::default().with_attribute("userPrincipalName", [""]));

    let report = run(&index, vec![missing, empty, end()]).await;

    assert_eq!(report.entries, 2);
    assert_eq!(report.skipped, 2);
    assert!(index.calls().await.is_empty());
}

#[tokio::test]
async fn second_run_over_unchanged_directory_leaves_index_unchanged() {
    let index = Arc::new(FakeUserIndex::default());
    let events = || {
        vec![
            user_entry("alice", &["Domain Admins"]),
            user_entry("bob", &["Staff"]),
            end(),
        ]
    };

    let first = run(&index, events()).await;
    let after_first = index.documents.lock().await.clone();
    let second = run(&index, events()).await;
    let after_second = index.documents.lock().await.clone();

    assert_eq!((first.created, first.updated), (2, 0));
    assert_eq!((second.created, second.updated), (0, 2));
    assert_eq!(after_first, after_second);
    assert_eq!(after_second.len(), 2);
}

#[tokio::test]
async fn duplicate_usernames_are_written_in_order_and_last_wins() {
    let index = Arc::new(FakeUserIndex {
        write_delay: HashMap::from([("alice".to_owned(), Duration::from_millis(30))]),
        ..FakeUserIndex::default()
    });

    let report = run(
        &index,
        vec![
            user_entry("alice", &["Domain Admins"]),
            user_entry("alice", &["Staff"]),
            end(),
        ],
    )
    .await;

    assert_eq!((report.created, report.updated), (1, 1));
    assert_eq!(index.documents.lock().await.len(), 1);
    assert_eq!(
        index.document("alice").await.map(|document| document.role),
        Some(Role::Common)
    );
    assert_eq!(
        index.calls().await,
        vec![
            IndexCall::Count("alice".to_owned()),
            IndexCall::Create("alice".to_owned()),
            IndexCall::Count("alice".to_owned()),
            IndexCall::UpdateRole("alice".to_owned(), Role::Common),
        ]
    );
}

#[tokio::test]
async fn failed_write_does_not_stop_later_entries() {
    let index = Arc::new(FakeUserIndex::failing_for(&["broken"]));

    let report = run(
        &index,
        vec![
            user_entry("broken", &[]),
            user_entry("carol", &[]),
            end(),
        ],
    )
    .await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.created, 1);
    assert!(index.document("carol").await.is_some());
    assert!(report.has_problems());
}

#[tokio::test]
async fn referrals_and_search_errors_are_counted_and_processing_continues() {
    let index = Arc::new(FakeUserIndex::default());

    let report = run(
        &index,
        vec![
            DirectoryEvent::Referral(vec!["ldap://other.corp/DC=other".to_owned()]),
            DirectoryEvent::Error("size limit exceeded".to_owned()),
            user_entry("dave", &[]),
            end(),
        ],
    )
    .await;

    assert_eq!(report.referrals, 1);
    assert_eq!(report.search_errors, 1);
    assert_eq!(report.created, 1);
    assert_eq!(report.outcome, Some(search_success()));
}

#[tokio::test]
async fn events_after_end_are_ignored() {
    let index = Arc::new(FakeUserIndex::default());

    let report = run(&index, vec![end(), user_entry("late", &[])]).await;

    assert_eq!(report.entries, 0);
    assert!(index.calls().await.is_empty());
}

#[tokio::test]
async fn closed_stream_without_end_still_completes_writes() {
    let index = Arc::new(FakeUserIndex::default());

    let report = run(&index, vec![user_entry("erin", &[])]).await;

    assert_eq!(report.created, 1);
    assert_eq!(report.outcome, None);
    assert!(report.has_problems());
}

#[tokio::test]
async fn run_returns_only_after_slow_writes_finish() {
    let index = Arc::new(FakeUserIndex {
        write_delay: HashMap::from([
            ("slow".to_owned(), Duration::from_millis(50)),
            ("slower".to_owned(), Duration::from_millis(80)),
        ]),
        ..FakeUserIndex::default()
    });

    let report = run(
        &index,
        vec![
            user_entry("slow", &[]),
            user_entry("slower", &["Domain Admins"]),
            user_entry("fast", &[]),
            end(),
        ],
    )
    .await;

    assert_eq!(report.created, 3);
    assert_eq!(index.documents.lock().await.len(), 3);
    assert!(!report.has_problems());
}

#[tokio::test]
async fn synchronize_searches_with_projected_attributes() {
    let index = Arc::new(FakeUserIndex::default());
    let directory = FakeDirectory::new(vec![user_entry("frank", &["Domain Admins"]), end()]);
    let service = service(index.clone());
    let request = service.search_request("DC=corp,DC=example", "(objectClass=user)");

    let report = service
        .synchronize(&directory, &request)
        .await
        .unwrap_or_else(|error| panic!("synchronize failed: {error}"));

    assert_eq!(report.created, 1);
    assert_eq!(
        directory.requests.lock().await.as_slice(),
        &[DirectorySearchRequest {
            base: "DC=corp,DC=example".to_owned(),
            filter: "(objectClass=user)".to_owned(),
            attributes: vec!["userPrincipalName".to_owned(), "memberOf".to_owned()],
        }]
    );
}

#[tokio::test]
async fn synchronize_propagates_search_setup_failure() {
    let index = Arc::new(FakeUserIndex::default());
    let directory = FakeDirectory::new(Vec::new());
    let service = service(index);
    let request = service.search_request("DC=corp", "(objectClass=user)");

    let first = service.synchronize(&directory, &request).await;
    let second = service.synchronize(&directory, &request).await;

    assert!(first.is_ok());
    assert!(matches!(second, Err(AppError::Unavailable(_))));
}

#[tokio::test]
async fn common_name_matching_accepts_group_distinguished_names() {
    let index = Arc::new(FakeUserIndex::default());
    let mut settings = settings();
    settings.group_match = GroupMatch::CommonName;
    let service = ReconcileService::new(index.clone(), settings);

    let events = event_stream(vec![
        user_entry("gina", &["CN=Domain Admins,CN=Users,DC=corp,DC=example"]),
        end(),
    ])
    .await;
    service.run(events).await;

    assert_eq!(
        index.document("gina").await.map(|document| document.role),
        Some(Role::Admin)
    );
}

#[tokio::test]
async fn upsert_reports_created_then_updated() {
    let index = Arc::new(FakeUserIndex::default());
    let service = service(index.clone());
    let user = service
        .map_entry(&DirectoryEntry::default().with_attribute("userPrincipalName", ["hal"]))
        .unwrap_or_else(|| panic!("entry should map"));

    let first = service.upsert(&user).await;
    let second = service.upsert(&user).await;

    assert!(matches!(first, Ok(UpsertOutcome::Created)));
    assert!(matches!(second, Ok(UpsertOutcome::Updated)));
}

#[tokio::test]
async fn missed_count_falls_back_to_role_update_without_replacing_document() {
    let index = Arc::new(FakeUserIndex {
        count_misses: true,
        ..FakeUserIndex::default()
    });
    index.seed("alice@corp.example", Role::Common, Some("Alice")).await;
    {
        let mut documents = index.documents.lock().await;
        if let Some(document) = documents.get_mut("alice@corp.example") {
            document.enable = 0;
        }
    }

    let report = run(
        &index,
        vec![user_entry("alice@corp.example", &["Domain Admins"]), end()],
    )
    .await;

    assert_eq!((report.created, report.updated, report.failed), (0, 1, 0));
    assert_eq!(
        index.document("alice@corp.example").await,
        Some(StoredUser {
            username: "alice@corp.example".to_owned(),
            role: Role::Admin,
            enable: 0,
            display_name: Some("Alice".to_owned()),
        })
    );
    assert_eq!(
        index.calls().await,
        vec![
            IndexCall::Count("alice@corp.example".to_owned()),
            IndexCall::Create("alice@corp.example".to_owned()),
            IndexCall::UpdateRole("alice@corp.example".to_owned(), Role::Admin),
        ]
    );
}

#[tokio::test]
async fn username_lock_is_released_once_no_write_holds_it() {
    let alice = Username::new("alice").unwrap_or_else(|error| panic!("invalid username: {error}"));
    let mut locks = UsernameLocks::new();
    let lock = locks.entry(alice.clone()).or_default().clone();
    let guard = lock.lock_owned().await;

    release_idle_lock(&mut locks, &alice);
    assert!(locks.contains_key(&alice));

    drop(guard);
    release_idle_lock(&mut locks, &alice);
    assert!(locks.is_empty());
}
