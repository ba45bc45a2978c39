//! Configuration file loading and validation.

use std::path::Path;
use std::time::Duration;

use dirsync_application::ReconcileSettings;
use dirsync_core::{AppError, AppResult};
use dirsync_domain::GroupMatch;
use dirsync_infrastructure::{ElasticsearchSettings, LdapSettings};
use serde::Deserialize;

/// Environment variable overriding `ldap.bindCredentials`.
pub const BIND_CREDENTIALS_ENV: &str = "DIRSYNC_BIND_CREDENTIALS";

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncConfig {
    /// Directory connection and mapping.
    pub ldap: LdapConfig,
    /// User index connection and layout.
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
}

/// `ldap` section of the configuration file.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LdapConfig {
    #[serde(default = "default_ldap_url")]
    pub url: String,
    pub bind_dn: String,
    #[serde(default)]
    pub bind_credentials: Option<String>,
    pub search_base: String,
    #[serde(default = "default_search_filter")]
    pub search_filter: String,
    #[serde(default = "default_username_field")]
    pub username_field: String,
    #[serde(default = "default_admin_group")]
    pub admin_group: String,
    #[serde(default = "default_membership_field")]
    pub membership_field: String,
    #[serde(default)]
    pub admin_group_match: GroupMatch,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LdapConfig")
            .field("url", &self.url)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_credentials",
                &self.bind_credentials.as_ref().map(|_| "***REDACTED***"),
            )
            .field("search_base", &self.search_base)
            .field("search_filter", &self.search_filter)
            .field("username_field", &self.username_field)
            .field("admin_group", &self.admin_group)
            .field("membership_field", &self.membership_field)
            .field("admin_group_match", &self.admin_group_match)
            .field("page_size", &self.page_size)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// `elasticsearch` section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ElasticsearchConfig {
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default = "default_document_type")]
    pub document_type: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_writes")]
    pub max_concurrent_writes: usize,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            index: default_index(),
            document_type: default_document_type(),
            request_timeout_secs: default_request_timeout_secs(),
            max_concurrent_writes: default_max_concurrent_writes(),
        }
    }
}

fn default_ldap_url() -> String {
    "localhost:389".to_owned()
}

fn default_search_filter() -> String {
    "(&(objectCategory=person)(objectClass=user))".to_owned()
}

fn default_username_field() -> String {
    "userPrincipalName".to_owned()
}

fn default_admin_group() -> String {
    "Domain Admins".to_owned()
}

fn default_membership_field() -> String {
    "memberOf".to_owned()
}

fn default_page_size() -> u32 {
    500
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_hosts() -> Vec<String> {
    vec!["localhost:9200".to_owned()]
}

fn default_index() -> String {
    ".kibana".to_owned()
}

fn default_document_type() -> Option<String> {
    Some("users".to_owned())
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_max_concurrent_writes() -> usize {
    8
}

impl SyncConfig {
    /// Reads, overrides from the environment, and validates a config file.
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            AppError::Validation(format!(
                "failed to read configuration file '{}': {error}",
                path.display()
            ))
        })?;

        Self::parse(raw.as_str(), std::env::var(BIND_CREDENTIALS_ENV).ok())
    }

    /// Parses and validates configuration JSON.
    ///
    /// A non-empty `bind_credentials_override` replaces the file's secret.
    pub fn parse(raw: &str, bind_credentials_override: Option<String>) -> AppResult<Self> {
        let mut config = serde_json::from_str::<Self>(raw).map_err(|error| {
            AppError::Validation(format!("invalid configuration file: {error}"))
        })?;

        if let Some(credentials) = bind_credentials_override.filter(|value| !value.is_empty()) {
            config.ldap.bind_credentials = Some(credentials);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        let ldap = &self.ldap;
        require_non_empty("ldap.url", ldap.url.as_str())?;
        require_non_empty("ldap.bindDn", ldap.bind_dn.as_str())?;
        require_non_empty(
            "ldap.bindCredentials",
            ldap.bind_credentials.as_deref().unwrap_or_default(),
        )?;
        require_non_empty("ldap.searchBase", ldap.search_base.as_str())?;
        require_non_empty("ldap.searchFilter", ldap.search_filter.as_str())?;
        require_non_empty("ldap.usernameField", ldap.username_field.as_str())?;
        require_non_empty("ldap.adminGroup", ldap.admin_group.as_str())?;
        require_non_empty("ldap.membershipField", ldap.membership_field.as_str())?;
        require_positive("ldap.connectTimeoutSecs", ldap.connect_timeout_secs)?;

        let elasticsearch = &self.elasticsearch;
        if elasticsearch.hosts.is_empty() {
            return Err(AppError::Validation(
                "elasticsearch.hosts must list at least one host".to_owned(),
            ));
        }
        for host in &elasticsearch.hosts {
            require_non_empty("elasticsearch.hosts[]", host.as_str())?;
        }
        require_non_empty("elasticsearch.index", elasticsearch.index.as_str())?;
        if let Some(document_type) = &elasticsearch.document_type {
            require_non_empty("elasticsearch.documentType", document_type.as_str())?;
        }
        require_positive(
            "elasticsearch.requestTimeoutSecs",
            elasticsearch.request_timeout_secs,
        )?;
        require_positive(
            "elasticsearch.maxConcurrentWrites",
            u64::try_from(elasticsearch.max_concurrent_writes).unwrap_or(u64::MAX),
        )?;

        Ok(())
    }

    /// Returns the directory adapter settings.
    #[must_use]
    pub fn ldap_settings(&self) -> LdapSettings {
        LdapSettings {
            url: self.ldap.url.clone(),
            bind_dn: self.ldap.bind_dn.clone(),
            bind_credentials: self.ldap.bind_credentials.clone().unwrap_or_default(),
            page_size: self.ldap.page_size,
            connect_timeout: Duration::from_secs(self.ldap.connect_timeout_secs),
        }
    }

    /// Returns the user index adapter settings.
    #[must_use]
    pub fn elasticsearch_settings(&self) -> ElasticsearchSettings {
        ElasticsearchSettings {
            hosts: self.elasticsearch.hosts.clone(),
            index: self.elasticsearch.index.clone(),
            document_type: self.elasticsearch.document_type.clone(),
            request_timeout: Duration::from_secs(self.elasticsearch.request_timeout_secs),
        }
    }

    /// Returns the reconciliation settings.
    #[must_use]
    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            username_field: self.ldap.username_field.clone(),
            membership_field: self.ldap.membership_field.clone(),
            admin_group: self.ldap.admin_group.clone(),
            group_match: self.ldap.admin_group_match,
            max_concurrent_writes: self.elasticsearch.max_concurrent_writes,
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }

    Ok(())
}

fn require_positive(field: &str, value: u64) -> AppResult<()> {
    if value == 0 {
        return Err(AppError::Validation(format!(
            "{field} must be greater than zero"
        )));
    }

    Ok(())
}
