//! dirsync: one-shot directory to user index role synchronization.

#![forbid(unsafe_code)]

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dirsync_application::{DirectoryClient, ReconcileReport, ReconcileService};
use dirsync_core::AppError;
use dirsync_infrastructure::{ElasticsearchUserIndex, LdapDirectoryClient};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::SyncConfig;

/// Synchronize LDAP group membership into the Elasticsearch user index.
#[derive(Debug, Parser)]
#[command(name = "dirsync", author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = SyncConfig::load(&cli.config)?;

    info!(
        config_path = %cli.config.display(),
        ldap_url = %config.ldap.url,
        bind_dn = %config.ldap.bind_dn,
        search_base = %config.ldap.search_base,
        admin_group = %config.ldap.admin_group,
        admin_group_match = config.ldap.admin_group_match.as_str(),
        elasticsearch_hosts = ?config.elasticsearch.hosts,
        index = %config.elasticsearch.index,
        "dirsync started"
    );

    let user_index = Arc::new(ElasticsearchUserIndex::new(&config.elasticsearch_settings())?);
    let directory = LdapDirectoryClient::connect(&config.ldap_settings()).await?;
    let service = ReconcileService::new(user_index, config.reconcile_settings());
    let request = service.search_request(
        config.ldap.search_base.as_str(),
        config.ldap.search_filter.as_str(),
    );

    let result = service.synchronize(&directory, &request).await;

    if let Err(error) = directory.close().await {
        warn!(error = %error, "failed to unbind from directory");
    }

    let report = result?;
    log_report(&report);

    Ok(())
}

fn log_report(report: &ReconcileReport) {
    let status = report.outcome.as_ref().map(|outcome| outcome.code);

    if report.has_problems() {
        warn!(
            entries = report.entries,
            skipped = report.skipped,
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            referrals = report.referrals,
            search_errors = report.search_errors,
            search_status = ?status,
            "dirsync finished with problems"
        );
    } else {
        info!(
            entries = report.entries,
            skipped = report.skipped,
            created = report.created,
            updated = report.updated,
            referrals = report.referrals,
            search_status = ?status,
            "dirsync finished"
        );
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
