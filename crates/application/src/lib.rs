//! Application services and ports.

#![forbid(unsafe_code)]

mod directory_ports;
mod reconcile_service;
mod user_index_ports;

pub use directory_ports::{DirectoryClient, DirectoryEvent, DirectorySearchRequest, SearchOutcome};
pub use reconcile_service::{ReconcileReport, ReconcileService, ReconcileSettings, UpsertOutcome};
pub use user_index_ports::UserIndex;
