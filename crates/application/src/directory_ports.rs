mod client;
mod events;

pub use client::{DirectoryClient, DirectorySearchRequest};
pub use events::{DirectoryEvent, SearchOutcome};
