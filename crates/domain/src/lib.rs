//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod classification;
mod entry;
mod user;

pub use classification::{GroupMatch, classify_role, extract_username, map_entry};
pub use entry::DirectoryEntry;
pub use user::{DirectoryUser, ENABLED, IndexedUser, Role, Username};
