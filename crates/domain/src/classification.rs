//! Mapping from directory entries to index users.

use serde::{Deserialize, Serialize};

use crate::{DirectoryEntry, DirectoryUser, Role, Username};

/// How membership values are compared with the configured admin group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupMatch {
    /// The membership value must equal the admin group identifier.
    #[default]
    Exact,
    /// Also accept a DN whose leading RDN is `CN=<admin group>`.
    CommonName,
}

impl GroupMatch {
    /// Returns the configuration string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::CommonName => "commonName",
        }
    }

    fn matches(self, value: &str, admin_group: &str) -> bool {
        if value == admin_group {
            return true;
        }

        match self {
            Self::Exact => false,
            Self::CommonName => leading_common_name(value) == Some(admin_group),
        }
    }
}

/// Extracts the username from the configured identity attribute.
///
/// Returns `None` when the attribute is absent or only holds empty values.
/// A whitespace-only value is not a username, so such entries are skipped
/// as well.
#[must_use]
pub fn extract_username(entry: &DirectoryEntry, username_field: &str) -> Option<Username> {
    entry
        .first_value(username_field)
        .and_then(|value| Username::new(value).ok())
}

/// Computes the role of an entry from its group membership.
///
/// An absent membership attribute yields [`Role::Common`].
#[must_use]
pub fn classify_role(
    entry: &DirectoryEntry,
    admin_group: &str,
    membership_field: &str,
    group_match: GroupMatch,
) -> Role {
    let is_admin = entry.values(membership_field).is_some_and(|groups| {
        groups
            .iter()
            .any(|group| group_match.matches(group.as_str(), admin_group))
    });

    if is_admin { Role::Admin } else { Role::Common }
}

/// Maps an entry to a user, or `None` when it carries no username.
#[must_use]
pub fn map_entry(
    entry: &DirectoryEntry,
    username_field: &str,
    admin_group: &str,
    membership_field: &str,
    group_match: GroupMatch,
) -> Option<DirectoryUser> {
    let username = extract_username(entry, username_field)?;
    let role = classify_role(entry, admin_group, membership_field, group_match);
    Some(DirectoryUser { username, role })
}

fn leading_common_name(dn: &str) -> Option<&str> {
    let (attribute_type, rest) = dn.split_once('=')?;
    if !attribute_type.trim().eq_ignore_ascii_case("cn") {
        return None;
    }

    let mut escaped = false;
    for (index, character) in rest.char_indices() {
        match character {
            '\\' if !escaped => escaped = true,
            ',' | '+' if !escaped => return Some(&rest[..index]),
            _ => escaped = false,
        }
    }

    Some(rest)
}
