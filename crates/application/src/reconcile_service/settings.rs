use dirsync_domain::GroupMatch;

/// Mapping and write settings for a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Attribute holding the username.
    pub username_field: String,
    /// Attribute listing group memberships.
    pub membership_field: String,
    /// Group identifier granting the admin role.
    pub admin_group: String,
    /// Comparison used between membership values and `admin_group`.
    pub group_match: GroupMatch,
    /// Upper bound on concurrent document-store writes.
    pub max_concurrent_writes: usize,
}

impl ReconcileSettings {
    /// Creates settings with the default membership attribute and matching.
    #[must_use]
    pub fn new(username_field: impl Into<String>, admin_group: impl Into<String>) -> Self {
        Self {
            username_field: username_field.into(),
            membership_field: "memberOf".to_owned(),
            admin_group: admin_group.into(),
            group_match: GroupMatch::Exact,
            max_concurrent_writes: 8,
        }
    }

    /// Returns the attributes a directory search must project.
    #[must_use]
    pub fn projected_attributes(&self) -> Vec<String> {
        vec![self.username_field.clone(), self.membership_field.clone()]
    }
}
