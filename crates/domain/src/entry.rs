use std::collections::HashMap;

/// A single record returned by a directory search.
///
/// Attribute descriptions are case-insensitive in LDAP, so lookups ignore
/// ASCII case while the entry keeps the names as the server returned them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirectoryEntry {
    dn: String,
    attributes: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Creates an entry from its distinguished name and attribute values.
    #[must_use]
    pub fn new(dn: impl Into<String>, attributes: HashMap<String, Vec<String>>) -> Self {
        Self {
            dn: dn.into(),
            attributes,
        }
    }

    /// Adds values for one attribute, replacing any previous values.
    #[must_use]
    pub fn with_attribute<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let name = name.into();
        self.attributes
            .retain(|existing, _| !existing.eq_ignore_ascii_case(name.as_str()));
        self.attributes
            .insert(name, values.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the distinguished name of the entry.
    #[must_use]
    pub fn dn(&self) -> &str {
        self.dn.as_str()
    }

    /// Returns every value of an attribute, or `None` when it is absent.
    #[must_use]
    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    /// Returns the first non-empty value of an attribute.
    #[must_use]
    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.values(name)?
            .iter()
            .map(String::as_str)
            .find(|value| !value.is_empty())
    }
}
