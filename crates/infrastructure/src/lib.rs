//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod elasticsearch_user_index;
mod ldap_directory_client;

pub use elasticsearch_user_index::{ElasticsearchSettings, ElasticsearchUserIndex};
pub use ldap_directory_client::{LdapDirectoryClient, LdapSettings};
