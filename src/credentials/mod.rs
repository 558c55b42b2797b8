//! Credential lifecycle: keyring/SQLite-backed storage, ordered account
//! selection with proactive refresh, and per-provider OAuth refresh
//! mechanics (spec §4.3/§4.4).

pub mod error;
pub mod oauth;
pub mod selector;
pub mod store;
pub mod types;

pub use error::CredentialError;
pub use oauth::{ProviderKind, RefreshedTokens};
pub use selector::CredentialSelector;
pub use store::CredentialStore;
pub use types::{AuthType, Connection, ProviderProfile, Secrets, TestStatus};
