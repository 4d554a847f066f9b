//! Session and connection lifecycle for direct client-to-Telegram transfers.
//!
//! This crate owns:
//! - a masked credential record that survives reloads
//! - a request-collapsing connection singleton
//! - post-connect credential validation and entity cache warming
//! - adoption of credentials issued by the server-side login flow
//!
//! The wire protocol is behind [`transport::Connector`]; persistence is
//! behind [`storage::StorageBackend`].
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod config;
pub mod credential;
pub mod error;
pub mod manager;
pub mod mask;
pub mod storage;
pub mod store;
pub mod transport;
pub mod validator;
pub mod warmer;

#[cfg(test)]
mod test_support;

pub use config::{AppCredentials, ConnectOptions, SessionConfig};
pub use credential::SessionCredential;
pub use error::{ConfigurationError, Result, SessionError, StorageError, TransportError};
pub use manager::{
    AdoptedSession, ConnectionHandle, CredentialSource, PersistenceOutcome, SessionManager,
    SessionStatus,
};
pub use mask::{MaskEnvironment, MaskKey};
pub use storage::{FileStorage, MemoryStorage, StorageBackend, StorageScope};
pub use store::{CredentialStore, SESSION_KEY};
pub use transport::{
    AccountIdentity, Connector, DialogSummary, EntityKind, EntityRef, RemoteConnection,
};
pub use validator::ValidationOutcome;
pub use warmer::{SkipReason, WarmOutcome};
