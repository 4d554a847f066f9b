//! Confirms a credential still authenticates on a fresh connection.

use serde::Serialize;
use tracing::{info, warn};

use crate::store::CredentialStore;
use crate::transport::{AccountIdentity, RemoteConnection};

/// Outcome of validating the credential a connection was opened with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// Anonymous connection; nothing to validate.
    Skipped,
    Confirmed { account: AccountIdentity },
    /// The credential is stale or revoked. The connection stays open but
    /// unauthenticated. `purged` reports whether the stored record was
    /// removed.
    Rejected { reason: String, purged: bool },
}

impl ValidationOutcome {
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    #[must_use]
    pub fn account(&self) -> Option<&AccountIdentity> {
        match self {
            Self::Confirmed { account } => Some(account),
            _ => None,
        }
    }
}

/// Issue "who am I" on `connection`. On failure purge the stored record so
/// later restores do not repeat the failure. Never fails the caller.
pub async fn validate(
    connection: &dyn RemoteConnection,
    store: &CredentialStore,
    has_credential: bool,
) -> ValidationOutcome {
    if !has_credential {
        return ValidationOutcome::Skipped;
    }

    match connection.get_me().await {
        Ok(account) => {
            info!(account_id = account.id, "session credential confirmed");
            ValidationOutcome::Confirmed { account }
        }
        Err(error) => {
            let reason = error.to_string();
            let purged = match store.clear().await {
                Ok(()) => true,
                Err(clear_error) => {
                    warn!(error = %clear_error, "failed to purge rejected credential");
                    false
                }
            };
            warn!(reason = %reason, purged, "session credential rejected; continuing unauthenticated");
            ValidationOutcome::Rejected { reason, purged }
        }
    }
}
