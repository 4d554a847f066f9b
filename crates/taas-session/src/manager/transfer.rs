//! Adoption of a credential issued by the server-side login flow.

use tracing::{info, warn};

use super::{ConnectionHandle, InitState, SessionManager};
use crate::credential::SessionCredential;
use crate::error::{Result, SessionError, StorageError};

/// Whether an adopted credential was written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceOutcome {
    Saved,
    /// The credential did not validate, so it was not written.
    SkippedUnconfirmed,
    /// The session is live but will not survive a reload.
    Failed(StorageError),
}

#[derive(Debug, Clone)]
pub struct AdoptedSession {
    pub handle: ConnectionHandle,
    pub persistence: PersistenceOutcome,
}

impl SessionManager {
    /// Replace whatever session is live with one built from `credential`.
    ///
    /// The previous connection is closed before the new one is opened, and
    /// any in-flight attempt is superseded. Callers arriving while adoption
    /// runs join it. The credential is persisted only once it validates; a
    /// storage failure at that point leaves the session usable and is
    /// reported in [`AdoptedSession::persistence`].
    pub async fn adopt_server_session(&self, credential: SessionCredential) -> Result<AdoptedSession> {
        let credential = SessionCredential::non_empty(credential.into_inner())
            .ok_or(SessionError::NotAuthenticated)?;

        let pending = {
            let mut state = self.inner.lock_state();
            let displaced = match std::mem::replace(&mut *state, InitState::Idle) {
                InitState::Ready { handle } => Some(handle),
                InitState::Connecting { attempt, .. } => {
                    info!(attempt, "superseding in-flight attempt with transferred session");
                    None
                }
                InitState::Idle | InitState::Failed { .. } => None,
            };
            let (attempt, pending) = self.begin_attempt(Some(credential.clone()), displaced);
            *state = InitState::Connecting {
                attempt,
                pending: pending.clone(),
            };
            pending
        };
        let handle = pending.await?;

        let persistence = if handle.is_authenticated() {
            match self.inner.store.save(&credential).await {
                Ok(()) => PersistenceOutcome::Saved,
                Err(error) => {
                    warn!(error = %error, "transferred session is live but was not persisted");
                    PersistenceOutcome::Failed(error)
                }
            }
        } else {
            warn!(attempt = handle.attempt(), "transferred credential did not validate; not persisting");
            PersistenceOutcome::SkippedUnconfirmed
        };
        info!(attempt = handle.attempt(), ?persistence, "transferred session adopted");

        Ok(AdoptedSession {
            handle,
            persistence,
        })
    }
}
