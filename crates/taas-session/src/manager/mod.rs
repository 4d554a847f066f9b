//! Process-wide connection singleton.
//!
//! At most one live connection exists per manager. Concurrent callers that
//! arrive while an initialization is in flight attach to it and observe the
//! same outcome. Initialization runs on its own task so a caller that stops
//! waiting does not cancel it for everyone else.
//!
//! Every attempt carries a number. An attempt only publishes its result if
//! the manager is still waiting on that number; attempts displaced by
//! [`SessionManager::logout`] or [`SessionManager::adopt_server_session`]
//! close their connection and report [`SessionError::Superseded`].

mod transfer;


use std::fmt;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::credential::SessionCredential;
use crate::error::{Result, SessionError, StorageError};
use crate::storage::StorageBackend;
use crate::store::CredentialStore;
use crate::transport::{AccountIdentity, Connector, DialogSummary, EntityRef, RemoteConnection};
use crate::validator::{self, ValidationOutcome};
use crate::warmer::{self, WarmOutcome};

pub use transfer::{AdoptedSession, PersistenceOutcome};

type InitResult = Result<ConnectionHandle>;
type PendingInit = Shared<BoxFuture<'static, InitResult>>;

/// Coarse lifecycle state, for status reporting.
///
/// `Failed` means the last attempt failed; the next request retries from it
/// exactly as from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Ready,
    Failed,
}

/// Where the credential for a connection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// Passed by the caller or transferred from the server.
    Explicit,
    Restored,
    Anonymous,
}

impl CredentialSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Restored => "restored",
            Self::Anonymous => "anonymous",
        }
    }
}

/// Shared reference to the live connection plus what happened while it was
/// set up. Cloning is cheap; all clones refer to the same connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    attempt: u64,
    connection: Arc<dyn RemoteConnection>,
    source: CredentialSource,
    validation: ValidationOutcome,
    warm: WarmOutcome,
}

impl ConnectionHandle {
    fn new(
        attempt: u64,
        connection: Arc<dyn RemoteConnection>,
        source: CredentialSource,
        validation: ValidationOutcome,
        warm: WarmOutcome,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                attempt,
                connection,
                source,
                validation,
                warm,
            }),
        }
    }

    pub fn attempt(&self) -> u64 {
        self.inner.attempt
    }

    pub fn connection(&self) -> Arc<dyn RemoteConnection> {
        Arc::clone(&self.inner.connection)
    }

    pub fn source(&self) -> CredentialSource {
        self.inner.source
    }

    pub fn validation(&self) -> &ValidationOutcome {
        &self.inner.validation
    }

    pub fn warm(&self) -> &WarmOutcome {
        &self.inner.warm
    }

    /// Whether the credential was confirmed when the connection was opened.
    pub fn is_authenticated(&self) -> bool {
        self.inner.validation.is_confirmed()
    }

    /// Whether both handles came out of the same initialization.
    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Deref for ConnectionHandle {
    type Target = dyn RemoteConnection;

    fn deref(&self) -> &Self::Target {
        self.inner.connection.as_ref()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("attempt", &self.inner.attempt)
            .field("source", &self.inner.source)
            .field("validation", &self.inner.validation)
            .field("warm", &self.inner.warm)
            .field("connected", &self.inner.connection.is_connected())
            .finish()
    }
}

enum InitState {
    Idle,
    Connecting { attempt: u64, pending: PendingInit },
    Ready { handle: ConnectionHandle },
    Failed { attempt: u64, reason: String },
}

impl InitState {
    fn status(&self) -> SessionStatus {
        match self {
            Self::Idle => SessionStatus::Idle,
            Self::Connecting { .. } => SessionStatus::Connecting,
            Self::Ready { .. } => SessionStatus::Ready,
            Self::Failed { .. } => SessionStatus::Failed,
        }
    }
}

/// Owns the connection lifecycle for one device profile.
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    store: CredentialStore,
    state: Mutex<InitState>,
    next_attempt: AtomicU64,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        storage: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        let store = CredentialStore::new(storage, config.storage_key.clone(), &config.mask)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                connector,
                store,
                state: Mutex::new(InitState::Idle),
                next_attempt: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock_state().status()
    }

    /// The live handle, without initializing one.
    pub fn current(&self) -> Option<ConnectionHandle> {
        match &*self.inner.lock_state() {
            InitState::Ready { handle } if handle.is_connected() => Some(handle.clone()),
            _ => None,
        }
    }

    /// Return the live connection, initializing one if needed.
    ///
    /// `explicit` takes precedence over the stored credential when a new
    /// connection has to be opened. A blank credential counts as absent. If
    /// an initialization is already in flight the caller joins it and
    /// `explicit` is ignored.
    pub async fn get_connection(&self, explicit: Option<SessionCredential>) -> Result<ConnectionHandle> {
        let explicit = explicit.and_then(|credential| SessionCredential::non_empty(credential.into_inner()));
        let pending = {
            let mut state = self.inner.lock_state();
            let (joined, stale) = match &*state {
                InitState::Ready { handle } if handle.is_connected() => return Ok(handle.clone()),
                InitState::Connecting { attempt, pending } => {
                    debug!(attempt, "joining in-flight connection attempt");
                    (Some(pending.clone()), None)
                }
                InitState::Ready { handle } => {
                    debug!(attempt = handle.attempt(), "live connection dropped; reconnecting");
                    (None, Some(handle.clone()))
                }
                InitState::Failed { attempt, reason } => {
                    debug!(previous_attempt = attempt, reason = %reason, "retrying after failed connection attempt");
                    (None, None)
                }
                InitState::Idle => (None, None),
            };
            match joined {
                Some(pending) => pending,
                None => {
                    let (attempt, pending) = self.begin_attempt(explicit, stale);
                    *state = InitState::Connecting {
                        attempt,
                        pending: pending.clone(),
                    };
                    pending
                }
            }
        };
        pending.await
    }

    /// Tear down the live connection and delete the stored credential.
    ///
    /// Idempotent. Close failures are logged, not returned; storage failures
    /// are returned. An in-flight attempt is superseded.
    pub async fn logout(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.inner.lock_state(), InitState::Idle);
        match previous {
            InitState::Ready { handle } => close_quietly(&handle, "logout").await,
            InitState::Connecting { attempt, .. } => {
                debug!(attempt, "abandoning in-flight connection attempt on logout");
            }
            InitState::Idle | InitState::Failed { .. } => {}
        }
        self.inner.store.clear().await?;
        info!("logged out; stored session cleared");
        Ok(())
    }

    /// Persist the credential the live connection currently holds, e.g.
    /// after an interactive login completed on it.
    pub async fn save_session(&self) -> Result<()> {
        let handle = self.current().ok_or(SessionError::NoActiveConnection)?;
        let credential = handle
            .export_credential()
            .ok_or(SessionError::NotAuthenticated)?;
        self.inner.store.save(&credential).await?;
        info!(attempt = handle.attempt(), "session credential saved");
        Ok(())
    }

    /// The credential held by the live connection, if any.
    pub fn session_string(&self) -> Option<SessionCredential> {
        self.current().and_then(|handle| handle.export_credential())
    }

    /// Live check: connects if needed and asks the remote who we are.
    pub async fn is_authenticated(&self) -> bool {
        let Ok(handle) = self.get_connection(None).await else {
            return false;
        };
        handle.is_connected() && handle.get_me().await.is_ok()
    }

    pub async fn account(&self) -> Result<AccountIdentity> {
        let handle = self.get_connection(None).await?;
        Ok(handle.get_me().await?)
    }

    /// Dialog listing bounded by the configured dialog limit.
    pub async fn dialogs(&self) -> Result<Vec<DialogSummary>> {
        let handle = self.get_connection(None).await?;
        Ok(handle.list_dialogs(self.inner.config.dialog_limit).await?)
    }

    pub async fn resolve_entity(&self, id: &str) -> Result<EntityRef> {
        let handle = self.get_connection(None).await?;
        Ok(handle.resolve_entity(id).await?)
    }

    /// Spawn a new attempt. Callers must hold the state lock and install
    /// the returned attempt as `Connecting`.
    fn begin_attempt(
        &self,
        explicit: Option<SessionCredential>,
        displaced: Option<ConnectionHandle>,
    ) -> (u64, PendingInit) {
        let attempt = self.inner.next_attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            if let Some(previous) = displaced {
                close_quietly(&previous, "replaced").await;
            }
            let result = AssertUnwindSafe(inner.initialize(attempt, explicit))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(SessionError::Connectivity(format!(
                        "connection attempt {attempt} panicked"
                    )))
                });
            inner.settle(attempt, result).await
        });
        let owner = Arc::downgrade(&self.inner);
        let pending = async move {
            task.await.unwrap_or_else(|error| {
                let error = SessionError::Connectivity(format!(
                    "connection attempt {attempt} aborted: {error}"
                ));
                if let Some(inner) = owner.upgrade() {
                    inner.abandon(attempt, &error);
                }
                Err(error)
            })
        }
        .boxed()
        .shared();
        (attempt, pending)
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("status", &self.status())
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, InitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn initialize(&self, attempt: u64, explicit: Option<SessionCredential>) -> InitResult {
        let app = self.config.app_credentials()?;

        let (credential, source) = match explicit {
            Some(credential) => (Some(credential), CredentialSource::Explicit),
            None => match self.restore().await {
                Some(credential) => (Some(credential), CredentialSource::Restored),
                None => (None, CredentialSource::Anonymous),
            },
        };
        info!(attempt, source = source.as_str(), "opening connection");

        let connection = self
            .connector
            .connect(&app, credential.as_ref(), &self.config.connect)
            .await?;

        let validation =
            validator::validate(connection.as_ref(), &self.store, credential.is_some()).await;
        let warm = warmer::warm(
            connection.as_ref(),
            self.config.warm_limit,
            validation.is_confirmed(),
        )
        .await;

        Ok(ConnectionHandle::new(
            attempt, connection, source, validation, warm,
        ))
    }

    /// Load the stored credential. Never fails initialization: an
    /// unreadable record is purged, an unavailable store degrades to an
    /// in-memory session.
    async fn restore(&self) -> Option<SessionCredential> {
        match self.store.load().await {
            Ok(credential) => {
                credential.and_then(|credential| SessionCredential::non_empty(credential.into_inner()))
            }
            Err(StorageError::Corrupt(reason)) => {
                warn!(reason = %reason, "stored credential unreadable; purging");
                if let Err(error) = self.store.clear().await {
                    warn!(error = %error, "failed to purge unreadable credential");
                }
                None
            }
            Err(error) => {
                warn!(error = %error, "credential store unavailable; session will not survive reload");
                None
            }
        }
    }

    /// Mark an attempt whose task never settled (cancelled by the runtime)
    /// as failed so the next caller starts a fresh one.
    fn abandon(&self, attempt: u64, error: &SessionError) {
        let mut state = self.lock_state();
        if matches!(&*state, InitState::Connecting { attempt: pending, .. } if *pending == attempt) {
            warn!(attempt, error = %error, "connection attempt abandoned");
            *state = InitState::Failed {
                attempt,
                reason: error.to_string(),
            };
        }
    }

    /// Publish the attempt's result if it is still the one being waited on.
    async fn settle(&self, attempt: u64, result: InitResult) -> InitResult {
        let current = {
            let mut state = self.lock_state();
            let current = matches!(
                &*state,
                InitState::Connecting { attempt: pending, .. } if *pending == attempt
            );
            if current {
                *state = match &result {
                    Ok(handle) => InitState::Ready {
                        handle: handle.clone(),
                    },
                    Err(error) => InitState::Failed {
                        attempt,
                        reason: error.to_string(),
                    },
                };
            }
            current
        };

        if current {
            match &result {
                Ok(handle) => info!(
                    attempt,
                    authenticated = handle.is_authenticated(),
                    "connection ready"
                ),
                Err(error) => warn!(attempt, error = %error, "connection attempt failed"),
            }
            return result;
        }

        debug!(attempt, "discarding superseded connection attempt");
        match result {
            Ok(handle) => {
                close_quietly(&handle, "superseded").await;
                Err(SessionError::Superseded { attempt })
            }
            Err(error) => Err(error),
        }
    }
}

async fn close_quietly(handle: &ConnectionHandle, reason: &'static str) {
    if let Err(error) = handle.disconnect().await {
        warn!(attempt = handle.attempt(), reason, error = %error, "failed to close connection");
    } else {
        debug!(attempt = handle.attempt(), reason, "connection closed");
    }
}
