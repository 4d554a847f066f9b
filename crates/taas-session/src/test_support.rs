//! Scripted fakes for the transport and storage seams.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::{AppCredentials, ConnectOptions, SessionConfig};
use crate::credential::SessionCredential;
use crate::error::{StorageError, TransportError};
use crate::manager::{SessionManager, SessionStatus};
use crate::mask::MaskEnvironment;
use crate::storage::{MemoryStorage, StorageBackend, StorageScope};
use crate::store::SESSION_KEY;
use crate::transport::{
    AccountIdentity, Connector, DialogSummary, EntityKind, EntityRef, RemoteConnection,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn label(credential: Option<&SessionCredential>) -> String {
    credential.map_or_else(|| "anonymous".to_string(), |value| value.expose().to_string())
}

/// Ordered record of side effects across fakes.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        lock(&self.0).push(event.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    pub fn clear(&self) {
        lock(&self.0).clear();
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.entries().iter().position(|entry| entry == event)
    }
}

pub struct FakeConnection {
    label: String,
    account: Option<AccountIdentity>,
    connected: AtomicBool,
    exported: Mutex<Option<SessionCredential>>,
    listing_fails: AtomicBool,
    disconnect_fails: AtomicBool,
    get_me_calls: AtomicUsize,
    disconnects: AtomicUsize,
    list_limits: Mutex<Vec<usize>>,
    log: EventLog,
}

impl FakeConnection {
    fn build(
        credential: Option<SessionCredential>,
        account: Option<AccountIdentity>,
        log: EventLog,
    ) -> Arc<Self> {
        let exported = account.as_ref().and(credential.clone());
        Arc::new(Self {
            label: label(credential.as_ref()),
            account,
            connected: AtomicBool::new(true),
            exported: Mutex::new(exported),
            listing_fails: AtomicBool::new(false),
            disconnect_fails: AtomicBool::new(false),
            get_me_calls: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            list_limits: Mutex::new(Vec::new()),
            log,
        })
    }

    pub fn anonymous(log: EventLog) -> Arc<Self> {
        Self::build(None, None, log)
    }

    pub fn authenticated(credential: SessionCredential, account_id: i64, log: EventLog) -> Arc<Self> {
        let account = AccountIdentity {
            id: account_id,
            username: Some(format!("user{account_id}")),
            display_name: None,
        };
        Self::build(Some(credential), Some(account), log)
    }

    pub fn rejected(credential: SessionCredential, log: EventLog) -> Arc<Self> {
        Self::build(Some(credential), None, log)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn fail_listing(&self) {
        self.listing_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_disconnect(&self) {
        self.disconnect_fails.store(true, Ordering::SeqCst);
    }

    /// Simulate the remote side dropping the link.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Simulate an interactive login finishing on this connection.
    pub fn complete_login(&self, credential: SessionCredential) {
        *lock(&self.exported) = Some(credential);
    }

    pub fn get_me_calls(&self) -> usize {
        self.get_me_calls.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn list_limits(&self) -> Vec<usize> {
        lock(&self.list_limits).clone()
    }
}

#[async_trait]
impl RemoteConnection for FakeConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_me(&self) -> Result<AccountIdentity, TransportError> {
        self.get_me_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        self.account
            .clone()
            .ok_or_else(|| TransportError::Unauthorized("AUTH_KEY_UNREGISTERED".to_string()))
    }

    async fn list_dialogs(&self, limit: usize) -> Result<Vec<DialogSummary>, TransportError> {
        lock(&self.list_limits).push(limit);
        if self.listing_fails.load(Ordering::SeqCst) {
            return Err(TransportError::Rpc {
                code: 420,
                message: "FLOOD_WAIT_3".to_string(),
            });
        }
        Ok((0..limit.min(3))
            .map(|index| DialogSummary {
                id: format!("-100{index}"),
                title: format!("storage {index}"),
                kind: EntityKind::Channel,
            })
            .collect())
    }

    async fn resolve_entity(&self, id: &str) -> Result<EntityRef, TransportError> {
        Ok(EntityRef {
            id: id.to_string(),
            kind: EntityKind::Channel,
            title: Some(format!("entity {id}")),
        })
    }

    fn export_credential(&self) -> Option<SessionCredential> {
        lock(&self.exported).clone()
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("disconnect:{}", self.label));
        if self.disconnect_fails.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("socket already gone".to_string()));
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector whose remote side accepts a configurable set of credentials.
#[derive(Default)]
pub struct FakeConnector {
    accepted: Mutex<HashMap<String, i64>>,
    failures: Mutex<VecDeque<TransportError>>,
    gate: Option<Arc<Semaphore>>,
    listing_fails: AtomicBool,
    disconnect_fails: AtomicBool,
    attempts: AtomicUsize,
    seen: Mutex<Vec<Option<SessionCredential>>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    log: EventLog,
}

impl FakeConnector {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Block every connect until a permit is added to `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn accept(&self, credential: &str, account_id: i64) {
        lock(&self.accepted).insert(credential.to_string(), account_id);
    }

    pub fn fail_next(&self, error: TransportError) {
        lock(&self.failures).push_back(error);
    }

    pub fn fail_listing(&self) {
        self.listing_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_disconnect(&self) {
        self.disconnect_fails.store(true, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Option<SessionCredential>> {
        lock(&self.seen).clone()
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        lock(&self.connections).clone()
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections()
            .get(index)
            .cloned()
            .unwrap_or_else(|| panic!("no connection #{index} was opened"))
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _app: &AppCredentials,
        credential: Option<&SessionCredential>,
        _options: &ConnectOptions,
    ) -> Result<Arc<dyn RemoteConnection>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        lock(&self.seen).push(credential.cloned());
        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }
        let scripted = lock(&self.failures).pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }

        self.log.push(format!("connect:{}", label(credential)));
        let connection = match credential {
            None => FakeConnection::anonymous(self.log.clone()),
            Some(credential) => {
                let account_id = lock(&self.accepted).get(credential.expose()).copied();
                match account_id {
                    Some(id) => {
                        FakeConnection::authenticated(credential.clone(), id, self.log.clone())
                    }
                    None => FakeConnection::rejected(credential.clone(), self.log.clone()),
                }
            }
        };
        if self.listing_fails.load(Ordering::SeqCst) {
            connection.fail_listing();
        }
        if self.disconnect_fails.load(Ordering::SeqCst) {
            connection.fail_disconnect();
        }
        lock(&self.connections).push(Arc::clone(&connection));
        Ok(connection)
    }
}

/// Backend whose substrate is unavailable (disabled storage, quota).
#[derive(Debug, Default)]
pub struct FailingStorage;

#[async_trait]
impl StorageBackend for FailingStorage {
    async fn open(&self) -> Result<Box<dyn StorageScope>, StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }
}

/// Memory backend that records writes into an [`EventLog`].
#[derive(Debug, Clone)]
pub struct RecordingStorage {
    inner: MemoryStorage,
    log: EventLog,
}

impl RecordingStorage {
    pub fn new(inner: MemoryStorage, log: EventLog) -> Self {
        Self { inner, log }
    }
}

#[async_trait]
impl StorageBackend for RecordingStorage {
    async fn open(&self) -> Result<Box<dyn StorageScope>, StorageError> {
        Ok(Box::new(RecordingScope {
            inner: self.inner.open().await?,
            log: self.log.clone(),
        }))
    }
}

struct RecordingScope {
    inner: Box<dyn StorageScope>,
    log: EventLog,
}

#[async_trait]
impl StorageScope for RecordingScope {
    async fn get(&mut self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(key).await
    }

    async fn put(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.log.push("store:put");
        self.inner.put(key, value).await
    }

    async fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.log.push("store:delete");
        self.inner.delete(key).await
    }
}

pub fn test_config() -> SessionConfig {
    SessionConfig::new(2040, "b18441a1ff607e10a989891a5462e627")
        .with_mask_environment(MaskEnvironment::new("test-agent/1.0", "test.host"))
}

/// A manager wired to fakes.
pub struct Harness {
    pub manager: SessionManager,
    pub connector: Arc<FakeConnector>,
    pub storage: MemoryStorage,
    pub log: EventLog,
}

impl Harness {
    pub fn new() -> Self {
        let log = EventLog::default();
        Self::with_connector(test_config(), FakeConnector::new(log.clone()), log)
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        let log = EventLog::default();
        Self::with_connector(test_config(), FakeConnector::new(log.clone()).gated(gate), log)
    }

    pub fn with_connector(config: SessionConfig, connector: FakeConnector, log: EventLog) -> Self {
        let storage = MemoryStorage::new();
        let connector = Arc::new(connector);
        let manager = SessionManager::new(
            config,
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::new(RecordingStorage::new(storage.clone(), log.clone())),
        )
        .unwrap_or_else(|error| panic!("harness manager: {error}"));
        Self {
            manager,
            connector,
            storage,
            log,
        }
    }

    /// Store `credential` as if a previous page load had saved it.
    pub async fn seed(&self, credential: &str) {
        self.manager
            .store()
            .save(&SessionCredential::new(credential))
            .await
            .unwrap_or_else(|error| panic!("seed credential: {error}"));
    }

    pub async fn stored(&self) -> Option<SessionCredential> {
        self.manager
            .store()
            .load()
            .await
            .unwrap_or_else(|error| panic!("load credential: {error}"))
    }

    pub fn raw_record(&self) -> Option<String> {
        self.storage.raw(SESSION_KEY)
    }
}

/// Yield until the manager reports `status`.
pub async fn wait_for_status(manager: &SessionManager, status: SessionStatus) {
    for _ in 0..10_000 {
        if manager.status() == status {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("manager never reached {status:?}, stuck at {:?}", manager.status());
}
