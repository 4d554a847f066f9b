//! Seam to the remote service's connection primitive.
//!
//! The wire protocol lives behind these traits; this crate only drives the
//! lifecycle around them.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AppCredentials, ConnectOptions};
use crate::credential::SessionCredential;
use crate::error::TransportError;

/// The account a credential authenticates as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Group,
    Channel,
}

/// One conversation as returned by a dialog listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogSummary {
    pub id: String,
    pub title: String,
    pub kind: EntityKind,
}

/// A resolved remote entity, addressable by id in later transfer calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// An open channel to the remote service.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Lightweight "who am I".
    async fn get_me(&self) -> Result<AccountIdentity, TransportError>;

    /// List at most `limit` dialogs. Populates the connection's internal
    /// address-resolution cache as a side effect.
    async fn list_dialogs(&self, limit: usize) -> Result<Vec<DialogSummary>, TransportError>;

    async fn resolve_entity(&self, id: &str) -> Result<EntityRef, TransportError>;

    /// The credential the connection currently holds, if authenticated.
    fn export_credential(&self) -> Option<SessionCredential>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection, authenticated with `credential` when given and
    /// anonymous otherwise.
    async fn connect(
        &self,
        app: &AppCredentials,
        credential: Option<&SessionCredential>,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn RemoteConnection>, TransportError>;
}
