//! Best-effort entity cache warming after connect.

use serde::Serialize;
use tracing::{info, warn};

use crate::transport::RemoteConnection;

/// Recorded result of the warm step. Never propagated as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WarmOutcome {
    Warmed { entities: usize },
    Skipped { reason: SkipReason },
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No confirmed identity to list dialogs for.
    Unauthenticated,
    /// Warm limit configured as zero.
    Disabled,
}

/// Issue one bounded dialog listing so later address-by-id lookups resolve
/// from the connection's cache.
pub async fn warm(connection: &dyn RemoteConnection, limit: usize, authenticated: bool) -> WarmOutcome {
    if limit == 0 {
        return WarmOutcome::Skipped {
            reason: SkipReason::Disabled,
        };
    }
    if !authenticated {
        return WarmOutcome::Skipped {
            reason: SkipReason::Unauthenticated,
        };
    }

    match connection.list_dialogs(limit).await {
        Ok(dialogs) => {
            info!(limit, entities = dialogs.len(), "entity cache populated");
            WarmOutcome::Warmed {
                entities: dialogs.len(),
            }
        }
        Err(error) => {
            warn!(limit, error = %error, "failed to populate entity cache");
            WarmOutcome::Failed {
                reason: error.to_string(),
            }
        }
    }
}
