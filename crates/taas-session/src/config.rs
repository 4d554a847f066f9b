//! Session configuration and env resolution.

use crate::error::ConfigurationError;
use crate::mask::MaskEnvironment;
use crate::store::SESSION_KEY;

pub const ENV_API_ID: &str = "TAAS_TELEGRAM_API_ID";
pub const ENV_API_HASH: &str = "TAAS_TELEGRAM_API_HASH";
pub const ENV_USER_AGENT: &str = "TAAS_SESSION_USER_AGENT";
pub const ENV_HOST: &str = "TAAS_SESSION_HOST";

pub const DEFAULT_CONNECTION_RETRIES: u32 = 5;
pub const DEFAULT_WARM_LIMIT: usize = 50;
pub const DEFAULT_DIALOG_LIMIT: usize = 100;
pub const DEFAULT_HOST: &str = "localhost";

/// Validated app-level identifiers. They identify the application, not the
/// user, and are safe to ship to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCredentials {
    pub api_id: i32,
    pub api_hash: String,
}

/// Options handed through to the connection primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub connection_retries: u32,
    /// Secure websocket transport (what a browser can open).
    pub use_wss: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connection_retries: DEFAULT_CONNECTION_RETRIES,
            use_wss: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Raw app id as configured; validated on initialization.
    pub api_id: String,
    pub api_hash: String,
    pub storage_key: String,
    /// Upper bound for the post-connect entity cache warm listing.
    pub warm_limit: usize,
    /// Upper bound for [`crate::SessionManager::dialogs`].
    pub dialog_limit: usize,
    pub connect: ConnectOptions,
    pub mask: MaskEnvironment,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_id: String::new(),
            api_hash: String::new(),
            storage_key: SESSION_KEY.to_string(),
            warm_limit: DEFAULT_WARM_LIMIT,
            dialog_limit: DEFAULT_DIALOG_LIMIT,
            connect: ConnectOptions::default(),
            mask: MaskEnvironment::new(default_user_agent(), DEFAULT_HOST),
        }
    }
}

impl SessionConfig {
    /// Config with explicit app identifiers and defaults for the rest.
    pub fn new(api_id: i32, api_hash: impl Into<String>) -> Self {
        Self {
            api_id: api_id.to_string(),
            api_hash: api_hash.into(),
            ..Self::default()
        }
    }

    /// Resolve from the process environment. Never fails: missing app
    /// identifiers surface as a configuration error when a connection is
    /// first requested.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_id: env_non_empty(ENV_API_ID).unwrap_or_default(),
            api_hash: env_non_empty(ENV_API_HASH).unwrap_or_default(),
            mask: MaskEnvironment::new(
                env_non_empty(ENV_USER_AGENT).unwrap_or(defaults.mask.user_agent.clone()),
                env_non_empty(ENV_HOST).unwrap_or(defaults.mask.host.clone()),
            ),
            ..defaults
        }
    }

    pub fn with_mask_environment(mut self, mask: MaskEnvironment) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_warm_limit(mut self, limit: usize) -> Self {
        self.warm_limit = limit;
        self
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn app_credentials(&self) -> Result<AppCredentials, ConfigurationError> {
        let raw_id = self.api_id.trim();
        if raw_id.is_empty() || raw_id == "0" {
            return Err(ConfigurationError::MissingApiId);
        }
        let api_id = raw_id
            .parse::<i32>()
            .ok()
            .filter(|id| *id != 0)
            .ok_or_else(|| ConfigurationError::InvalidApiId(raw_id.to_string()))?;

        let api_hash = self.api_hash.trim();
        if api_hash.is_empty() {
            return Err(ConfigurationError::MissingApiHash);
        }

        Ok(AppCredentials {
            api_id,
            api_hash: api_hash.to_string(),
        })
    }
}

fn default_user_agent() -> String {
    format!(
        "taas-session/{} ({})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    )
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
