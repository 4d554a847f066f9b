//! Reversible masking for the persisted credential record.
//!
//! Known limitation: the mask key is derived from non-secret environment
//! values (a truncated user agent and the host). Anyone with access to the
//! same environment can derive it and unmask the record. This keeps the
//! credential out of storage as grep-able cleartext; it is obfuscation, not
//! encryption, and must not be relied on for confidentiality.
//!
//! The seed is truncated to [`MASK_KEY_LEN`] characters after the user agent
//! prefix is inserted, so any user agent of 27 or more characters fills the
//! whole key and the host never contributes. For real browser user agents
//! the key depends on the user agent alone.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::credential::SessionCredential;
use crate::error::StorageError;

/// Maximum key length in characters.
pub const MASK_KEY_LEN: usize = 32;
const USER_AGENT_PREFIX_LEN: usize = 32;
const KEY_PREFIX: &str = "taas";

/// Stable, non-secret values the mask key is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskEnvironment {
    pub user_agent: String,
    pub host: String,
}

impl MaskEnvironment {
    pub fn new(user_agent: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            host: host.into(),
        }
    }
}

/// Symmetric XOR key, applied cyclically over the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskKey(Vec<u8>);

impl MaskKey {
    /// Derive the key deterministically. Never empty: the fixed prefix is
    /// always present.
    #[must_use]
    pub fn derive(environment: &MaskEnvironment) -> Self {
        let user_agent = environment
            .user_agent
            .chars()
            .take(USER_AGENT_PREFIX_LEN)
            .collect::<String>();
        let seed = format!("{KEY_PREFIX}-{user_agent}-{}", environment.host);
        let key = seed.chars().take(MASK_KEY_LEN).collect::<String>();
        Self(key.into_bytes())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// XOR `data` against the key. Applying twice is the identity.
    #[must_use]
    pub fn apply(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .zip(self.0.iter().cycle())
            .map(|(byte, key)| byte ^ key)
            .collect()
    }

    /// Mask a credential into its storage-safe text form.
    #[must_use]
    pub fn seal(&self, credential: &SessionCredential) -> String {
        STANDARD.encode(self.apply(credential.expose().as_bytes()))
    }

    /// Reverse [`MaskKey::seal`].
    ///
    /// A record written under a different key usually fails here with
    /// `StorageError::Corrupt` because the unmasked bytes are not UTF-8.
    pub fn open(&self, record: &str) -> Result<SessionCredential, StorageError> {
        let masked = STANDARD
            .decode(record.trim())
            .map_err(|error| StorageError::Corrupt(format!("record is not base64: {error}")))?;
        let plain = String::from_utf8(self.apply(&masked)).map_err(|_| {
            StorageError::Corrupt("unmasked record is not valid UTF-8".to_string())
        })?;
        Ok(SessionCredential::new(plain))
    }
}
