//! Opaque session credential.

use std::fmt;

/// Opaque session credential for the remote service.
///
/// Never parsed. It is only stored, loaded, and handed to the connection
/// primitive. `Debug` redacts the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential(String);

impl SessionCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Wrap a value, treating an empty or whitespace-only string as "no
    /// credential" (the remote client uses an empty session for anonymous).
    pub fn non_empty(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionCredential(<{} bytes>)", self.0.len())
    }
}

impl From<String> for SessionCredential {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionCredential {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
