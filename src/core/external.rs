//! Collaborators the gateway relies on but does not implement
//!
//! Identity assertion, encryption keyed by key reference and object storage
//! are consumed through these traits. The in-memory implementations here back
//! tests and local setups.

use crate::error::{GateError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Identity asserted for a session by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAssertion {
    /// Principal ARN the session acts as
    pub principal: String,
    pub account_id: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionAssertion {
    pub fn new(
        principal: impl Into<String>,
        account_id: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        SessionAssertion {
            principal: principal.into(),
            account_id: account_id.into(),
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Issues session assertions for bearer tokens
pub trait IdentityProvider: Send + Sync {
    /// # Errors
    ///
    /// `IdentityRejected` when the token is unknown or revoked.
    fn assert_identity(&self, token: &str) -> Result<SessionAssertion>;
}

/// Encrypt/decrypt primitive keyed by key reference
pub trait KeyService: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], key_ref: &str) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8], key_ref: &str) -> Result<Vec<u8>>;
}

/// Object storage keyed by resource path (`bucket/key`)
pub trait ObjectStorage: Send + Sync {
    /// # Errors
    ///
    /// `NoSuchKey` when nothing is stored at `path`.
    fn read(&self, path: &str) -> Result<Vec<u8>>;
    fn write(&self, path: &str, data: &[u8]) -> Result<()>;
    /// Paths under `prefix`, in lexicographic order
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Token table identity provider
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    sessions: RwLock<HashMap<String, SessionAssertion>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, token: impl Into<String>, assertion: SessionAssertion) {
        self.sessions.write().insert(token.into(), assertion);
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn assert_identity(&self, token: &str) -> Result<SessionAssertion> {
        self.sessions
            .read()
            .get(token)
            .cloned()
            .ok_or_else(|| GateError::IdentityRejected("unknown session token".to_string()))
    }
}

/// In-memory object storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStorage for MemoryStorage {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| GateError::NoSuchKey(path.to_string()))
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.objects.write().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect())
    }
}
