//! Persisted registration credentials and the store boundary.
//!
//! The gateway persists one record per bridged user, keyed by the user's
//! bare address. The store must survive a process restart; the trait only
//! promises the key/value contract, the backing mechanics live behind it.

use std::collections::HashMap;
use std::sync::Mutex;

use jid::BareJid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Credential record persisted per bridged user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Authorization URL the user completed the remote sign-in flow at.
    pub url: String,
    /// Token obtained from that flow; authenticates the remote session.
    pub auth_token: String,
    /// The user accepted the gateway's presence subscription.
    #[serde(default)]
    pub subscribed: bool,
    /// The user revoked their subscription to the gateway.
    #[serde(default)]
    pub unsubscribed: bool,
}

impl StoredCredential {
    /// Fresh record as written by a successful registration.
    pub fn new(url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: auth_token.into(),
            subscribed: false,
            unsubscribed: false,
        }
    }
}

/// Credential store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record (or the whole store file) could not be decoded.
    #[error("corrupt store record: {0}")]
    Corrupt(String),
}

/// Key/value contract the gateway persists registrations through.
///
/// Keys are bare user addresses. `remove` reports whether a record existed;
/// `flush` makes prior writes durable.
pub trait CredentialStore: Send + Sync {
    fn get(&self, user: &BareJid) -> Result<Option<StoredCredential>, StoreError>;
    fn set(&self, user: &BareJid, credential: &StoredCredential) -> Result<(), StoreError>;
    fn remove(&self, user: &BareJid) -> Result<bool, StoreError>;
    fn contains(&self, user: &BareJid) -> Result<bool, StoreError>;
    fn flush(&self) -> Result<(), StoreError>;
}

/// In-memory credential store.
///
/// Not durable; used by tests and embeddings that manage persistence
/// themselves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, StoredCredential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, user: &BareJid) -> Result<Option<StoredCredential>, StoreError> {
        Ok(self
            .records
            .lock()
            .expect("credential store lock poisoned")
            .get(&user.to_string())
            .cloned())
    }

    fn set(&self, user: &BareJid, credential: &StoredCredential) -> Result<(), StoreError> {
        self.records
            .lock()
            .expect("credential store lock poisoned")
            .insert(user.to_string(), credential.clone());
        Ok(())
    }

    fn remove(&self, user: &BareJid) -> Result<bool, StoreError> {
        Ok(self
            .records
            .lock()
            .expect("credential store lock poisoned")
            .remove(&user.to_string())
            .is_some())
    }

    fn contains(&self, user: &BareJid) -> Result<bool, StoreError> {
        Ok(self
            .records
            .lock()
            .expect("credential store lock poisoned")
            .contains_key(&user.to_string()))
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
