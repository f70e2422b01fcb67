//! Registry of session workers.
//!
//! Maps bridged users to their running workers. Owned by the bridge and
//! injected into the gateway; lookups and dispatch are lock-free reads on a
//! concurrent map.

use std::sync::Arc;

use dashmap::DashMap;
use jid::BareJid;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::credential::StoredCredential;
use crate::event::{BridgeEvent, ControlMessage, EventPayload};
use crate::remote::RemoteConnector;
use crate::worker::{self, SessionHandle};

/// Registry mapping bridged users to their session workers.
///
/// The registry exclusively owns worker lifetimes: spawn registers, remove
/// unregisters. Removing never stops a worker; callers must have dispatched
/// [`ControlMessage::Disconnect`] first.
pub struct SessionRegistry {
    workers: DashMap<BareJid, SessionHandle>,
    connector: Arc<dyn RemoteConnector>,
    events: mpsc::UnboundedSender<BridgeEvent>,
}

impl SessionRegistry {
    /// Create a registry whose workers authenticate through `connector` and
    /// emit onto the shared `events` queue.
    pub fn new(
        connector: Arc<dyn RemoteConnector>,
        events: mpsc::UnboundedSender<BridgeEvent>,
    ) -> Self {
        Self {
            workers: DashMap::new(),
            connector,
            events,
        }
    }

    /// Spawn and register a worker for `user`.
    ///
    /// Idempotent: when a worker is already registered for the user this is
    /// a no-op returning false. Returns true when a new worker was started.
    pub fn spawn(&self, user: &BareJid, credential: StoredCredential) -> bool {
        if self.workers.contains_key(user) {
            debug!(user = %user, "Session worker already registered");
            return false;
        }
        match worker::spawn(
            user.clone(),
            credential,
            Arc::clone(&self.connector),
            self.events.clone(),
        ) {
            Ok(handle) => {
                self.workers.insert(user.clone(), handle);
                info!(user = %user, "Spawned session worker");
                true
            }
            Err(e) => {
                warn!(user = %user, error = %e, "Failed to spawn session worker");
                let _ = self.events.send(BridgeEvent::new(
                    user.clone(),
                    EventPayload::SessionFailed {
                        reason: e.to_string(),
                    },
                ));
                false
            }
        }
    }

    /// Whether a worker is registered for `user`.
    pub fn contains(&self, user: &BareJid) -> bool {
        self.workers.contains_key(user)
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Unregister `user`'s worker without stopping it. No-op when no worker
    /// is registered.
    pub fn remove(&self, user: &BareJid) -> bool {
        let removed = self.workers.remove(user).is_some();
        if removed {
            debug!(user = %user, "Unregistered session worker");
        }
        removed
    }

    /// Hand a control message to `user`'s worker. Fire-and-forget: the
    /// message is silently dropped when no worker is registered or the
    /// worker's loop has already stopped.
    pub fn dispatch(&self, user: &BareJid, message: ControlMessage) {
        match self.workers.get(user) {
            Some(entry) => {
                if !entry.value().submit(message) {
                    debug!(user = %user, "Worker command queue closed; dropping message");
                }
            }
            None => {
                debug!(user = %user, "No session worker; dropping control message");
            }
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("workers", &self.workers.len())
            .finish()
    }
}
