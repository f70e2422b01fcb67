//! Scripted in-memory remote backend.
//!
//! Test support for worker and gateway flows: the connector hands out
//! clients over a fixed directory, every forwarded command is recorded on a
//! shared probe, and the probe can push remote events into the live client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::credential::StoredCredential;
use crate::remote::{
    PresenceSnapshot, RemoteClient, RemoteConnector, RemoteDirectory, RemoteError, RemoteEvent,
};

/// A command a scripted client has forwarded to the "service".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentCommand {
    Chat {
        conversation_id: String,
        text: String,
    },
    Typing {
        conversation_id: String,
        typing: bool,
    },
    Disconnect,
}

#[derive(Default)]
struct ProbeInner {
    sent: Mutex<Vec<SentCommand>>,
    events: Mutex<Option<mpsc::UnboundedSender<RemoteEvent>>>,
}

/// Shared observer for a scripted client: records forwarded commands and
/// injects remote events.
#[derive(Clone, Default)]
pub struct RemoteProbe {
    inner: Arc<ProbeInner>,
}

impl RemoteProbe {
    /// Commands forwarded so far, in order.
    pub fn sent(&self) -> Vec<SentCommand> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// Push a remote event into the connected client. Returns false when no
    /// client is connected.
    pub fn push_event(&self, event: RemoteEvent) -> bool {
        match self.inner.events.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Drop the event stream, simulating a lost remote connection.
    pub fn close_events(&self) {
        self.inner.events.lock().unwrap().take();
    }

    fn record(&self, command: SentCommand) {
        self.inner.sent.lock().unwrap().push(command);
    }
}

/// Connector handing out scripted clients over a fixed directory.
pub struct ScriptedConnector {
    directory: RemoteDirectory,
    direct: HashMap<String, String>,
    probe: RemoteProbe,
    fail_auth: Option<String>,
}

impl ScriptedConnector {
    pub fn new(directory: RemoteDirectory) -> Self {
        Self {
            directory,
            direct: HashMap::new(),
            probe: RemoteProbe::default(),
            fail_auth: None,
        }
    }

    /// Connector whose authentication always fails with `reason`.
    pub fn failing(reason: &str) -> Self {
        let mut connector = Self::new(RemoteDirectory::default());
        connector.fail_auth = Some(reason.to_string());
        connector
    }

    /// Map a contact id to its one-to-one conversation id.
    pub fn with_direct(mut self, contact_id: &str, conversation_id: &str) -> Self {
        self.direct
            .insert(contact_id.to_string(), conversation_id.to_string());
        self
    }

    /// The probe shared with every client this connector hands out.
    pub fn probe(&self) -> RemoteProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl RemoteConnector for ScriptedConnector {
    async fn authenticate(
        &self,
        _credential: &StoredCredential,
    ) -> Result<Box<dyn RemoteClient>, RemoteError> {
        if let Some(reason) = &self.fail_auth {
            return Err(RemoteError::Auth(reason.clone()));
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        *self.probe.inner.events.lock().unwrap() = Some(events_tx);
        Ok(Box::new(ScriptedClient {
            directory: self.directory.clone(),
            direct: self.direct.clone(),
            probe: self.probe.clone(),
            events: Some(events_rx),
        }))
    }
}

struct ScriptedClient {
    directory: RemoteDirectory,
    direct: HashMap<String, String>,
    probe: RemoteProbe,
    events: Option<mpsc::UnboundedReceiver<RemoteEvent>>,
}

#[async_trait]
impl RemoteClient for ScriptedClient {
    async fn connect(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), RemoteError> {
        self.probe.record(SentCommand::Disconnect);
        Ok(())
    }

    async fn fetch_directory(&mut self) -> Result<RemoteDirectory, RemoteError> {
        Ok(self.directory.clone())
    }

    async fn query_presence(
        &mut self,
        _contact_ids: &[String],
    ) -> Result<Vec<PresenceSnapshot>, RemoteError> {
        // The scripted directory already carries the statuses the test wants.
        Ok(Vec::new())
    }

    async fn send_chat_message(
        &mut self,
        conversation_id: &str,
        text: &str,
    ) -> Result<(), RemoteError> {
        self.probe.record(SentCommand::Chat {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn set_typing(&mut self, conversation_id: &str, typing: bool) -> Result<(), RemoteError> {
        self.probe.record(SentCommand::Typing {
            conversation_id: conversation_id.to_string(),
            typing,
        });
        Ok(())
    }

    fn take_events(&mut self) -> mpsc::UnboundedReceiver<RemoteEvent> {
        self.events.take().unwrap_or_else(|| {
            let (_tx, rx) = mpsc::unbounded_channel();
            rx
        })
    }

    fn direct_conversation(&self, contact_id: &str) -> Option<String> {
        self.direct.get(contact_id).cloned()
    }
}
