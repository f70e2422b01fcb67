//! Boundary to the proprietary remote chat service.
//!
//! The gateway never speaks the remote wire protocol itself; everything it
//! needs from the service's client library is expressed by the
//! [`RemoteConnector`]/[`RemoteClient`] trait pair. All client methods are
//! suspension points of the owning worker's single-threaded loop.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::credential::StoredCredential;
use crate::event::{ChatScope, ContactInfo, ConversationInfo, PresenceStatus, TypingState};

/// Remote service errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Full directory snapshot fetched right after connecting.
#[derive(Debug, Clone, Default)]
pub struct RemoteDirectory {
    pub contacts: Vec<ContactInfo>,
    pub conversations: Vec<ConversationInfo>,
}

/// One contact's presence as returned by a batched presence query.
#[derive(Debug, Clone)]
pub struct PresenceSnapshot {
    pub contact_id: String,
    pub status: PresenceStatus,
    pub status_message: Option<String>,
}

/// Push notification delivered on the remote event stream.
///
/// `sender_is_self` marks events caused by the bridged user's own actions;
/// workers filter those out so nothing echoes back to XMPP.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    PresenceChanged {
        contact_id: String,
        status: PresenceStatus,
        status_message: Option<String>,
    },
    MessageReceived {
        conversation_id: String,
        conversation_kind: ChatScope,
        sender_id: String,
        sender_is_self: bool,
        text: String,
    },
    TypingChanged {
        conversation_id: String,
        conversation_kind: ChatScope,
        sender_id: String,
        sender_is_self: bool,
        state: TypingState,
    },
}

/// A live, authenticated connection to the remote service.
#[async_trait]
pub trait RemoteClient: Send {
    /// Complete the connection; resolves once the service reports connected.
    async fn connect(&mut self) -> Result<(), RemoteError>;

    async fn disconnect(&mut self) -> Result<(), RemoteError>;

    /// Fetch the full contact and conversation directory.
    async fn fetch_directory(&mut self) -> Result<RemoteDirectory, RemoteError>;

    /// Query presence for a batch of contacts.
    async fn query_presence(
        &mut self,
        contact_ids: &[String],
    ) -> Result<Vec<PresenceSnapshot>, RemoteError>;

    /// Send a text message into a conversation (one-to-one or group).
    async fn send_chat_message(
        &mut self,
        conversation_id: &str,
        text: &str,
    ) -> Result<(), RemoteError>;

    /// Update the typing indicator in a conversation.
    async fn set_typing(&mut self, conversation_id: &str, typing: bool) -> Result<(), RemoteError>;

    /// Take the push event stream. May only be taken once; later calls
    /// return a closed receiver.
    fn take_events(&mut self) -> mpsc::UnboundedReceiver<RemoteEvent>;

    /// Resolve the one-to-one conversation with a contact, if one exists.
    fn direct_conversation(&self, contact_id: &str) -> Option<String>;
}

/// Authenticates stored credentials into live clients.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn authenticate(
        &self,
        credential: &StoredCredential,
    ) -> Result<Box<dyn RemoteClient>, RemoteError>;
}
