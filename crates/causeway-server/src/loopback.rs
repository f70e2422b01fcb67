//! Loopback remote backend.
//!
//! A tiny built-in "service" for development and manual testing: a fixed
//! directory with one echo contact and one group conversation. Every chat
//! message to the echo contact comes straight back, preceded by a typing
//! burst, so the whole bridge can be exercised without the real service.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use causeway_session::{
    ChatScope, ContactInfo, ConversationInfo, PresenceSnapshot, PresenceStatus, RemoteClient,
    RemoteConnector, RemoteDirectory, RemoteError, RemoteEvent, StoredCredential, TypingState,
};

const ECHO_CONTACT_ID: &str = "echo";
const ECHO_CONVERSATION_ID: &str = "dm-echo";
const LOUNGE_CONVERSATION_ID: &str = "lounge";
const SELF_ID: &str = "self";

#[derive(Default)]
pub struct LoopbackConnector;

impl LoopbackConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteConnector for LoopbackConnector {
    async fn authenticate(
        &self,
        _credential: &StoredCredential,
    ) -> Result<Box<dyn RemoteClient>, RemoteError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Box::new(LoopbackClient {
            feedback: events_tx,
            events: Some(events_rx),
        }))
    }
}

struct LoopbackClient {
    feedback: mpsc::UnboundedSender<RemoteEvent>,
    events: Option<mpsc::UnboundedReceiver<RemoteEvent>>,
}

#[async_trait]
impl RemoteClient for LoopbackClient {
    async fn connect(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn fetch_directory(&mut self) -> Result<RemoteDirectory, RemoteError> {
        Ok(RemoteDirectory {
            contacts: vec![ContactInfo {
                contact_id: ECHO_CONTACT_ID.to_string(),
                display_name: "Echo".to_string(),
                full_name: "Echo Service".to_string(),
                emails: vec![],
                phones: vec![],
                avatar_url: None,
                status: PresenceStatus::Online,
                status_message: Some("repeats everything".to_string()),
            }],
            conversations: vec![ConversationInfo {
                conversation_id: LOUNGE_CONVERSATION_ID.to_string(),
                topic: "Loopback Lounge".to_string(),
                participants: HashMap::from([
                    (SELF_ID.to_string(), "You".to_string()),
                    (ECHO_CONTACT_ID.to_string(), "Echo".to_string()),
                ]),
                self_id: SELF_ID.to_string(),
            }],
        })
    }

    async fn query_presence(
        &mut self,
        _contact_ids: &[String],
    ) -> Result<Vec<PresenceSnapshot>, RemoteError> {
        Ok(vec![PresenceSnapshot {
            contact_id: ECHO_CONTACT_ID.to_string(),
            status: PresenceStatus::Online,
            status_message: Some("repeats everything".to_string()),
        }])
    }

    async fn send_chat_message(
        &mut self,
        conversation_id: &str,
        text: &str,
    ) -> Result<(), RemoteError> {
        debug!(conversation = %conversation_id, "Echoing message");
        let (kind, sender) = match conversation_id {
            LOUNGE_CONVERSATION_ID => (ChatScope::Group, ECHO_CONTACT_ID),
            _ => (ChatScope::Direct, ECHO_CONTACT_ID),
        };
        let _ = self.feedback.send(RemoteEvent::TypingChanged {
            conversation_id: conversation_id.to_string(),
            conversation_kind: kind,
            sender_id: sender.to_string(),
            sender_is_self: false,
            state: TypingState::Started,
        });
        let _ = self.feedback.send(RemoteEvent::MessageReceived {
            conversation_id: conversation_id.to_string(),
            conversation_kind: kind,
            sender_id: sender.to_string(),
            sender_is_self: false,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn set_typing(&mut self, conversation_id: &str, typing: bool) -> Result<(), RemoteError> {
        debug!(conversation = %conversation_id, typing, "Ignoring typing update");
        Ok(())
    }

    fn take_events(&mut self) -> mpsc::UnboundedReceiver<RemoteEvent> {
        self.events.take().unwrap_or_else(|| {
            let (_tx, rx) = mpsc::unbounded_channel();
            rx
        })
    }

    fn direct_conversation(&self, contact_id: &str) -> Option<String> {
        (contact_id == ECHO_CONTACT_ID).then(|| ECHO_CONVERSATION_ID.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_replies_to_direct_messages() {
        let connector = LoopbackConnector::new();
        let mut client = connector
            .authenticate(&StoredCredential::default())
            .await
            .unwrap();
        let mut events = client.take_events();

        client
            .send_chat_message(ECHO_CONVERSATION_ID, "ping")
            .await
            .unwrap();

        let first = events.recv().await.unwrap();
        assert!(matches!(
            first,
            RemoteEvent::TypingChanged {
                state: TypingState::Started,
                ..
            }
        ));
        let second = events.recv().await.unwrap();
        assert!(matches!(
            second,
            RemoteEvent::MessageReceived { ref text, .. } if text == "ping"
        ));
    }
}
