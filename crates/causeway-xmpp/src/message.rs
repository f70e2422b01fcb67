//! Inbound message handling.
//!
//! Empty-body messages carry chat states and become typing control
//! messages; bodied `chat` messages are forwarded to the remote
//! conversation. `normal` messages are deliberately ignored.

use tracing::debug;
use xmpp_parsers::message::{Message, MessageType};

use causeway_session::{ChatScope, ControlMessage, TypingState};

use crate::addressing::StanzaTarget;
use crate::error::{conditions, error_types, message_error, GatewayError};
use crate::gateway::BridgeGateway;
use crate::ns;

impl BridgeGateway {
    /// Entry point for every inbound message stanza.
    pub(crate) fn handle_message(&mut self, message: Message) -> Result<(), GatewayError> {
        let (Some(from), Some(to)) = (message.from.clone(), message.to.clone()) else {
            debug!("Ignoring message without addressing");
            return Ok(());
        };
        let user = from.to_bare();

        if !self.store().contains(&user)? {
            self.wire().send(message_error(
                &message,
                conditions::REGISTRATION_REQUIRED,
                error_types::AUTH,
            ));
            return Ok(());
        }

        match self.addressing().classify(&to) {
            StanzaTarget::Contact(contact_id) => {
                self.handle_direct_message(message, &user, contact_id)
            }
            StanzaTarget::Room(conversation_id) => {
                self.handle_group_message(message, &user, conversation_id)
            }
            StanzaTarget::RoomOccupant { .. } => {
                // Private messages to occupants have no remote counterpart.
                self.wire().send(message_error(
                    &message,
                    conditions::FEATURE_NOT_IMPLEMENTED,
                    error_types::CANCEL,
                ));
                Ok(())
            }
            StanzaTarget::Gateway | StanzaTarget::ConferenceService | StanzaTarget::Foreign => {
                self.wire().send(message_error(
                    &message,
                    conditions::BAD_REQUEST,
                    error_types::MODIFY,
                ));
                Ok(())
            }
        }
    }

    /// Message to a synthesized contact address.
    fn handle_direct_message(
        &mut self,
        message: Message,
        user: &jid::BareJid,
        contact_id: String,
    ) -> Result<(), GatewayError> {
        if self.session(user).is_none() {
            self.wire().send(message_error(
                &message,
                conditions::REGISTRATION_REQUIRED,
                error_types::AUTH,
            ));
            return Ok(());
        }

        let body = message.bodies.get("").map(|body| body.0.clone());
        match body {
            // No body: this is a chat-state update.
            None => {
                let state = if has_chat_state(&message, "composing") {
                    TypingState::Started
                } else {
                    TypingState::Paused
                };
                self.registry().dispatch(
                    user,
                    ControlMessage::SendTyping {
                        target: contact_id,
                        state,
                    },
                );
                Ok(())
            }
            Some(text) => match message.type_ {
                MessageType::Chat => {
                    self.registry().dispatch(
                        user,
                        ControlMessage::SendChatMessage {
                            scope: ChatScope::Direct,
                            target: contact_id,
                            text,
                        },
                    );
                    Ok(())
                }
                // Normal messages are a deliberate no-op.
                MessageType::Normal => {
                    debug!(contact = %contact_id, "Ignoring normal-type message");
                    Ok(())
                }
                _ => {
                    self.wire().send(message_error(
                        &message,
                        conditions::BAD_REQUEST,
                        error_types::MODIFY,
                    ));
                    Ok(())
                }
            },
        }
    }

    /// Message to a bare emulated-room address.
    fn handle_group_message(
        &mut self,
        message: Message,
        user: &jid::BareJid,
        conversation_id: String,
    ) -> Result<(), GatewayError> {
        if !message.subjects.is_empty() {
            // Room subjects cannot be pushed to the remote conversation.
            self.wire().send(message_error(
                &message,
                conditions::FEATURE_NOT_IMPLEMENTED,
                error_types::CANCEL,
            ));
            return Ok(());
        }

        let known = self
            .session(user)
            .map(|session| session.conversations.contains_key(&conversation_id))
            .unwrap_or(false);
        if !known {
            self.wire().send(message_error(
                &message,
                conditions::ITEM_NOT_FOUND,
                error_types::CANCEL,
            ));
            return Ok(());
        }

        if message.type_ != MessageType::Groupchat {
            self.wire().send(message_error(
                &message,
                conditions::BAD_REQUEST,
                error_types::MODIFY,
            ));
            return Ok(());
        }

        match message.bodies.get("").map(|body| body.0.clone()) {
            Some(text) => {
                self.registry().dispatch(
                    user,
                    ControlMessage::SendChatMessage {
                        scope: ChatScope::Group,
                        target: conversation_id,
                        text,
                    },
                );
            }
            None => {
                debug!(room = %conversation_id, "Ignoring bodiless group message");
            }
        }
        Ok(())
    }
}

/// Whether the message carries the given XEP-0085 chat state tag.
fn has_chat_state(message: &Message, state: &str) -> bool {
    message
        .payloads
        .iter()
        .any(|payload| payload.is(state, ns::CHATSTATES))
}
