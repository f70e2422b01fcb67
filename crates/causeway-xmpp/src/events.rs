//! Translation of worker events into outbound stanzas.
//!
//! Applied by the dispatcher under the shared lock: snapshot events
//! populate directory state and emit the initial subscription/status
//! presence per contact; presence, chat and typing events emit their
//! stanza; session failures notify the user and tear the session down.

use jid::Jid;
use minidom::Element;
use tracing::{debug, warn};
use xmpp_parsers::message::{Message, MessageType};

use causeway_session::{
    BridgeEvent, ChatScope, ContactInfo, ConversationInfo, EventPayload, PresenceStatus,
    TypingState,
};

use crate::error::GatewayError;
use crate::gateway::BridgeGateway;
use crate::ns;

impl BridgeGateway {
    /// Apply one worker event. Events for users without a session are
    /// dropped (the session may have been torn down while the event was in
    /// flight).
    pub fn handle_event(&mut self, event: BridgeEvent) -> Result<(), GatewayError> {
        let BridgeEvent { user, payload } = event;

        if self.session(&user).is_none() {
            if let EventPayload::SessionFailed { reason } = payload {
                // The failure may arrive before the session exists (spawn
                // raced teardown); the user still gets told and the dead
                // worker is unregistered.
                self.notify_session_failure(&user, &reason);
                self.registry().remove(&user);
            } else {
                debug!(user = %user, "Dropping event for unknown session");
            }
            return Ok(());
        }

        match payload {
            EventPayload::ContactsSnapshot(contacts) => {
                self.apply_contacts_snapshot(&user, contacts)
            }
            EventPayload::ConversationsSnapshot(conversations) => {
                self.apply_conversations_snapshot(&user, conversations)
            }
            EventPayload::Presence {
                contact_id,
                status,
                status_message,
            } => self.apply_presence(&user, &contact_id, status, status_message),
            EventPayload::ChatMessage {
                scope: ChatScope::Direct,
                sender_id,
                text,
                ..
            } => self.deliver_direct_message(&user, &sender_id, &text),
            EventPayload::ChatMessage {
                scope: ChatScope::Group,
                conversation_id,
                sender_id,
                text,
            } => self.deliver_group_message(&user, &conversation_id, &sender_id, Some(&text), None),
            EventPayload::Typing {
                scope: ChatScope::Direct,
                sender_id,
                state,
                ..
            } => self.deliver_direct_typing(&user, &sender_id, state),
            EventPayload::Typing {
                scope: ChatScope::Group,
                conversation_id,
                sender_id,
                state,
            } => self.deliver_group_message(
                &user,
                &conversation_id,
                &sender_id,
                None,
                Some(chat_state_name(state)),
            ),
            EventPayload::SessionFailed { reason } => {
                self.notify_session_failure(&user, &reason);
                self.teardown_session(&user);
                Ok(())
            }
        }
    }

    /// Replace the contact directory and emit one subscribe presence plus
    /// the current status per contact.
    fn apply_contacts_snapshot(
        &mut self,
        user: &jid::BareJid,
        contacts: Vec<ContactInfo>,
    ) -> Result<(), GatewayError> {
        debug!(user = %user, count = contacts.len(), "Applying contact snapshot");
        if let Some(session) = self.session_mut(user) {
            session.replace_contacts(contacts.clone());
        }
        for contact in contacts {
            let Ok(contact_jid) = self.addressing().contact_jid(&contact.contact_id) else {
                warn!(contact = %contact.contact_id, "Skipping unmappable contact");
                continue;
            };
            let mut subscribe =
                xmpp_parsers::presence::Presence::new(xmpp_parsers::presence::Type::Subscribe);
            subscribe.from = Some(Jid::from(contact_jid.clone()));
            subscribe.to = Some(Jid::from(user.clone()));
            subscribe.statuses.insert(
                String::new(),
                format!("{} contact", self.config().display_name),
            );
            // Nickname hint so clients can label the request.
            subscribe.payloads.push(
                Element::builder("x", ns::VCARD_UPDATE)
                    .append(
                        Element::builder("nickname", ns::VCARD_UPDATE)
                            .append(minidom::Node::Text(contact.full_name.clone()))
                            .build(),
                    )
                    .build(),
            );
            self.wire().send(subscribe);
            self.send_status_presence(
                contact_jid,
                Jid::from(user.clone()),
                contact.status,
                contact.status_message.as_deref(),
            );
        }
        Ok(())
    }

    fn apply_conversations_snapshot(
        &mut self,
        user: &jid::BareJid,
        conversations: Vec<ConversationInfo>,
    ) -> Result<(), GatewayError> {
        debug!(user = %user, count = conversations.len(), "Applying conversation snapshot");
        if let Some(session) = self.session_mut(user) {
            session.replace_conversations(conversations);
        }
        Ok(())
    }

    /// Incremental presence update for one contact.
    fn apply_presence(
        &mut self,
        user: &jid::BareJid,
        contact_id: &str,
        status: PresenceStatus,
        status_message: Option<String>,
    ) -> Result<(), GatewayError> {
        if let Some(contact) = self
            .session_mut(user)
            .and_then(|session| session.contacts.get_mut(contact_id))
        {
            contact.status = status;
            contact.status_message = status_message.clone();
        }
        match self.addressing().contact_jid(contact_id) {
            Ok(contact_jid) => {
                self.send_status_presence(
                    contact_jid,
                    Jid::from(user.clone()),
                    status,
                    status_message.as_deref(),
                );
            }
            Err(e) => warn!(contact = %contact_id, error = %e, "Skipping unmappable contact"),
        }
        Ok(())
    }

    fn deliver_direct_message(
        &mut self,
        user: &jid::BareJid,
        sender_id: &str,
        text: &str,
    ) -> Result<(), GatewayError> {
        let Ok(sender) = self.addressing().contact_jid(sender_id) else {
            warn!(contact = %sender_id, "Dropping message from unmappable contact");
            return Ok(());
        };
        let mut message = Message::new(Some(Jid::from(user.clone())));
        message.from = Some(Jid::from(sender));
        message.type_ = MessageType::Chat;
        message
            .bodies
            .insert(String::new(), xmpp_parsers::message::Body(text.to_string()));
        message.payloads.push(chat_state_element("active"));
        self.wire().send(message);
        Ok(())
    }

    fn deliver_direct_typing(
        &mut self,
        user: &jid::BareJid,
        sender_id: &str,
        state: TypingState,
    ) -> Result<(), GatewayError> {
        let Ok(sender) = self.addressing().contact_jid(sender_id) else {
            warn!(contact = %sender_id, "Dropping typing update from unmappable contact");
            return Ok(());
        };
        let mut message = Message::new(Some(Jid::from(user.clone())));
        message.from = Some(Jid::from(sender));
        message.type_ = MessageType::Chat;
        message
            .payloads
            .push(chat_state_element(chat_state_name(state)));
        self.wire().send(message);
        Ok(())
    }

    /// Deliver a group chat message (or bare chat state) from a remote
    /// participant to every joined resource. No joined resources means no
    /// delivery; the conversation entry itself persists.
    fn deliver_group_message(
        &mut self,
        user: &jid::BareJid,
        conversation_id: &str,
        sender_id: &str,
        text: Option<&str>,
        chat_state: Option<&str>,
    ) -> Result<(), GatewayError> {
        let Some(room) = self
            .session(user)
            .and_then(|session| session.conversations.get(conversation_id))
        else {
            debug!(user = %user, room = %conversation_id, "Dropping event for unknown conversation");
            return Ok(());
        };
        if room.joined.is_empty() {
            debug!(user = %user, room = %conversation_id, "No joined resources; skipping delivery");
            return Ok(());
        }

        let nick = room
            .info
            .participants
            .get(sender_id)
            .cloned()
            .unwrap_or_else(|| sender_id.to_string());
        let recipients: Vec<jid::FullJid> = room.joined.iter().cloned().collect();

        let Some(Ok(occupant)) = self.addressing().occupant_jid(conversation_id, &nick) else {
            warn!(room = %conversation_id, nick = %nick, "Unmappable occupant address");
            return Ok(());
        };

        for recipient in recipients {
            let mut message = Message::new(Some(Jid::from(recipient)));
            message.from = Some(Jid::from(occupant.clone()));
            message.type_ = MessageType::Groupchat;
            if let Some(text) = text {
                message
                    .bodies
                    .insert(String::new(), xmpp_parsers::message::Body(text.to_string()));
            }
            if let Some(state) = chat_state {
                message.payloads.push(chat_state_element(state));
            } else {
                message.payloads.push(chat_state_element("active"));
            }
            self.wire().send(message);
        }
        Ok(())
    }

    /// Tell the user their remote session failed.
    fn notify_session_failure(&mut self, user: &jid::BareJid, reason: &str) {
        warn!(user = %user, reason = %reason, "Remote session failed");
        self.send_notice(
            Jid::from(user.clone()),
            "Connection error",
            &format!(
                "Signing in to the remote service failed: {reason}. \
                 Check your registration and try again."
            ),
        );
    }
}

/// XEP-0085 chat state tag.
fn chat_state_element(state: &str) -> Element {
    Element::builder(state, ns::CHATSTATES).build()
}

/// Map remote typing activity onto chat state tags: only a running typing
/// burst shows as composing, everything else pauses.
fn chat_state_name(state: TypingState) -> &'static str {
    match state {
        TypingState::Started => "composing",
        TypingState::Paused | TypingState::Stopped | TypingState::Unknown => "paused",
    }
}
