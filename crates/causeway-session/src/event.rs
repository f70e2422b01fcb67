//! Typed message vocabulary between the gateway and session workers.
//!
//! Every field and variant is enumerated here; there are no open-ended
//! message dictionaries. [`ControlMessage`] is scheduled onto a worker's
//! loop, [`BridgeEvent`] travels the shared worker → gateway queue.

use std::collections::HashMap;

use jid::BareJid;

/// Whether a chat payload targets a one-to-one or a group conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatScope {
    /// One-to-one conversation with a single contact.
    Direct,
    /// Group conversation, surfaced on the XMPP side as an emulated room.
    Group,
}

/// Typing activity as reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    Unknown,
    Started,
    Paused,
    Stopped,
}

/// Presence of a remote contact, collapsed to the three states the remote
/// service can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

/// Directory entry for a remote contact.
///
/// Replaced wholesale on each full directory snapshot; the presence fields
/// are additionally updated in place on presence events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactInfo {
    /// Identifier of the contact on the remote service.
    pub contact_id: String,
    pub display_name: String,
    pub full_name: String,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub avatar_url: Option<String>,
    pub status: PresenceStatus,
    pub status_message: Option<String>,
}

/// Directory entry for a group conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationInfo {
    /// Identifier of the conversation on the remote service.
    pub conversation_id: String,
    pub topic: String,
    /// Participant remote id → nickname shown in the emulated room.
    pub participants: HashMap<String, String>,
    /// The bridged user's own participant id.
    pub self_id: String,
}

/// Commands the gateway schedules onto a session worker's loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Mark the worker's informational connected flag.
    Connect,
    /// Terminal: close the remote connection and stop the worker loop.
    Disconnect,
    /// Cache the user's own presence type/show. Cosmetic; the remote service
    /// has no rich presence push.
    SetPresence {
        kind: Option<String>,
        show: Option<String>,
    },
    /// Forward a chat message. `target` is a contact id for [`ChatScope::Direct`]
    /// and a conversation id for [`ChatScope::Group`].
    SendChatMessage {
        scope: ChatScope,
        target: String,
        text: String,
    },
    /// Forward a typing notification to the one-to-one conversation with
    /// `target`. Anything other than [`TypingState::Started`] maps to paused.
    SendTyping { target: String, state: TypingState },
}

/// An event emitted by a session worker, tagged with its owning user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEvent {
    /// Bare address of the bridged user the event belongs to.
    pub user: BareJid,
    pub payload: EventPayload,
}

impl BridgeEvent {
    pub fn new(user: BareJid, payload: EventPayload) -> Self {
        Self { user, payload }
    }
}

/// Payload carried by a [`BridgeEvent`].
///
/// The two snapshot variants are always the first events a worker emits
/// after connecting, in this order. Group-scoped chat and typing payloads
/// carry both the conversation id and the sender id so the gateway can
/// synthesize occupant addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    ContactsSnapshot(Vec<ContactInfo>),
    ConversationsSnapshot(Vec<ConversationInfo>),
    Presence {
        contact_id: String,
        status: PresenceStatus,
        status_message: Option<String>,
    },
    ChatMessage {
        scope: ChatScope,
        conversation_id: String,
        sender_id: String,
        text: String,
    },
    Typing {
        scope: ChatScope,
        conversation_id: String,
        sender_id: String,
        state: TypingState,
    },
    /// The worker's remote session failed (sign-in rejected, connection
    /// lost). Scoped to this user; the gateway notifies them and tears the
    /// session down.
    SessionFailed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_event_carries_owner() {
        let user: BareJid = "someone@example.com".parse().unwrap();
        let event = BridgeEvent::new(
            user.clone(),
            EventPayload::SessionFailed {
                reason: "boom".to_string(),
            },
        );
        assert_eq!(event.user, user);
    }
}
