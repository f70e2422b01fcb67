//! Per-user translation state.

use std::collections::{HashMap, HashSet};

use jid::FullJid;

use causeway_session::{ContactInfo, ConversationInfo};

/// State of one emulated room for one bridged user.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub info: ConversationInfo,
    /// Resources currently joined to the emulated room. A resource appears
    /// here iff it sent available presence to the room and has not since
    /// sent unavailable or disconnected.
    pub joined: HashSet<FullJid>,
}

impl ConversationState {
    pub fn new(info: ConversationInfo) -> Self {
        Self {
            info,
            joined: HashSet::new(),
        }
    }

    /// Nickname the remote service assigned to the bridged user in this
    /// conversation. Falls back to the raw participant id when the
    /// participant map has no entry.
    pub fn self_nick(&self) -> &str {
        self.info
            .participants
            .get(&self.info.self_id)
            .map(String::as_str)
            .unwrap_or(self.info.self_id.as_str())
    }
}

/// Gateway-side session of one bridged user. Exactly one exists per user at
/// any time; it lives from the first available presence to the last
/// unavailable one.
#[derive(Debug, Default)]
pub struct Session {
    /// Remote contact id → directory entry.
    pub contacts: HashMap<String, ContactInfo>,
    /// Remote conversation id → room state.
    pub conversations: HashMap<String, ConversationState>,
    /// Full addresses currently available for the user's own presence.
    pub connected: HashSet<FullJid>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contact(&self, contact_id: &str) -> Option<&ContactInfo> {
        self.contacts.get(contact_id)
    }

    /// Replace the contact directory wholesale.
    pub fn replace_contacts(&mut self, contacts: Vec<ContactInfo>) {
        self.contacts = contacts
            .into_iter()
            .map(|c| (c.contact_id.clone(), c))
            .collect();
    }

    /// Replace the conversation directory wholesale, preserving the joined
    /// sets of conversations that survive the snapshot.
    pub fn replace_conversations(&mut self, conversations: Vec<ConversationInfo>) {
        let mut previous = std::mem::take(&mut self.conversations);
        self.conversations = conversations
            .into_iter()
            .map(|info| {
                let joined = previous
                    .remove(&info.conversation_id)
                    .map(|state| state.joined)
                    .unwrap_or_default();
                let mut state = ConversationState::new(info);
                state.joined = joined;
                (state.info.conversation_id.clone(), state)
            })
            .collect();
    }

    /// Drop a resource everywhere: from the connected set and from every
    /// room it had joined.
    pub fn drop_resource(&mut self, resource: &FullJid) {
        self.connected.remove(resource);
        for conversation in self.conversations.values_mut() {
            conversation.joined.remove(resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(id: &str) -> ConversationInfo {
        ConversationInfo {
            conversation_id: id.to_string(),
            topic: "Topic".to_string(),
            participants: HashMap::from([
                ("2000".to_string(), "Me".to_string()),
                ("1001".to_string(), "Alice".to_string()),
            ]),
            self_id: "2000".to_string(),
        }
    }

    #[test]
    fn snapshot_preserves_joined_resources() {
        let mut session = Session::new();
        session.replace_conversations(vec![conversation("conv-9")]);

        let resource: FullJid = "someone@example.com/pc".parse().unwrap();
        session
            .conversations
            .get_mut("conv-9")
            .unwrap()
            .joined
            .insert(resource.clone());

        session.replace_conversations(vec![conversation("conv-9"), conversation("conv-10")]);
        assert!(session.conversations["conv-9"].joined.contains(&resource));
        assert!(session.conversations["conv-10"].joined.is_empty());
    }

    #[test]
    fn drop_resource_clears_rooms() {
        let mut session = Session::new();
        session.replace_conversations(vec![conversation("conv-9")]);
        let resource: FullJid = "someone@example.com/pc".parse().unwrap();
        session.connected.insert(resource.clone());
        session
            .conversations
            .get_mut("conv-9")
            .unwrap()
            .joined
            .insert(resource.clone());

        session.drop_resource(&resource);
        assert!(session.connected.is_empty());
        assert!(session.conversations["conv-9"].joined.is_empty());
    }

    #[test]
    fn self_nick_falls_back_to_participant_id() {
        let mut info = conversation("conv-9");
        assert_eq!(ConversationState::new(info.clone()).self_nick(), "Me");
        info.participants.remove("2000");
        assert_eq!(ConversationState::new(info).self_nick(), "2000");
    }
}
