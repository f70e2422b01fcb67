//! JID mapping between XMPP addresses and remote identifiers.
//!
//! The gateway owns a base domain (contacts are `contact_id@base`) and,
//! when group chat is enabled, a conference domain (rooms are
//! `conversation_id@conference`, occupants
//! `conversation_id@conference/nickname`).

use jid::{BareJid, FullJid, Jid};

/// Classification of a stanza's target address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StanzaTarget {
    /// The gateway's own address.
    Gateway,
    /// A synthesized contact address; carries the remote contact id.
    Contact(String),
    /// A bare emulated-room address; carries the conversation id.
    Room(String),
    /// An occupant address inside an emulated room.
    RoomOccupant { conversation_id: String, nick: String },
    /// The conference service itself (bare conference domain).
    ConferenceService,
    /// Any domain the gateway does not own.
    Foreign,
}

/// Address mapper for one gateway instance.
#[derive(Debug, Clone)]
pub struct Addressing {
    domain: BareJid,
    conference: Option<BareJid>,
}

impl Addressing {
    pub fn new(domain: BareJid, conference: Option<BareJid>) -> Self {
        Self { domain, conference }
    }

    /// The gateway's own bare address.
    pub fn gateway(&self) -> &BareJid {
        &self.domain
    }

    /// The conference service address, when group chat is enabled.
    pub fn conference(&self) -> Option<&BareJid> {
        self.conference.as_ref()
    }

    /// Classify a stanza target address.
    pub fn classify(&self, jid: &Jid) -> StanzaTarget {
        let bare = jid.to_bare();
        let domain = bare.domain().as_str();
        let node = bare.node().map(|n| n.as_str().to_string());

        if domain == self.domain.domain().as_str() {
            return match node {
                Some(contact_id) => StanzaTarget::Contact(contact_id),
                None => StanzaTarget::Gateway,
            };
        }

        if let Some(conference) = &self.conference {
            if domain == conference.domain().as_str() {
                return match node {
                    Some(conversation_id) => match jid.clone().try_into_full() {
                        Ok(full) => StanzaTarget::RoomOccupant {
                            conversation_id,
                            nick: full.resource().to_string(),
                        },
                        Err(_) => StanzaTarget::Room(conversation_id),
                    },
                    None => StanzaTarget::ConferenceService,
                };
            }
        }

        StanzaTarget::Foreign
    }

    /// Synthesized address of a remote contact.
    pub fn contact_jid(&self, contact_id: &str) -> Result<BareJid, jid::Error> {
        format!("{}@{}", contact_id, self.domain).parse()
    }

    /// Bare address of an emulated room. None when group chat is disabled.
    pub fn room_jid(&self, conversation_id: &str) -> Option<Result<BareJid, jid::Error>> {
        self.conference
            .as_ref()
            .map(|conference| format!("{}@{}", conversation_id, conference).parse())
    }

    /// Occupant address inside an emulated room.
    pub fn occupant_jid(
        &self,
        conversation_id: &str,
        nick: &str,
    ) -> Option<Result<FullJid, jid::Error>> {
        self.conference
            .as_ref()
            .map(|conference| format!("{}@{}/{}", conversation_id, conference, nick).parse())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addressing() -> Addressing {
        Addressing::new(
            "chat.example.net".parse().unwrap(),
            Some("rooms.chat.example.net".parse().unwrap()),
        )
    }

    #[test]
    fn classifies_gateway_and_contacts() {
        let addressing = addressing();
        let gateway: Jid = "chat.example.net".parse().unwrap();
        let contact: Jid = "1001@chat.example.net".parse().unwrap();
        let contact_full: Jid = "1001@chat.example.net/messenger".parse().unwrap();

        assert_eq!(addressing.classify(&gateway), StanzaTarget::Gateway);
        assert_eq!(
            addressing.classify(&contact),
            StanzaTarget::Contact("1001".to_string())
        );
        assert_eq!(
            addressing.classify(&contact_full),
            StanzaTarget::Contact("1001".to_string())
        );
    }

    #[test]
    fn classifies_rooms_and_occupants() {
        let addressing = addressing();
        let service: Jid = "rooms.chat.example.net".parse().unwrap();
        let room: Jid = "conv-9@rooms.chat.example.net".parse().unwrap();
        let occupant: Jid = "conv-9@rooms.chat.example.net/Alice".parse().unwrap();

        assert_eq!(
            addressing.classify(&service),
            StanzaTarget::ConferenceService
        );
        assert_eq!(
            addressing.classify(&room),
            StanzaTarget::Room("conv-9".to_string())
        );
        assert_eq!(
            addressing.classify(&occupant),
            StanzaTarget::RoomOccupant {
                conversation_id: "conv-9".to_string(),
                nick: "Alice".to_string(),
            }
        );
    }

    #[test]
    fn foreign_domains_are_flagged() {
        let addressing = addressing();
        let other: Jid = "user@example.org".parse().unwrap();
        assert_eq!(addressing.classify(&other), StanzaTarget::Foreign);
    }

    #[test]
    fn rooms_require_group_chat() {
        let addressing = Addressing::new("chat.example.net".parse().unwrap(), None);
        assert!(addressing.room_jid("conv-9").is_none());
        let room: Jid = "conv-9@rooms.chat.example.net".parse().unwrap();
        assert_eq!(addressing.classify(&room), StanzaTarget::Foreign);
    }

    #[test]
    fn builds_contact_and_occupant_addresses() {
        let addressing = addressing();
        assert_eq!(
            addressing.contact_jid("1001").unwrap().to_string(),
            "1001@chat.example.net"
        );
        assert_eq!(
            addressing
                .occupant_jid("conv-9", "Alice")
                .unwrap()
                .unwrap()
                .to_string(),
            "conv-9@rooms.chat.example.net/Alice"
        );
    }
}
