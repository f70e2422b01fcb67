//! # causeway-xmpp
//!
//! The protocol-translation state machine of the Causeway gateway.
//!
//! [`BridgeGateway`] owns the per-user translation state (contacts,
//! conversations, connected resources) and implements every inbound stanza
//! handler: the presence subscription flow, MUC emulation over the remote
//! service's group conversations, three-level service discovery, vCard
//! synthesis and in-band registration. It also translates
//! [`causeway_session::BridgeEvent`]s back into stanzas.
//!
//! [`Bridge`] wraps the gateway in its run loop: one task polls the inbound
//! stanza channel, one drains the shared event queue, and both serialize on
//! a single lock so the translation state and the outbound channel are never
//! driven concurrently.

pub mod addressing;
pub mod bridge;
pub mod disco;
pub mod error;
pub mod events;
pub mod gateway;
pub mod message;
pub mod muc;
pub mod outbound;
pub mod presence;
pub mod register;
pub mod state;
pub mod vcard;

pub use addressing::{Addressing, StanzaTarget};
pub use bridge::{Bridge, RunOutcome, StopHandle};
pub use error::GatewayError;
pub use gateway::{BridgeGateway, GatewayConfig};
pub use outbound::{stanza_channel, StanzaSender};
pub use state::{ConversationState, Session};

/// XML namespaces the gateway speaks.
pub mod ns {
    /// Component stream stanzas (XEP-0114).
    pub const COMPONENT: &str = "jabber:component:accept";
    /// RFC 6120 stanza error conditions.
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
    /// XEP-0030 service discovery.
    pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
    pub const DISCO_ITEMS: &str = "http://jabber.org/protocol/disco#items";
    /// XEP-0077 in-band registration.
    pub const REGISTER: &str = "jabber:iq:register";
    /// XEP-0092 software version.
    pub const VERSION: &str = "jabber:iq:version";
    /// XEP-0050 ad-hoc commands.
    pub const COMMANDS: &str = "http://jabber.org/protocol/commands";
    /// Legacy transport presence feature var.
    pub const PRESENCE: &str = "presence";
    /// XEP-0085 chat state notifications.
    pub const CHATSTATES: &str = "http://jabber.org/protocol/chatstates";
    /// XEP-0144 roster item exchange.
    pub const ROSTERX: &str = "http://jabber.org/protocol/rosterx";
    /// XEP-0054 vcard-temp.
    pub const VCARD: &str = "vcard-temp";
    /// XEP-0153 vCard-based avatar/nickname hints in presence.
    pub const VCARD_UPDATE: &str = "vcard-temp:x:update";
    /// XEP-0045 multi-user chat.
    pub const MUC: &str = "http://jabber.org/protocol/muc";
    pub const MUC_USER: &str = "http://jabber.org/protocol/muc#user";
    pub const MUC_UNIQUE: &str = "http://jabber.org/protocol/muc#unique";
    /// XEP-0004 data forms.
    pub const DATA_FORMS: &str = "jabber:x:data";
    /// XEP-0045 room info form type.
    pub const MUC_ROOMINFO: &str = "http://jabber.org/protocol/muc#roominfo";
}

/// Well-known disco node names below the gateway address.
pub mod nodes {
    /// Child node listing the bridged roster.
    pub const ROSTER: &str = "roster";
}
