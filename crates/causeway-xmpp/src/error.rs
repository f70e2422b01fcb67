//! Error types and stanza-error reply builders.
//!
//! Protocol errors are never raised as faults: handlers convert them into
//! stanza error replies and stop processing the offending stanza. The
//! [`GatewayError`] enum only carries failures of the gateway's own
//! collaborators (store, JID construction).

use minidom::Element;
use thiserror::Error;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::message::Message;
use xmpp_parsers::presence::{Presence, Type as PresenceType};
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};

use causeway_session::StoreError;

use crate::ns;

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("malformed JID: {0}")]
    Jid(#[from] jid::Error),
}

/// Build an error reply for an IQ, echoing its id with swapped addressing.
pub(crate) fn iq_error(iq: &Iq, condition: DefinedCondition, error_type: ErrorType) -> Iq {
    Iq {
        from: iq.to.clone(),
        to: iq.from.clone(),
        id: iq.id.clone(),
        payload: IqType::Error(StanzaError::new(error_type, condition, "en", "")),
    }
}

/// Build an error reply for a presence stanza.
pub(crate) fn presence_error(
    presence: &Presence,
    condition: &str,
    error_type: &str,
) -> Presence {
    let mut reply = Presence::new(PresenceType::Error);
    reply.from = presence.to.clone();
    reply.to = presence.from.clone();
    reply.payloads.push(error_element(condition, error_type));
    reply
}

/// Build an error reply for a message stanza.
pub(crate) fn message_error(message: &Message, condition: &str, error_type: &str) -> Message {
    let mut reply = Message::new(message.from.clone());
    reply.from = message.to.clone();
    reply.type_ = xmpp_parsers::message::MessageType::Error;
    reply.payloads.push(error_element(condition, error_type));
    reply
}

/// `<error type='..'><condition xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error>`
fn error_element(condition: &str, error_type: &str) -> Element {
    Element::builder("error", ns::COMPONENT)
        .attr("type", error_type)
        .append(Element::builder(condition, ns::STANZAS).build())
        .build()
}

/// Conventional condition names used by the gateway's presence and message
/// error replies.
pub(crate) mod conditions {
    pub const BAD_REQUEST: &str = "bad-request";
    pub const ITEM_NOT_FOUND: &str = "item-not-found";
    pub const NOT_ACCEPTABLE: &str = "not-acceptable";
    pub const REGISTRATION_REQUIRED: &str = "registration-required";
    pub const FEATURE_NOT_IMPLEMENTED: &str = "feature-not-implemented";
    pub const JID_MALFORMED: &str = "jid-malformed";
}

/// Error type attribute values (RFC 6120 §8.3.2).
pub(crate) mod error_types {
    pub const AUTH: &str = "auth";
    pub const CANCEL: &str = "cancel";
    pub const MODIFY: &str = "modify";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_error_swaps_addressing() {
        let mut presence = Presence::new(PresenceType::None);
        presence.from = Some("user@example.com/pc".parse().unwrap());
        presence.to = Some("gateway.example.com".parse().unwrap());

        let reply = presence_error(
            &presence,
            conditions::REGISTRATION_REQUIRED,
            error_types::AUTH,
        );
        assert_eq!(reply.type_, PresenceType::Error);
        assert_eq!(reply.from, presence.to);
        assert_eq!(reply.to, presence.from);

        let error = reply
            .payloads
            .iter()
            .find(|p| p.is("error", ns::COMPONENT))
            .expect("error payload");
        assert_eq!(error.attr("type"), Some("auth"));
        assert!(error
            .get_child(conditions::REGISTRATION_REQUIRED, ns::STANZAS)
            .is_some());
    }

    #[test]
    fn iq_error_echoes_id() {
        let iq = Iq {
            from: Some("user@example.com/pc".parse().unwrap()),
            to: Some("gateway.example.com".parse().unwrap()),
            id: "q1".to_string(),
            payload: IqType::Get(Element::builder("query", ns::DISCO_INFO).build()),
        };
        let reply = iq_error(&iq, DefinedCondition::ItemNotFound, ErrorType::Cancel);
        assert_eq!(reply.id, "q1");
        assert!(matches!(reply.payload, IqType::Error(_)));
    }
}
