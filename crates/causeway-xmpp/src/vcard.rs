//! vCard synthesis (XEP-0054).
//!
//! Nothing is stored: the gateway's own vCard is fixed, contact vCards are
//! synthesized from the session's directory (with the avatar fetched on
//! demand and embedded base64), and room vCards expose the topic.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use minidom::Element;
use tracing::{debug, warn};
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType};

use causeway_session::ContactInfo;

use crate::addressing::StanzaTarget;
use crate::error::{iq_error, GatewayError};
use crate::gateway::BridgeGateway;
use crate::ns;

impl BridgeGateway {
    /// `iq get` on `vcard-temp`.
    pub(crate) async fn handle_vcard(&mut self, iq: &Iq) -> Result<(), GatewayError> {
        let Some(from) = iq.from.clone() else {
            return Ok(());
        };
        let Some(to) = iq.to.clone() else {
            return Ok(());
        };
        let user = from.to_bare();

        if !self.store().contains(&user)? {
            self.wire().send(iq_error(
                iq,
                DefinedCondition::ItemNotFound,
                ErrorType::Cancel,
            ));
            return Ok(());
        }

        match self.addressing().classify(&to) {
            StanzaTarget::Gateway => {
                let vcard = named_vcard(&self.config().display_name);
                self.wire().send(vcard_result(iq, vcard));
            }
            StanzaTarget::Contact(contact_id) => {
                let contact = self
                    .session(&user)
                    .and_then(|session| session.contact(&contact_id))
                    .cloned();
                match contact {
                    Some(contact) => {
                        let vcard = self.contact_vcard(&contact).await;
                        self.wire().send(vcard_result(iq, vcard));
                    }
                    None => {
                        self.wire().send(iq_error(
                            iq,
                            DefinedCondition::ItemNotFound,
                            ErrorType::Cancel,
                        ));
                    }
                }
            }
            StanzaTarget::Room(conversation_id) => {
                let topic = self
                    .session(&user)
                    .and_then(|session| session.conversations.get(&conversation_id))
                    .map(|room| room.info.topic.clone());
                match topic {
                    Some(topic) => {
                        let vcard = named_vcard(&topic);
                        self.wire().send(vcard_result(iq, vcard));
                    }
                    None => {
                        self.wire().send(iq_error(
                            iq,
                            DefinedCondition::ItemNotFound,
                            ErrorType::Cancel,
                        ));
                    }
                }
            }
            _ => {
                self.wire().send(iq_error(
                    iq,
                    DefinedCondition::ItemNotFound,
                    ErrorType::Cancel,
                ));
            }
        }
        Ok(())
    }

    /// Synthesize a contact vCard, embedding the avatar when it can be
    /// fetched.
    async fn contact_vcard(&self, contact: &ContactInfo) -> Element {
        let mut vcard = named_vcard(&contact.full_name);

        if let Some(url) = contact.avatar_url.as_deref().filter(|u| !u.is_empty()) {
            if let Some(photo) = self.fetch_avatar(url).await {
                vcard.append_child(
                    Element::builder("PHOTO", ns::VCARD)
                        .append(text_child("TYPE", "image/jpeg"))
                        .append(text_child("BINVAL", &STANDARD.encode(photo)))
                        .build(),
                );
            }
        }
        if let Some(phone) = contact.phones.first() {
            vcard.append_child(
                Element::builder("TEL", ns::VCARD)
                    .append(Element::builder("HOME", ns::VCARD).build())
                    .append(Element::builder("VOICE", ns::VCARD).build())
                    .append(text_child("NUMBER", phone))
                    .build(),
            );
        }
        if let Some(email) = contact.emails.first() {
            vcard.append_child(
                Element::builder("EMAIL", ns::VCARD)
                    .append(Element::builder("INTERNET", ns::VCARD).build())
                    .append(text_child("USERID", email))
                    .build(),
            );
        }
        vcard
    }

    /// Fetch avatar bytes, fixing up scheme-relative URLs. Failures skip
    /// the photo rather than failing the vCard.
    async fn fetch_avatar(&self, url: &str) -> Option<Vec<u8>> {
        let url = if url.starts_with("//") {
            format!("https:{url}")
        } else {
            url.to_string()
        };
        debug!(url = %url, "Fetching avatar");
        match self.http().get(&url).send().await {
            Ok(response) => match response.error_for_status() {
                Ok(response) => match response.bytes().await {
                    Ok(bytes) => Some(bytes.to_vec()),
                    Err(e) => {
                        warn!(url = %url, error = %e, "Avatar body read failed");
                        None
                    }
                },
                Err(e) => {
                    warn!(url = %url, error = %e, "Avatar fetch rejected");
                    None
                }
            },
            Err(e) => {
                warn!(url = %url, error = %e, "Avatar fetch failed");
                None
            }
        }
    }
}

/// vCard skeleton with FN and NICKNAME set to `name`.
fn named_vcard(name: &str) -> Element {
    Element::builder("vCard", ns::VCARD)
        .append(text_child("FN", name))
        .append(text_child("NICKNAME", name))
        .build()
}

fn text_child(name: &str, value: &str) -> Element {
    Element::builder(name, ns::VCARD)
        .append(minidom::Node::Text(value.to_string()))
        .build()
}

fn vcard_result(iq: &Iq, vcard: Element) -> Iq {
    Iq {
        from: iq.to.clone(),
        to: iq.from.clone(),
        id: iq.id.clone(),
        payload: IqType::Result(Some(vcard)),
    }
}
