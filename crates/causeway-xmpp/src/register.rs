//! In-band registration (XEP-0077).
//!
//! Registration stores the remote sign-in URL and token; it never talks to
//! the remote service itself. The `get` reply additionally probes the
//! requester's disco#info so the later `subscribed` transition knows
//! whether roster exchange is available.

use jid::Jid;
use minidom::Element;
use tracing::{debug, info};
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::presence::Type as PresenceType;
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType};

use causeway_session::{ControlMessage, StoredCredential};

use crate::addressing::StanzaTarget;
use crate::error::{iq_error, GatewayError};
use crate::gateway::BridgeGateway;
use crate::ns;

const INSTRUCTIONS: &str =
    "Open the sign-in URL in a browser, authorize the gateway, and enter the resulting token as the password.";

impl BridgeGateway {
    /// `iq get` on `jabber:iq:register`.
    pub(crate) fn handle_register_get(&mut self, iq: &Iq) -> Result<(), GatewayError> {
        let Some(from) = iq.from.clone() else {
            return Ok(());
        };
        if !self.is_gateway_target(iq) {
            self.wire()
                .send(iq_error(iq, DefinedCondition::BadRequest, ErrorType::Modify));
            return Ok(());
        }
        let user = from.to_bare();

        let mut query = Element::builder("query", ns::REGISTER).append(
            Element::builder("instructions", ns::REGISTER)
                .append(minidom::Node::Text(INSTRUCTIONS.to_string()))
                .build(),
        );
        match self.store().get(&user)? {
            Some(credential) => {
                query = query
                    .append(text_field("url", &credential.url))
                    .append(text_field("password", &credential.auth_token))
                    .append(Element::builder("registered", ns::REGISTER).build());
            }
            None => {
                query = query
                    .append(Element::builder("url", ns::REGISTER).build())
                    .append(Element::builder("password", ns::REGISTER).build());
            }
        }
        self.wire().send(Iq {
            from: iq.to.clone(),
            to: iq.from.clone(),
            id: iq.id.clone(),
            payload: IqType::Result(Some(query.build())),
        });

        // Probe the requester's capabilities to seed the roster-exchange
        // negotiation.
        self.wire().send(Iq {
            from: Some(Jid::from(self.config().domain.clone())),
            to: Some(from),
            id: uuid::Uuid::new_v4().to_string(),
            payload: IqType::Get(Element::builder("query", ns::DISCO_INFO).build()),
        });
        Ok(())
    }

    /// `iq set` on `jabber:iq:register`: store or remove a credential.
    pub(crate) fn handle_register_set(
        &mut self,
        iq: &Iq,
        query: &Element,
    ) -> Result<(), GatewayError> {
        let Some(from) = iq.from.clone() else {
            return Ok(());
        };
        if !self.is_gateway_target(iq) {
            self.wire()
                .send(iq_error(iq, DefinedCondition::BadRequest, ErrorType::Modify));
            return Ok(());
        }
        let user = from.to_bare();

        let url = non_empty_child(query, "url");
        let token = non_empty_child(query, "password");
        let remove = query.get_child("remove", ns::REGISTER).is_some();

        match (remove, url, token) {
            (false, Some(url), Some(token)) => {
                self.store()
                    .set(&user, &StoredCredential::new(url, token))?;
                self.store().flush()?;
                info!(user = %user, "Stored registration");
                self.wire().send(result_iq(iq));
            }
            (true, None, None) => {
                if self.store().remove(&user)? {
                    self.store().flush()?;
                    info!(user = %user, "Removed registration");
                    self.wire().send(result_iq(iq));
                    self.send_presence(
                        Jid::from(self.config().domain.clone()),
                        from.clone(),
                        PresenceType::Unsubscribe,
                    );
                    self.send_presence(
                        Jid::from(self.config().domain.clone()),
                        from,
                        PresenceType::Unsubscribed,
                    );
                    // A live session does not survive unregistration.
                    if self.session(&user).is_some() {
                        self.registry().dispatch(&user, ControlMessage::Disconnect);
                        self.remove_session(&user);
                        self.registry().remove(&user);
                    }
                } else {
                    self.wire()
                        .send(iq_error(iq, DefinedCondition::BadRequest, ErrorType::Modify));
                }
            }
            _ => {
                debug!(user = %user, "Malformed registration set");
                self.wire()
                    .send(iq_error(iq, DefinedCondition::BadRequest, ErrorType::Modify));
            }
        }
        Ok(())
    }

    fn is_gateway_target(&self, iq: &Iq) -> bool {
        iq.to
            .as_ref()
            .map(|to| self.addressing().classify(to) == StanzaTarget::Gateway)
            .unwrap_or(false)
    }
}

fn text_field(name: &str, value: &str) -> Element {
    Element::builder(name, ns::REGISTER)
        .append(minidom::Node::Text(value.to_string()))
        .build()
}

fn non_empty_child(query: &Element, name: &str) -> Option<String> {
    query
        .get_child(name, ns::REGISTER)
        .map(|child| child.text())
        .filter(|text| !text.is_empty())
}

fn result_iq(iq: &Iq) -> Iq {
    Iq {
        from: iq.to.clone(),
        to: iq.from.clone(),
        id: iq.id.clone(),
        payload: IqType::Result(None),
    }
}
