//! Service discovery (XEP-0030) at the gateway's three address levels.
//!
//! The gateway's own address advertises the transport identity and its
//! child nodes; synthesized contact addresses answer for the contacts in
//! the requester's session; emulated room addresses expose a
//! `muc#roominfo` data form with description, subject and occupant count.

use jid::Jid;
use minidom::Element;
use tracing::debug;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType};

use crate::addressing::StanzaTarget;
use crate::error::{iq_error, GatewayError};
use crate::gateway::{
    gateway_child_items, BridgeGateway, CONTACT_FEATURES, GATEWAY_FEATURES, ROOM_FEATURES,
};
use crate::{nodes, ns};

/// Identity element of a disco#info response.
struct Identity<'a> {
    category: &'a str,
    type_: &'a str,
    name: Option<&'a str>,
}

impl BridgeGateway {
    /// Answer a disco#info query.
    pub(crate) fn handle_disco_info(
        &mut self,
        iq: &Iq,
        node: Option<&str>,
    ) -> Result<(), GatewayError> {
        let Some(to) = iq.to.clone() else {
            return Ok(());
        };
        let user = iq.from.as_ref().map(Jid::to_bare);

        match self.addressing().classify(&to) {
            StanzaTarget::Gateway => match node {
                None => {
                    let identity = Identity {
                        category: "gateway",
                        type_: &self.config().network,
                        name: Some(&self.config().display_name),
                    };
                    let reply = info_result(iq, &[identity], &GATEWAY_FEATURES, None, None);
                    self.wire().send(reply);
                }
                Some(nodes::ROSTER) => {
                    let reply = info_result(iq, &[], &[], Some(nodes::ROSTER), None);
                    self.wire().send(reply);
                }
                Some(other) => {
                    debug!(node = other, "disco#info for unknown node");
                    self.wire().send(iq_error(
                        iq,
                        DefinedCondition::ItemNotFound,
                        ErrorType::Cancel,
                    ));
                }
            },
            StanzaTarget::Contact(contact_id) => {
                let contact = user
                    .as_ref()
                    .and_then(|user| self.session(user))
                    .and_then(|session| session.contact(&contact_id));
                match contact {
                    Some(contact) => {
                        let name = contact.full_name.clone();
                        let identity = Identity {
                            category: "client",
                            type_: &self.config().network,
                            name: Some(&name),
                        };
                        let reply = info_result(iq, &[identity], &CONTACT_FEATURES, None, None);
                        self.wire().send(reply);
                    }
                    None => {
                        self.wire().send(iq_error(
                            iq,
                            DefinedCondition::NotAcceptable,
                            ErrorType::Modify,
                        ));
                    }
                }
            }
            StanzaTarget::Room(conversation_id) => {
                let room = user
                    .as_ref()
                    .and_then(|user| self.session(user))
                    .and_then(|session| session.conversations.get(&conversation_id));
                match room {
                    Some(room) => {
                        let topic = room.info.topic.clone();
                        let occupants = room.info.participants.len();
                        let identity = Identity {
                            category: "conference",
                            type_: "text",
                            name: Some(&topic),
                        };
                        let form = room_info_form(&topic, occupants);
                        let reply =
                            info_result(iq, &[identity], &ROOM_FEATURES, None, Some(form));
                        self.wire().send(reply);
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
            StanzaTarget::ConferenceService => {
                let name = format!("{} Rooms", self.config().display_name);
                let identity = Identity {
                    category: "conference",
                    type_: "text",
                    name: Some(&name),
                };
                let reply = info_result(
                    iq,
                    &[identity],
                    &[ns::DISCO_INFO, ns::DISCO_ITEMS, ns::MUC],
                    None,
                    None,
                );
                self.wire().send(reply);
            }
            StanzaTarget::RoomOccupant { .. } | StanzaTarget::Foreign => {
                self.wire().send(iq_error(
                    iq,
                    DefinedCondition::JidMalformed,
                    ErrorType::Modify,
                ));
            }
        }
        Ok(())
    }

    /// Answer a disco#items query.
    pub(crate) fn handle_disco_items(
        &mut self,
        iq: &Iq,
        node: Option<&str>,
    ) -> Result<(), GatewayError> {
        let Some(to) = iq.to.clone() else {
            return Ok(());
        };
        let user = iq.from.as_ref().map(Jid::to_bare);

        match self.addressing().classify(&to) {
            StanzaTarget::Gateway => match node {
                None => {
                    let items = gateway_child_items(self.config());
                    let reply = items_result(iq, &items, None);
                    self.wire().send(reply);
                }
                Some(nodes::ROSTER) => {
                    // One item per contact in the requester's session.
                    let mut items = Vec::new();
                    if let Some(user) = user {
                        for contact in self.contact_list(&user) {
                            if let Ok(jid) = self.addressing().contact_jid(&contact.contact_id) {
                                items.push((
                                    jid.to_string(),
                                    None,
                                    contact.full_name.clone(),
                                ));
                            }
                        }
                    }
                    debug!(count = items.len(), "Answering roster node items");
                    let reply = items_result(iq, &items, Some(nodes::ROSTER));
                    self.wire().send(reply);
                }
                Some(_) => {
                    self.wire().send(iq_error(
                        iq,
                        DefinedCondition::ItemNotFound,
                        ErrorType::Cancel,
                    ));
                }
            },
            StanzaTarget::Contact(_) => {
                let reply = items_result(iq, &[], None);
                self.wire().send(reply);
            }
            StanzaTarget::ConferenceService => {
                // The requester's rooms, listed by topic.
                let mut items = Vec::new();
                if let Some(session) = user.as_ref().and_then(|user| self.session(user)) {
                    for room in session.conversations.values() {
                        if let Some(Ok(jid)) =
                            self.addressing().room_jid(&room.info.conversation_id)
                        {
                            items.push((jid.to_string(), None, room.info.topic.clone()));
                        }
                    }
                }
                let reply = items_result(iq, &items, None);
                self.wire().send(reply);
            }
            StanzaTarget::Room(_) => {
                let reply = items_result(iq, &[], None);
                self.wire().send(reply);
            }
            StanzaTarget::RoomOccupant { .. } | StanzaTarget::Foreign => {
                self.wire().send(iq_error(
                    iq,
                    DefinedCondition::JidMalformed,
                    ErrorType::Modify,
                ));
            }
        }
        Ok(())
    }
}

/// Build a disco#info result echoing the queried node.
fn info_result(
    iq: &Iq,
    identities: &[Identity<'_>],
    features: &[&str],
    node: Option<&str>,
    extension: Option<Element>,
) -> Iq {
    let mut query = Element::builder("query", ns::DISCO_INFO);
    if let Some(node) = node {
        query = query.attr("node", node);
    }
    for identity in identities {
        let mut builder = Element::builder("identity", ns::DISCO_INFO)
            .attr("category", identity.category)
            .attr("type", identity.type_);
        if let Some(name) = identity.name {
            builder = builder.attr("name", name);
        }
        query = query.append(builder.build());
    }
    for feature in features {
        query = query.append(
            Element::builder("feature", ns::DISCO_INFO)
                .attr("var", *feature)
                .build(),
        );
    }
    if let Some(extension) = extension {
        query = query.append(extension);
    }
    Iq {
        from: iq.to.clone(),
        to: iq.from.clone(),
        id: iq.id.clone(),
        payload: IqType::Result(Some(query.build())),
    }
}

/// Build a disco#items result from `(jid, node, name)` triples.
fn items_result(iq: &Iq, items: &[(String, Option<String>, String)], node: Option<&str>) -> Iq {
    let mut query = Element::builder("query", ns::DISCO_ITEMS);
    if let Some(node) = node {
        query = query.attr("node", node);
    }
    for (jid, item_node, name) in items {
        let mut builder = Element::builder("item", ns::DISCO_ITEMS)
            .attr("jid", jid.as_str())
            .attr("name", name.as_str());
        if let Some(item_node) = item_node {
            builder = builder.attr("node", item_node.as_str());
        }
        query = query.append(builder.build());
    }
    Iq {
        from: iq.to.clone(),
        to: iq.from.clone(),
        id: iq.id.clone(),
        payload: IqType::Result(Some(query.build())),
    }
}

/// `muc#roominfo` form exposing description, subject and occupant count.
fn room_info_form(topic: &str, occupants: usize) -> Element {
    let field = |var: &str, value: String| {
        Element::builder("field", ns::DATA_FORMS)
            .attr("var", var)
            .append(
                Element::builder("value", ns::DATA_FORMS)
                    .append(minidom::Node::Text(value))
                    .build(),
            )
            .build()
    };
    Element::builder("x", ns::DATA_FORMS)
        .attr("type", "result")
        .append(field("FORM_TYPE", ns::MUC_ROOMINFO.to_string()))
        .append(field("muc#roominfo_description", topic.to_string()))
        .append(field("muc#roominfo_subject", topic.to_string()))
        .append(field("muc#roominfo_occupants", occupants.to_string()))
        .build()
}
