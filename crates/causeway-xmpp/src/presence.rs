//! Inbound presence handling: the subscription flow and session lifecycle.
//!
//! A session is created on the first available presence from a registered
//! user and destroyed when the last connected resource goes unavailable.
//! The `subscribed` transition drives roster delivery: one roster-exchange
//! message when the peer advertised XEP-0144, otherwise one `subscribe`
//! presence per contact.

use jid::{BareJid, Jid};
use minidom::Element;
use tracing::{debug, info, warn};
use xmpp_parsers::message::Message;
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use causeway_session::{ControlMessage, StoredCredential};

use crate::addressing::StanzaTarget;
use crate::error::{conditions, error_types, presence_error, GatewayError};
use crate::gateway::BridgeGateway;
use crate::ns;
use crate::state::Session;

impl BridgeGateway {
    /// Entry point for every inbound presence stanza.
    pub(crate) fn handle_presence(&mut self, presence: Presence) -> Result<(), GatewayError> {
        let (Some(from), Some(to)) = (presence.from.clone(), presence.to.clone()) else {
            debug!("Ignoring presence without addressing");
            return Ok(());
        };
        let user = from.to_bare();

        if !self.store().contains(&user)? {
            return self.handle_unregistered_presence(&presence, &from, &to);
        }

        match self.addressing().classify(&to) {
            StanzaTarget::Gateway => self.handle_gateway_presence(presence, from, to, user),
            StanzaTarget::Contact(contact_id) => {
                self.handle_contact_presence(&presence, &from, &to, &user, &contact_id);
                Ok(())
            }
            StanzaTarget::RoomOccupant {
                conversation_id, ..
            } => self.handle_room_presence(&presence, &from, &user, &conversation_id),
            StanzaTarget::Room(conversation_id) => {
                // Joins and leaves address the occupant JID; a bare room
                // address carries no nickname and is not a join.
                debug!(room = %conversation_id, "Ignoring presence to bare room address");
                Ok(())
            }
            StanzaTarget::ConferenceService => Ok(()),
            StanzaTarget::Foreign => {
                self.wire().send(presence_error(
                    &presence,
                    conditions::JID_MALFORMED,
                    error_types::MODIFY,
                ));
                Ok(())
            }
        }
    }

    /// Presence addressed to the gateway's own JID.
    fn handle_gateway_presence(
        &mut self,
        presence: Presence,
        from: Jid,
        to: Jid,
        user: BareJid,
    ) -> Result<(), GatewayError> {
        match presence.type_ {
            PresenceType::Subscribed => self.handle_subscription_accepted(&presence, from, user),
            PresenceType::Subscribe => {
                // Registration precedes confirmation; the credential is
                // known to exist here, so acknowledge the subscription.
                self.send_presence(to, from, PresenceType::Subscribed);
                Ok(())
            }
            PresenceType::Unsubscribe => {
                if let Some(mut credential) = self.store().get(&user)? {
                    credential.unsubscribed = true;
                    self.store().set(&user, &credential)?;
                    self.store().flush()?;
                }
                self.send_presence(to, from, PresenceType::Unsubscribed);
                Ok(())
            }
            PresenceType::Unsubscribed => Ok(()),
            PresenceType::Probe => {
                self.send_presence(to, from, PresenceType::None);
                Ok(())
            }
            PresenceType::None => {
                self.handle_available(&presence, from, to, user);
                Ok(())
            }
            PresenceType::Unavailable => {
                self.handle_unavailable(from, to, user);
                Ok(())
            }
            PresenceType::Error => Ok(()),
        }
    }

    /// The user accepted the gateway's subscription request: persist the
    /// flag, then negotiate roster delivery.
    fn handle_subscription_accepted(
        &mut self,
        presence: &Presence,
        from: Jid,
        user: BareJid,
    ) -> Result<(), GatewayError> {
        if self.session(&user).is_none() {
            self.wire().send(presence_error(
                presence,
                conditions::NOT_ACCEPTABLE,
                error_types::MODIFY,
            ));
            return Ok(());
        }

        if let Some(mut credential) = self.store().get(&user)? {
            credential.subscribed = true;
            self.store().set(&user, &credential)?;
            self.store().flush()?;
        }

        let contacts = self.contact_list(&user);
        if self.peer_supports(&user, ns::ROSTERX) {
            // One roster-exchange message enumerating every contact.
            let mut message = Message::new(Some(from.clone()));
            message.from = Some(Jid::from(self.config().domain.clone()));
            message.subjects.insert(
                String::new(),
                xmpp_parsers::message::Subject("Roster items".to_string()),
            );
            message.bodies.insert(
                String::new(),
                xmpp_parsers::message::Body(format!(
                    "Contacts from your {} roster",
                    self.config().display_name
                )),
            );
            let mut exchange = Element::builder("x", ns::ROSTERX);
            for contact in &contacts {
                match self.addressing().contact_jid(&contact.contact_id) {
                    Ok(jid) => {
                        exchange = exchange.append(
                            Element::builder("item", ns::ROSTERX)
                                .attr("jid", jid.to_string())
                                .attr("name", contact.full_name.clone())
                                .attr("action", "add")
                                .build(),
                        );
                    }
                    Err(e) => {
                        warn!(contact = %contact.contact_id, error = %e, "Skipping unmappable contact")
                    }
                }
            }
            message.payloads.push(exchange.build());
            self.wire().send(message);
            info!(user = %user, contacts = contacts.len(), "Sent roster exchange");
        } else {
            // Fallback: one subscribe presence per contact.
            for contact in &contacts {
                match self.addressing().contact_jid(&contact.contact_id) {
                    Ok(jid) => {
                        self.send_presence(Jid::from(jid), from.clone(), PresenceType::Subscribe)
                    }
                    Err(e) => {
                        warn!(contact = %contact.contact_id, error = %e, "Skipping unmappable contact")
                    }
                }
            }
            info!(user = %user, contacts = contacts.len(), "Sent per-contact subscriptions");
        }

        self.send_presence(
            Jid::from(self.config().domain.clone()),
            from,
            PresenceType::Subscribed,
        );
        Ok(())
    }

    /// Available (or legacy invisible) presence at the gateway address.
    fn handle_available(&mut self, presence: &Presence, from: Jid, to: Jid, user: BareJid) {
        let Ok(resource) = from.clone().try_into_full() else {
            debug!(user = %user, "Ignoring available presence without resource");
            return;
        };

        if self.session(&user).is_some() {
            if let Some(session) = self.session_mut(&user) {
                session.connected.insert(resource.clone());
            }
            self.registry().dispatch(
                &user,
                ControlMessage::SetPresence {
                    kind: None,
                    show: presence.show.clone().map(|show| show_name(show).to_string()),
                },
            );
            // Bring the new resource up to date with every contact's
            // last-known status.
            for (contact, status, status_message) in self.contact_statuses(&user) {
                self.send_status_presence(
                    contact,
                    Jid::from(resource.clone()),
                    status,
                    status_message.as_deref(),
                );
            }
            return;
        }

        let credential = match self.store().get(&user) {
            Ok(Some(credential)) => credential,
            Ok(None) | Err(_) => {
                // The containment check passed but the record is unreadable:
                // tell the user, drop the record, give up on this stanza.
                self.send_notice(
                    Jid::from(user.clone()),
                    "Gateway configuration error",
                    "Your registration could not be loaded. Please register with the gateway again.",
                );
                if let Err(e) = self.store().remove(&user) {
                    warn!(user = %user, error = %e, "Failed to drop corrupt credential");
                }
                let _ = self.store().flush();
                return;
            }
        };

        self.spawn_session(&user, credential);
        if let Some(session) = self.session_mut(&user) {
            session.connected.insert(resource);
        }
        self.send_presence(to, from, PresenceType::None);
    }

    /// Spawn the worker and create the fresh, empty session for `user`.
    fn spawn_session(&mut self, user: &BareJid, credential: StoredCredential) {
        self.registry().spawn(user, credential);
        self.insert_session(user.clone(), Session::new());
        info!(user = %user, "Created session");
    }

    /// Unavailable presence at the gateway address.
    fn handle_unavailable(&mut self, from: Jid, to: Jid, user: BareJid) {
        if self.session(&user).is_none() {
            self.send_presence(to, from, PresenceType::Unavailable);
            return;
        }

        if let Some(session) = self.session_mut(&user) {
            match from.clone().try_into_full() {
                Ok(resource) => session.drop_resource(&resource),
                // A bare unavailable takes the whole user offline.
                Err(_) => session.connected.clear(),
            }
            if !session.connected.is_empty() {
                return;
            }
        }

        info!(user = %user, "Last resource disconnected");
        self.registry().dispatch(&user, ControlMessage::Disconnect);
        self.remove_session(&user);
        self.registry().remove(&user);
    }

    /// Presence addressed to a synthesized contact address.
    fn handle_contact_presence(
        &mut self,
        presence: &Presence,
        from: &Jid,
        to: &Jid,
        user: &BareJid,
        contact_id: &str,
    ) {
        match presence.type_ {
            // Contacts on the remote service auto-accept subscriptions.
            PresenceType::Subscribe => {
                self.send_presence(to.clone(), from.clone(), PresenceType::Subscribed);
            }
            PresenceType::Unsubscribe => {
                self.send_presence(to.clone(), from.clone(), PresenceType::Unsubscribed);
            }
            PresenceType::Probe => {
                let status = self
                    .session(user)
                    .and_then(|session| session.contact(contact_id))
                    .map(|contact| (contact.status, contact.status_message.clone()));
                if let (Some((status, message)), Ok(contact)) =
                    (status, self.addressing().contact_jid(contact_id))
                {
                    self.send_status_presence(contact, from.clone(), status, message.as_deref());
                }
            }
            _ => {
                debug!(contact = %contact_id, type_ = ?presence.type_, "Ignoring contact presence");
            }
        }
    }

    /// Presence from a sender with no persisted credential.
    fn handle_unregistered_presence(
        &mut self,
        presence: &Presence,
        from: &Jid,
        to: &Jid,
    ) -> Result<(), GatewayError> {
        match presence.type_ {
            PresenceType::Probe => {
                // Auto-unsubscribe: the probed address no longer exists for
                // this sender.
                self.send_presence(to.clone(), from.clone(), PresenceType::Unsubscribe);
                self.send_presence(to.clone(), from.clone(), PresenceType::Unsubscribed);
            }
            PresenceType::Unsubscribe => {
                self.send_presence(to.clone(), from.clone(), PresenceType::Unsubscribed);
            }
            PresenceType::Unsubscribed => {}
            _ => {
                self.wire().send(presence_error(
                    presence,
                    conditions::REGISTRATION_REQUIRED,
                    error_types::AUTH,
                ));
            }
        }
        Ok(())
    }
}

/// Presence show values as they appear on the wire.
fn show_name(show: xmpp_parsers::presence::Show) -> &'static str {
    use xmpp_parsers::presence::Show;
    match show {
        Show::Away => "away",
        Show::Chat => "chat",
        Show::Dnd => "dnd",
        Show::Xa => "xa",
    }
}
