//! MUC emulation over the remote service's group conversations.
//!
//! Rooms are not real MUC rooms: membership mirrors the remote
//! conversation's participant list, every occupant is role `participant`
//! and affiliation `member`, and the joining user's own presence carries
//! status codes 110 (self-presence) and 210 (the service assigns the
//! nickname).

use jid::{BareJid, FullJid, Jid};
use minidom::Element;
use tracing::{debug, warn};
use xmpp_parsers::muc::user::{Affiliation, Item, MucUser, Role, Status};
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use crate::error::{conditions, error_types, presence_error, GatewayError};
use crate::gateway::BridgeGateway;

impl BridgeGateway {
    /// Presence addressed to an occupant JID of an emulated room.
    pub(crate) fn handle_room_presence(
        &mut self,
        presence: &Presence,
        from: &Jid,
        user: &BareJid,
        conversation_id: &str,
    ) -> Result<(), GatewayError> {
        let Ok(resource) = from.clone().try_into_full() else {
            debug!(room = %conversation_id, "Ignoring room presence without sender resource");
            return Ok(());
        };

        match presence.type_ {
            PresenceType::None => {
                self.handle_room_join(presence, user, conversation_id, resource)
            }
            PresenceType::Unavailable => {
                self.handle_room_leave(user, conversation_id, resource);
                Ok(())
            }
            _ => {
                debug!(room = %conversation_id, type_ = ?presence.type_, "Ignoring room presence");
                Ok(())
            }
        }
    }

    /// Join: record the resource, then echo the current occupant list.
    fn handle_room_join(
        &mut self,
        presence: &Presence,
        user: &BareJid,
        conversation_id: &str,
        resource: FullJid,
    ) -> Result<(), GatewayError> {
        let Some(room) = self
            .session_mut(user)
            .and_then(|session| session.conversations.get_mut(conversation_id))
        else {
            self.wire().send(presence_error(
                presence,
                conditions::ITEM_NOT_FOUND,
                error_types::CANCEL,
            ));
            return Ok(());
        };

        room.joined.insert(resource.clone());
        let self_id = room.info.self_id.clone();
        let self_nick = room.self_nick().to_string();
        let others: Vec<String> = room
            .info
            .participants
            .iter()
            .filter(|(id, _)| **id != self_id)
            .map(|(_, nick)| nick.clone())
            .collect();

        // One presence per other participant, then the self-presence with
        // status codes 110 and 210.
        let mut echoes = Vec::new();
        for nick in others {
            if let Some(occupant) = self.occupant_presence(conversation_id, &nick, &resource, &[]) {
                echoes.push(occupant);
            }
        }
        if let Some(own) = self.occupant_presence(
            conversation_id,
            &self_nick,
            &resource,
            &[Status::SelfPresence, Status::AssignedNick],
        ) {
            echoes.push(own);
        }
        for echo in echoes {
            self.wire().send(echo);
        }
        debug!(user = %user, room = %conversation_id, resource = %resource, "Joined emulated room");
        Ok(())
    }

    /// Leave: drop the resource and confirm with a self unavailable.
    fn handle_room_leave(&mut self, user: &BareJid, conversation_id: &str, resource: FullJid) {
        let Some(room) = self
            .session_mut(user)
            .and_then(|session| session.conversations.get_mut(conversation_id))
        else {
            return;
        };
        if !room.joined.remove(&resource) {
            return;
        }
        let self_nick = room.self_nick().to_string();

        if let Some(occupant) = self.occupant_jid_checked(conversation_id, &self_nick) {
            let mut presence = Presence::new(PresenceType::Unavailable);
            presence.from = Some(Jid::from(occupant));
            presence.to = Some(Jid::from(resource.clone()));
            presence.payloads.push(muc_user_element(
                Affiliation::Member,
                Role::None,
                &[Status::SelfPresence],
            ));
            self.wire().send(presence);
        }
        debug!(user = %user, room = %conversation_id, resource = %resource, "Left emulated room");
    }

    /// Build an occupant presence from `nick`'s room address to `to`.
    fn occupant_presence(
        &self,
        conversation_id: &str,
        nick: &str,
        to: &FullJid,
        statuses: &[Status],
    ) -> Option<Presence> {
        let occupant = self.occupant_jid_checked(conversation_id, nick)?;
        let mut presence = Presence::new(PresenceType::None);
        presence.from = Some(Jid::from(occupant));
        presence.to = Some(Jid::from(to.clone()));
        presence.payloads.push(muc_user_element(
            Affiliation::Member,
            Role::Participant,
            statuses,
        ));
        Some(presence)
    }

    fn occupant_jid_checked(&self, conversation_id: &str, nick: &str) -> Option<FullJid> {
        match self.addressing().occupant_jid(conversation_id, nick)? {
            Ok(occupant) => Some(occupant),
            Err(e) => {
                warn!(room = %conversation_id, nick = %nick, error = %e, "Unmappable occupant address");
                None
            }
        }
    }
}

/// `<x xmlns='…muc#user'>` payload with one item and the given status codes.
fn muc_user_element(affiliation: Affiliation, role: Role, statuses: &[Status]) -> Element {
    let muc_user = MucUser {
        status: statuses.to_vec(),
        items: vec![Item {
            affiliation,
            role,
            jid: None,
            nick: None,
            actor: None,
            continue_: None,
            reason: None,
        }],
    };
    muc_user.into()
}
