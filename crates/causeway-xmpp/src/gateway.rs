//! The protocol-translation state machine.
//!
//! One [`BridgeGateway`] instance owns every per-user [`Session`] plus the
//! gateway-wide capability-discovery cache, and routes each inbound
//! [`Element`] to the matching handler. The event direction
//! (worker → stanza) enters through [`BridgeGateway::handle_event`] in
//! [`crate::events`].

use std::collections::HashMap;
use std::sync::Arc;

use jid::{BareJid, FullJid, Jid};
use minidom::Element;
use tracing::{debug, info, warn};
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::message::Message;
use xmpp_parsers::presence::{Presence, Show, Type as PresenceType};
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType};

use causeway_session::{
    ContactInfo, ControlMessage, CredentialStore, PresenceStatus, SessionRegistry,
};

use crate::addressing::Addressing;
use crate::error::{iq_error, GatewayError};
use crate::outbound::StanzaSender;
use crate::state::Session;
use crate::{ns, nodes};

/// Static configuration of the gateway component.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// The gateway's own address, e.g. `chat.example.net`.
    pub domain: BareJid,
    /// Conference domain for emulated rooms; `None` disables group chat.
    pub conference_domain: Option<BareJid>,
    /// Human-readable name shown in disco and the gateway's own vCard.
    pub display_name: String,
    /// Disco identity type naming the bridged network.
    pub network: String,
}

/// The stateful translation core. All access is serialized by the bridge's
/// shared lock; handlers never block on the wire.
pub struct BridgeGateway {
    config: GatewayConfig,
    addressing: Addressing,
    wire: StanzaSender,
    store: Arc<dyn CredentialStore>,
    registry: Arc<SessionRegistry>,
    sessions: HashMap<BareJid, Session>,
    /// Capability-discovery results cached per peer full address. Gateway
    /// wide, not per session: the registration-time probe answer arrives
    /// before the first session exists.
    disco_results: HashMap<FullJid, Vec<String>>,
    http: reqwest::Client,
}

impl BridgeGateway {
    pub fn new(
        config: GatewayConfig,
        wire: StanzaSender,
        store: Arc<dyn CredentialStore>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        let addressing = Addressing::new(config.domain.clone(), config.conference_domain.clone());
        Self {
            config,
            addressing,
            wire,
            store,
            registry,
            sessions: HashMap::new(),
            disco_results: HashMap::new(),
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    pub(crate) fn wire(&self) -> &StanzaSender {
        &self.wire
    }

    pub(crate) fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn session(&self, user: &BareJid) -> Option<&Session> {
        self.sessions.get(user)
    }

    pub(crate) fn session_mut(&mut self, user: &BareJid) -> Option<&mut Session> {
        self.sessions.get_mut(user)
    }

    pub(crate) fn insert_session(&mut self, user: BareJid, session: Session) {
        self.sessions.insert(user, session);
    }

    pub(crate) fn remove_session(&mut self, user: &BareJid) -> Option<Session> {
        self.sessions.remove(user)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Cache a peer's advertised disco features.
    pub(crate) fn cache_disco_result(&mut self, peer: FullJid, features: Vec<String>) {
        debug!(peer = %peer, count = features.len(), "Cached disco#info result");
        self.disco_results.insert(peer, features);
    }

    /// Whether any cached disco result for one of `user`'s resources
    /// advertises `feature`.
    pub(crate) fn peer_supports(&self, user: &BareJid, feature: &str) -> bool {
        self.disco_results.iter().any(|(peer, features)| {
            peer.to_bare() == *user && features.iter().any(|f| f == feature)
        })
    }

    /// Route one inbound element to its handler. Unparseable stanzas are
    /// logged and skipped; handler protocol errors become stanza replies
    /// inside the handlers themselves.
    pub async fn handle_element(&mut self, element: Element) -> Result<(), GatewayError> {
        match element.name() {
            "presence" => match parse_presence(element) {
                Some(presence) => self.handle_presence(presence),
                None => Ok(()),
            },
            "message" => match Message::try_from(element) {
                Ok(message) => self.handle_message(message),
                Err(e) => {
                    warn!(error = %e, "Dropping unparseable message stanza");
                    Ok(())
                }
            },
            "iq" => match Iq::try_from(element) {
                Ok(iq) => self.handle_iq(iq).await,
                Err(e) => {
                    warn!(error = %e, "Dropping unparseable iq stanza");
                    Ok(())
                }
            },
            other => {
                debug!(name = other, "Ignoring non-stanza element");
                Ok(())
            }
        }
    }

    /// Route an IQ by namespace and type.
    async fn handle_iq(&mut self, iq: Iq) -> Result<(), GatewayError> {
        match &iq.payload {
            IqType::Get(query) if query.is("query", ns::DISCO_INFO) => {
                self.handle_disco_info(&iq, query.attr("node"))
            }
            IqType::Get(query) if query.is("query", ns::DISCO_ITEMS) => {
                self.handle_disco_items(&iq, query.attr("node"))
            }
            IqType::Get(query) if query.is("query", ns::REGISTER) => {
                self.handle_register_get(&iq)
            }
            IqType::Set(query) if query.is("query", ns::REGISTER) => {
                let query = query.clone();
                self.handle_register_set(&iq, &query)
            }
            IqType::Get(vcard) if vcard.is("vCard", ns::VCARD) => self.handle_vcard(&iq).await,
            IqType::Result(Some(query)) if query.is("query", ns::DISCO_INFO) => {
                if let Some(Ok(peer)) = iq.from.clone().map(Jid::try_into_full) {
                    let features = query
                        .children()
                        .filter(|child| child.is("feature", ns::DISCO_INFO))
                        .filter_map(|feature| feature.attr("var"))
                        .map(str::to_string)
                        .collect();
                    self.cache_disco_result(peer, features);
                }
                Ok(())
            }
            IqType::Result(_) | IqType::Error(_) => {
                debug!(id = %iq.id, "Ignoring iq result/error");
                Ok(())
            }
            IqType::Get(_) | IqType::Set(_) => {
                self.wire.send(iq_error(
                    &iq,
                    DefinedCondition::FeatureNotImplemented,
                    ErrorType::Cancel,
                ));
                Ok(())
            }
        }
    }

    /// Send one status presence from a synthesized address to `to`.
    pub(crate) fn send_status_presence(
        &self,
        from: BareJid,
        to: Jid,
        status: PresenceStatus,
        status_message: Option<&str>,
    ) {
        let mut presence = match status {
            PresenceStatus::Online => Presence::new(PresenceType::None),
            PresenceStatus::Away => {
                let mut presence = Presence::new(PresenceType::None);
                presence.show = Some(Show::Xa);
                presence
            }
            PresenceStatus::Offline => Presence::new(PresenceType::Unavailable),
        };
        presence.from = Some(Jid::from(from));
        presence.to = Some(to);
        if let Some(text) = status_message {
            presence
                .statuses
                .insert(String::new(), text.to_string());
        }
        self.wire.send(presence);
    }

    /// Send a plain presence of `type_` from a gateway-owned address.
    pub(crate) fn send_presence(&self, from: Jid, to: Jid, type_: PresenceType) {
        let mut presence = Presence::new(type_);
        presence.from = Some(from);
        presence.to = Some(to);
        self.wire.send(presence);
    }

    /// Send a plain text message from the gateway's own address.
    pub(crate) fn send_notice(&self, to: Jid, subject: &str, body: &str) {
        let mut message = Message::new(Some(to));
        message.from = Some(Jid::from(self.config.domain.clone()));
        message.subjects.insert(
            String::new(),
            xmpp_parsers::message::Subject(subject.to_string()),
        );
        message
            .bodies
            .insert(String::new(), xmpp_parsers::message::Body(body.to_string()));
        self.wire.send(message);
    }

    /// Tear down one user's session: unavailable presence from the gateway
    /// and every synthesized contact address, then disconnect and
    /// unregister the worker.
    pub(crate) fn teardown_session(&mut self, user: &BareJid) {
        let Some(session) = self.sessions.remove(user) else {
            return;
        };
        info!(user = %user, "Tearing down session");
        self.send_presence(
            Jid::from(self.config.domain.clone()),
            Jid::from(user.clone()),
            PresenceType::Unavailable,
        );
        for contact_id in session.contacts.keys() {
            match self.addressing.contact_jid(contact_id) {
                Ok(contact) => self.send_presence(
                    Jid::from(contact),
                    Jid::from(user.clone()),
                    PresenceType::Unavailable,
                ),
                Err(e) => warn!(contact = %contact_id, error = %e, "Skipping unmappable contact"),
            }
        }
        self.registry.dispatch(user, ControlMessage::Disconnect);
        self.registry.remove(user);
    }

    /// Tear down every session; used on wire loss and on orderly shutdown.
    pub fn shutdown_sessions(&mut self) {
        let users: Vec<BareJid> = self.sessions.keys().cloned().collect();
        for user in users {
            self.teardown_session(&user);
        }
    }

    /// Last-known statuses of every contact in `user`'s session, for
    /// re-broadcast to a newly connected resource.
    pub(crate) fn contact_statuses(
        &self,
        user: &BareJid,
    ) -> Vec<(BareJid, PresenceStatus, Option<String>)> {
        let Some(session) = self.sessions.get(user) else {
            return Vec::new();
        };
        session
            .contacts
            .values()
            .filter_map(|contact| {
                self.addressing
                    .contact_jid(&contact.contact_id)
                    .ok()
                    .map(|jid| (jid, contact.status, contact.status_message.clone()))
            })
            .collect()
    }

    /// All contacts of `user`'s session, cloned for stanza synthesis.
    pub(crate) fn contact_list(&self, user: &BareJid) -> Vec<ContactInfo> {
        self.sessions
            .get(user)
            .map(|session| session.contacts.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

/// Parse a raw presence element, normalizing the legacy `invisible` type to
/// plain availability (some clients still send it; the remote service has
/// no matching state).
fn parse_presence(element: Element) -> Option<Presence> {
    if element.attr("type") == Some("invisible") {
        let mut presence = Presence::new(PresenceType::None);
        presence.from = element.attr("from").and_then(|j| j.parse().ok());
        presence.to = element.attr("to").and_then(|j| j.parse().ok());
        return Some(presence);
    }
    match Presence::try_from(element) {
        Ok(presence) => Some(presence),
        Err(e) => {
            warn!(error = %e, "Dropping unparseable presence stanza");
            None
        }
    }
}

/// Feature set advertised at the gateway's own address.
pub(crate) const GATEWAY_FEATURES: [&str; 5] = [
    ns::VERSION,
    ns::COMMANDS,
    ns::PRESENCE,
    ns::REGISTER,
    ns::CHATSTATES,
];

/// Feature set advertised at synthesized contact addresses.
pub(crate) const CONTACT_FEATURES: [&str; 3] = [ns::VCARD, ns::VERSION, ns::CHATSTATES];

/// Feature set advertised at emulated room addresses.
pub(crate) const ROOM_FEATURES: [&str; 5] = [
    ns::MUC,
    ns::MUC_UNIQUE,
    ns::VERSION,
    ns::DISCO_INFO,
    ns::DISCO_ITEMS,
];

/// Node listing used below the gateway address.
pub(crate) fn roster_node_name(config: &GatewayConfig) -> String {
    format!("{} Roster", config.display_name)
}

/// Items listed below the gateway address.
pub(crate) fn gateway_child_items(config: &GatewayConfig) -> Vec<(String, Option<String>, String)> {
    let mut items = vec![(
        config.domain.to_string(),
        Some(nodes::ROSTER.to_string()),
        roster_node_name(config),
    )];
    if let Some(conference) = &config.conference_domain {
        items.push((
            conference.to_string(),
            None,
            format!("{} Rooms", config.display_name),
        ));
    }
    items
}
