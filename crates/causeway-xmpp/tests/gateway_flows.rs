//! End-to-end gateway flows: stanzas in, stanzas out, with scripted remote
//! sessions behind the registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use minidom::Element;
use tokio::sync::mpsc;

use causeway_session::testing::{RemoteProbe, ScriptedConnector, SentCommand};
use causeway_session::{
    BridgeEvent, ChatScope, ContactInfo, ConversationInfo, CredentialStore, EventPayload,
    MemoryStore, PresenceStatus, RemoteDirectory, SessionRegistry, StoredCredential, TypingState,
};
use causeway_xmpp::{stanza_channel, BridgeGateway, GatewayConfig};

const DOMAIN: &str = "chat.example.net";
const CONFERENCE: &str = "rooms.chat.example.net";
const USER: &str = "someone@example.com";
const COMPONENT_NS: &str = "jabber:component:accept";
const MUC_USER_NS: &str = "http://jabber.org/protocol/muc#user";
const CHATSTATES_NS: &str = "http://jabber.org/protocol/chatstates";
const ROSTERX_NS: &str = "http://jabber.org/protocol/rosterx";
const REGISTER_NS: &str = "jabber:iq:register";

fn contact(id: &str, name: &str, status: PresenceStatus) -> ContactInfo {
    ContactInfo {
        contact_id: id.to_string(),
        display_name: name.to_string(),
        full_name: name.to_string(),
        emails: vec![],
        phones: vec![],
        avatar_url: None,
        status,
        status_message: None,
    }
}

fn directory() -> RemoteDirectory {
    RemoteDirectory {
        contacts: vec![
            contact("1001", "Alice Example", PresenceStatus::Online),
            contact("1002", "Bob Example", PresenceStatus::Away),
        ],
        conversations: vec![ConversationInfo {
            conversation_id: "conv-9".to_string(),
            topic: "Weekend plans".to_string(),
            participants: HashMap::from([
                ("2000".to_string(), "Me".to_string()),
                ("1001".to_string(), "Alice".to_string()),
                ("1002".to_string(), "Bob".to_string()),
            ]),
            self_id: "2000".to_string(),
        }],
    }
}

struct Harness {
    gateway: BridgeGateway,
    outbound: mpsc::UnboundedReceiver<Element>,
    events: mpsc::UnboundedReceiver<BridgeEvent>,
    probe: RemoteProbe,
    store: Arc<MemoryStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_connector(ScriptedConnector::new(directory()).with_direct("1001", "dm-1001"))
    }

    fn with_connector(connector: ScriptedConnector) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let probe = connector.probe();
        let registry = Arc::new(SessionRegistry::new(Arc::new(connector), events_tx));
        let (wire, outbound) = stanza_channel();
        let store = Arc::new(MemoryStore::new());
        let store_dyn: Arc<dyn CredentialStore> = store.clone();
        let config = GatewayConfig {
            domain: DOMAIN.parse().unwrap(),
            conference_domain: Some(CONFERENCE.parse().unwrap()),
            display_name: "Causeway".to_string(),
            network: "chat".to_string(),
        };
        let gateway = BridgeGateway::new(config, wire, store_dyn, registry);
        Self {
            gateway,
            outbound,
            events,
            probe,
            store,
        }
    }

    fn user() -> jid::BareJid {
        USER.parse().unwrap()
    }

    fn register(&self) {
        self.store
            .set(
                &Self::user(),
                &StoredCredential::new("https://signin.example", "token-1"),
            )
            .unwrap();
    }

    async fn handle(&mut self, xml: &str) {
        let element: Element = xml.parse().unwrap();
        self.gateway.handle_element(element).await.unwrap();
    }

    fn drain(&mut self) -> Vec<Element> {
        let mut stanzas = Vec::new();
        while let Ok(element) = self.outbound.try_recv() {
            stanzas.push(element);
        }
        stanzas
    }

    async fn next_worker_event(&mut self) -> BridgeEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for worker event")
            .expect("worker event queue closed")
    }

    /// Apply the two startup snapshots the worker emits after connecting.
    async fn sync_snapshots(&mut self) {
        for _ in 0..2 {
            let event = self.next_worker_event().await;
            self.gateway.handle_event(event).unwrap();
        }
    }

    /// Register, bring one resource online and apply the snapshots.
    async fn connect(&mut self, resource: &str) {
        self.register();
        self.handle(&format!(
            "<presence xmlns='{COMPONENT_NS}' from='{USER}/{resource}' to='{DOMAIN}'/>"
        ))
        .await;
        self.sync_snapshots().await;
        self.drain();
    }

    async fn wait_for_commands(&self, count: usize) -> Vec<SentCommand> {
        for _ in 0..100 {
            let sent = self.probe.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("remote never received {count} command(s): {:?}", self.probe.sent());
    }
}

fn presences_of_type<'a>(stanzas: &'a [Element], type_: Option<&str>) -> Vec<&'a Element> {
    stanzas
        .iter()
        .filter(|el| el.name() == "presence" && el.attr("type") == type_)
        .collect()
}

fn status_codes(presence: &Element) -> Vec<String> {
    presence
        .get_child("x", MUC_USER_NS)
        .map(|x| {
            x.children()
                .filter(|child| child.name() == "status")
                .filter_map(|child| child.attr("code"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn session_exists_iff_a_resource_is_connected() {
    let mut harness = Harness::new();
    harness.connect("pc").await;
    assert_eq!(harness.gateway.session_count(), 1);

    // A second resource joins the same session.
    harness
        .handle(&format!(
            "<presence xmlns='{COMPONENT_NS}' from='{USER}/tablet' to='{DOMAIN}'/>"
        ))
        .await;
    assert_eq!(harness.gateway.session_count(), 1);

    // First resource leaves: the session stays.
    harness
        .handle(&format!(
            "<presence xmlns='{COMPONENT_NS}' type='unavailable' from='{USER}/pc' to='{DOMAIN}'/>"
        ))
        .await;
    assert_eq!(harness.gateway.session_count(), 1);

    // Last resource leaves: session destroyed, worker disconnected.
    harness
        .handle(&format!(
            "<presence xmlns='{COMPONENT_NS}' type='unavailable' from='{USER}/tablet' to='{DOMAIN}'/>"
        ))
        .await;
    assert_eq!(harness.gateway.session_count(), 0);
    let sent = harness.wait_for_commands(1).await;
    assert!(sent.contains(&SentCommand::Disconnect));
}

#[tokio::test]
async fn subscribed_sends_one_roster_exchange_when_advertised() {
    let mut harness = Harness::new();
    harness.connect("pc").await;

    // The resource advertised XEP-0144 in a disco result.
    harness
        .handle(&format!(
            "<iq xmlns='{COMPONENT_NS}' type='result' id='d1' from='{USER}/pc' to='{DOMAIN}'>\
               <query xmlns='http://jabber.org/protocol/disco#info'>\
                 <feature var='{ROSTERX_NS}'/>\
               </query>\
             </iq>"
        ))
        .await;
    harness
        .handle(&format!(
            "<presence xmlns='{COMPONENT_NS}' type='subscribed' from='{USER}/pc' to='{DOMAIN}'/>"
        ))
        .await;

    let stanzas = harness.drain();
    let exchanges: Vec<&Element> = stanzas
        .iter()
        .filter(|el| el.name() == "message" && el.get_child("x", ROSTERX_NS).is_some())
        .collect();
    assert_eq!(exchanges.len(), 1, "exactly one roster-exchange message");
    let items: Vec<&Element> = exchanges[0]
        .get_child("x", ROSTERX_NS)
        .unwrap()
        .children()
        .filter(|el| el.name() == "item")
        .collect();
    assert_eq!(items.len(), 2);
    assert!(items
        .iter()
        .all(|item| item.attr("action") == Some("add")));

    // No per-contact subscribes in this mode, and the gateway confirms.
    assert!(presences_of_type(&stanzas, Some("subscribe")).is_empty());
    assert_eq!(presences_of_type(&stanzas, Some("subscribed")).len(), 1);

    // The flag is persisted.
    let credential = harness.store.get(&Harness::user()).unwrap().unwrap();
    assert!(credential.subscribed);
}

#[tokio::test]
async fn subscribed_falls_back_to_per_contact_subscribes() {
    let mut harness = Harness::new();
    harness.connect("pc").await;

    harness
        .handle(&format!(
            "<presence xmlns='{COMPONENT_NS}' type='subscribed' from='{USER}/pc' to='{DOMAIN}'/>"
        ))
        .await;

    let stanzas = harness.drain();
    let subscribes = presences_of_type(&stanzas, Some("subscribe"));
    assert_eq!(subscribes.len(), 2, "one subscribe per contact");
    let mut froms: Vec<&str> = subscribes
        .iter()
        .filter_map(|el| el.attr("from"))
        .collect();
    froms.sort_unstable();
    assert_eq!(
        froms,
        vec![
            "1001@chat.example.net",
            "1002@chat.example.net",
        ]
    );
    assert!(stanzas
        .iter()
        .all(|el| el.get_child("x", ROSTERX_NS).is_none()));
}

#[tokio::test]
async fn muc_join_echoes_participants_and_self_presence() {
    let mut harness = Harness::new();
    harness.connect("pc").await;

    harness
        .handle(&format!(
            "<presence xmlns='{COMPONENT_NS}' from='{USER}/pc' to='conv-9@{CONFERENCE}/WrongNick'>\
               <x xmlns='http://jabber.org/protocol/muc'/>\
             </presence>"
        ))
        .await;

    let stanzas = harness.drain();
    let presences = presences_of_type(&stanzas, None);
    assert_eq!(presences.len(), 3, "two participants plus self-presence");

    let self_presence = presences
        .iter()
        .find(|el| el.attr("from") == Some(&*format!("conv-9@{CONFERENCE}/Me")))
        .expect("self presence from assigned nickname");
    let codes = status_codes(self_presence);
    assert!(codes.contains(&"110".to_string()));
    assert!(codes.contains(&"210".to_string()));

    for nick in ["Alice", "Bob"] {
        let occupant = presences
            .iter()
            .find(|el| el.attr("from") == Some(&*format!("conv-9@{CONFERENCE}/{nick}")))
            .unwrap_or_else(|| panic!("presence for {nick}"));
        let x = occupant.get_child("x", MUC_USER_NS).expect("muc#user payload");
        let item = x
            .children()
            .find(|child| child.name() == "item")
            .expect("item element");
        assert_eq!(item.attr("role"), Some("participant"));
        assert_eq!(item.attr("affiliation"), Some("member"));
        assert!(status_codes(occupant).is_empty());
    }

    // A group message now reaches the joined resource.
    harness
        .gateway
        .handle_event(BridgeEvent::new(
            Harness::user(),
            EventPayload::ChatMessage {
                scope: ChatScope::Group,
                conversation_id: "conv-9".to_string(),
                sender_id: "1002".to_string(),
                text: "anyone up?".to_string(),
            },
        ))
        .unwrap();
    let stanzas = harness.drain();
    assert_eq!(stanzas.len(), 1);
    assert_eq!(stanzas[0].attr("type"), Some("groupchat"));
    assert_eq!(
        stanzas[0].attr("from"),
        Some(&*format!("conv-9@{CONFERENCE}/Bob"))
    );
    assert_eq!(stanzas[0].attr("to"), Some(&*format!("{USER}/pc")));

    // After leaving, group messages are no longer delivered.
    harness
        .handle(&format!(
            "<presence xmlns='{COMPONENT_NS}' type='unavailable' from='{USER}/pc' \
             to='conv-9@{CONFERENCE}/Me'/>"
        ))
        .await;
    let leave = harness.drain();
    let unavailable = presences_of_type(&leave, Some("unavailable"));
    assert_eq!(unavailable.len(), 1);
    assert!(status_codes(unavailable[0]).contains(&"110".to_string()));

    harness
        .gateway
        .handle_event(BridgeEvent::new(
            Harness::user(),
            EventPayload::ChatMessage {
                scope: ChatScope::Group,
                conversation_id: "conv-9".to_string(),
                sender_id: "1001".to_string(),
                text: "gone already?".to_string(),
            },
        ))
        .unwrap();
    assert!(harness.drain().is_empty());
}

#[tokio::test]
async fn unknown_room_join_is_an_item_not_found_error() {
    let mut harness = Harness::new();
    harness.connect("pc").await;

    harness
        .handle(&format!(
            "<presence xmlns='{COMPONENT_NS}' from='{USER}/pc' to='nope@{CONFERENCE}/Nick'>\
               <x xmlns='http://jabber.org/protocol/muc'/>\
             </presence>"
        ))
        .await;
    let stanzas = harness.drain();
    let errors = presences_of_type(&stanzas, Some("error"));
    assert_eq!(errors.len(), 1);
    let error = errors[0].get_child("error", COMPONENT_NS).unwrap();
    assert!(error
        .get_child("item-not-found", "urn:ietf:params:xml:ns:xmpp-stanzas")
        .is_some());
}

#[tokio::test]
async fn typing_state_round_trip() {
    let mut harness = Harness::new();
    harness.connect("pc").await;

    // Inbound: empty body with composing → typing started; without a tag →
    // typing paused.
    harness
        .handle(&format!(
            "<message xmlns='{COMPONENT_NS}' type='chat' from='{USER}/pc' to='1001@{DOMAIN}'>\
               <composing xmlns='{CHATSTATES_NS}'/>\
             </message>"
        ))
        .await;
    harness
        .handle(&format!(
            "<message xmlns='{COMPONENT_NS}' type='chat' from='{USER}/pc' to='1001@{DOMAIN}'/>"
        ))
        .await;
    let sent = harness.wait_for_commands(2).await;
    assert_eq!(
        sent,
        vec![
            SentCommand::Typing {
                conversation_id: "dm-1001".to_string(),
                typing: true,
            },
            SentCommand::Typing {
                conversation_id: "dm-1001".to_string(),
                typing: false,
            },
        ]
    );

    // Outbound: started → composing, paused/stopped → paused.
    for (state, tag) in [
        (TypingState::Started, "composing"),
        (TypingState::Paused, "paused"),
        (TypingState::Stopped, "paused"),
    ] {
        harness
            .gateway
            .handle_event(BridgeEvent::new(
                Harness::user(),
                EventPayload::Typing {
                    scope: ChatScope::Direct,
                    conversation_id: "dm-1001".to_string(),
                    sender_id: "1001".to_string(),
                    state,
                },
            ))
            .unwrap();
        let stanzas = harness.drain();
        assert_eq!(stanzas.len(), 1);
        assert!(
            stanzas[0].get_child(tag, CHATSTATES_NS).is_some(),
            "expected {tag} tag"
        );
        assert!(stanzas[0].get_child("body", COMPONENT_NS).is_none());
    }
}

#[tokio::test]
async fn chat_messages_flow_both_ways() {
    let mut harness = Harness::new();
    harness.connect("pc").await;

    harness
        .handle(&format!(
            "<message xmlns='{COMPONENT_NS}' type='chat' from='{USER}/pc' to='1001@{DOMAIN}'>\
               <body>hello there</body>\
             </message>"
        ))
        .await;
    let sent = harness.wait_for_commands(1).await;
    assert_eq!(
        sent[0],
        SentCommand::Chat {
            conversation_id: "dm-1001".to_string(),
            text: "hello there".to_string(),
        }
    );

    harness
        .gateway
        .handle_event(BridgeEvent::new(
            Harness::user(),
            EventPayload::ChatMessage {
                scope: ChatScope::Direct,
                conversation_id: "dm-1001".to_string(),
                sender_id: "1001".to_string(),
                text: "hi yourself".to_string(),
            },
        ))
        .unwrap();
    let stanzas = harness.drain();
    assert_eq!(stanzas.len(), 1);
    assert_eq!(stanzas[0].attr("type"), Some("chat"));
    assert_eq!(
        stanzas[0].attr("from"),
        Some(&*format!("1001@{DOMAIN}"))
    );
    let body = stanzas[0].get_child("body", COMPONENT_NS).unwrap();
    assert_eq!(body.text(), "hi yourself");
    assert!(stanzas[0].get_child("active", CHATSTATES_NS).is_some());
}

#[tokio::test]
async fn registration_round_trip() {
    let mut harness = Harness::new();

    // Unregistered get: blank fields plus a disco probe.
    harness
        .handle(&format!(
            "<iq xmlns='{COMPONENT_NS}' type='get' id='r1' from='{USER}/pc' to='{DOMAIN}'>\
               <query xmlns='{REGISTER_NS}'/>\
             </iq>"
        ))
        .await;
    let stanzas = harness.drain();
    assert_eq!(stanzas.len(), 2, "result plus disco probe");
    let query = stanzas[0].get_child("query", REGISTER_NS).unwrap();
    assert!(query.get_child("registered", REGISTER_NS).is_none());
    assert!(query.get_child("url", REGISTER_NS).unwrap().text().is_empty());
    assert_eq!(stanzas[1].attr("type"), Some("get"));
    assert!(stanzas[1]
        .get_child("query", "http://jabber.org/protocol/disco#info")
        .is_some());

    // Set with url and token.
    harness
        .handle(&format!(
            "<iq xmlns='{COMPONENT_NS}' type='set' id='r2' from='{USER}/pc' to='{DOMAIN}'>\
               <query xmlns='{REGISTER_NS}'><url>U</url><password>T</password></query>\
             </iq>"
        ))
        .await;
    let stanzas = harness.drain();
    assert_eq!(stanzas[0].attr("type"), Some("result"));

    // Get now returns the stored values and the registered marker.
    harness
        .handle(&format!(
            "<iq xmlns='{COMPONENT_NS}' type='get' id='r3' from='{USER}/pc' to='{DOMAIN}'>\
               <query xmlns='{REGISTER_NS}'/>\
             </iq>"
        ))
        .await;
    let stanzas = harness.drain();
    let query = stanzas[0].get_child("query", REGISTER_NS).unwrap();
    assert_eq!(query.get_child("url", REGISTER_NS).unwrap().text(), "U");
    assert_eq!(query.get_child("password", REGISTER_NS).unwrap().text(), "T");
    assert!(query.get_child("registered", REGISTER_NS).is_some());

    // Remove: acknowledged, followed by the unsubscribe pair.
    harness
        .handle(&format!(
            "<iq xmlns='{COMPONENT_NS}' type='set' id='r4' from='{USER}/pc' to='{DOMAIN}'>\
               <query xmlns='{REGISTER_NS}'><remove/></query>\
             </iq>"
        ))
        .await;
    let stanzas = harness.drain();
    assert_eq!(stanzas[0].attr("type"), Some("result"));
    assert_eq!(presences_of_type(&stanzas, Some("unsubscribe")).len(), 1);
    assert_eq!(presences_of_type(&stanzas, Some("unsubscribed")).len(), 1);

    // Blank again afterwards.
    harness
        .handle(&format!(
            "<iq xmlns='{COMPONENT_NS}' type='get' id='r5' from='{USER}/pc' to='{DOMAIN}'>\
               <query xmlns='{REGISTER_NS}'/>\
             </iq>"
        ))
        .await;
    let stanzas = harness.drain();
    let query = stanzas[0].get_child("query", REGISTER_NS).unwrap();
    assert!(query.get_child("registered", REGISTER_NS).is_none());
    assert!(query.get_child("url", REGISTER_NS).unwrap().text().is_empty());
}

#[tokio::test]
async fn roster_node_lists_session_contacts() {
    let mut harness = Harness::new();
    harness.connect("pc").await;

    harness
        .handle(&format!(
            "<iq xmlns='{COMPONENT_NS}' type='get' id='d2' from='{USER}/pc' to='{DOMAIN}'>\
               <query xmlns='http://jabber.org/protocol/disco#items' node='roster'/>\
             </iq>"
        ))
        .await;
    let stanzas = harness.drain();
    let query = stanzas[0]
        .get_child("query", "http://jabber.org/protocol/disco#items")
        .unwrap();
    let mut items: Vec<(String, String)> = query
        .children()
        .filter(|el| el.name() == "item")
        .map(|el| {
            (
                el.attr("jid").unwrap_or_default().to_string(),
                el.attr("name").unwrap_or_default().to_string(),
            )
        })
        .collect();
    items.sort();
    assert_eq!(
        items,
        vec![
            ("1001@chat.example.net".to_string(), "Alice Example".to_string()),
            ("1002@chat.example.net".to_string(), "Bob Example".to_string()),
        ]
    );
}

#[tokio::test]
async fn unregistered_sender_gets_registration_required() {
    let mut harness = Harness::new();

    harness
        .handle(&format!(
            "<presence xmlns='{COMPONENT_NS}' from='{USER}/pc' to='{DOMAIN}'/>"
        ))
        .await;
    let stanzas = harness.drain();
    let errors = presences_of_type(&stanzas, Some("error"));
    assert_eq!(errors.len(), 1);
    let error = errors[0].get_child("error", COMPONENT_NS).unwrap();
    assert!(error
        .get_child(
            "registration-required",
            "urn:ietf:params:xml:ns:xmpp-stanzas"
        )
        .is_some());

    // A probe instead triggers the auto-unsubscribe pair.
    harness
        .handle(&format!(
            "<presence xmlns='{COMPONENT_NS}' type='probe' from='{USER}/pc' to='1001@{DOMAIN}'/>"
        ))
        .await;
    let stanzas = harness.drain();
    assert_eq!(presences_of_type(&stanzas, Some("unsubscribe")).len(), 1);
    assert_eq!(presences_of_type(&stanzas, Some("unsubscribed")).len(), 1);
}

#[tokio::test]
async fn remote_auth_failure_notifies_and_tears_down() {
    let mut harness = Harness::with_connector(ScriptedConnector::failing("token expired"));
    harness.register();
    harness
        .handle(&format!(
            "<presence xmlns='{COMPONENT_NS}' from='{USER}/pc' to='{DOMAIN}'/>"
        ))
        .await;
    assert_eq!(harness.gateway.session_count(), 1);
    harness.drain();

    let event = harness.next_worker_event().await;
    assert!(matches!(
        event.payload,
        EventPayload::SessionFailed { ref reason } if reason.contains("token expired")
    ));
    harness.gateway.handle_event(event).unwrap();

    assert_eq!(harness.gateway.session_count(), 0);
    let stanzas = harness.drain();
    let notice = stanzas
        .iter()
        .find(|el| el.name() == "message")
        .expect("failure notice");
    assert!(notice
        .get_child("body", COMPONENT_NS)
        .map(|body| body.text().contains("token expired"))
        .unwrap_or(false));
    assert_eq!(presences_of_type(&stanzas, Some("unavailable")).len(), 1);
}

#[tokio::test]
async fn new_resource_receives_contact_status_rebroadcast() {
    let mut harness = Harness::new();
    harness.connect("pc").await;

    harness
        .handle(&format!(
            "<presence xmlns='{COMPONENT_NS}' from='{USER}/tablet' to='{DOMAIN}'/>"
        ))
        .await;
    let stanzas = harness.drain();
    let to_tablet: Vec<&Element> = stanzas
        .iter()
        .filter(|el| el.attr("to") == Some(&*format!("{USER}/tablet")))
        .collect();
    // One status presence per contact: Alice online, Bob away (xa).
    assert_eq!(to_tablet.len(), 2);
    let away = to_tablet
        .iter()
        .find(|el| el.attr("from") == Some(&*format!("1002@{DOMAIN}")))
        .expect("status from Bob");
    assert_eq!(
        away.get_child("show", COMPONENT_NS).map(|el| el.text()),
        Some("xa".to_string())
    );
}
