//! Per-user session worker.
//!
//! Each bridged user gets a dedicated OS thread driving a current-thread
//! runtime: suspension happens only at calls into the remote service and at
//! channel operations, and no two operations for the same user ever run
//! concurrently. Commands are scheduled onto the loop from any thread
//! through the handle's queue; they are fire-and-forget.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use jid::BareJid;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::credential::StoredCredential;
use crate::event::{
    BridgeEvent, ChatScope, ControlMessage, ConversationInfo, EventPayload, TypingState,
};
use crate::remote::{RemoteClient, RemoteConnector, RemoteEvent};

/// Handle to a running session worker.
///
/// Owned by the registry. Exposes only the command queue and a completion
/// signal; the worker's loop is never reachable from outside.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<ControlMessage>,
    thread: thread::JoinHandle<()>,
}

impl SessionHandle {
    /// Schedule a command onto the worker's loop. Returns false when the
    /// loop has already stopped.
    pub fn submit(&self, message: ControlMessage) -> bool {
        self.commands.send(message).is_ok()
    }

    /// Whether the worker thread has finished.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Start a worker thread for `user`. The thread authenticates against the
/// remote service and runs until `Disconnect` or a session failure.
pub(crate) fn spawn(
    user: BareJid,
    credential: StoredCredential,
    connector: Arc<dyn RemoteConnector>,
    events: mpsc::UnboundedSender<BridgeEvent>,
) -> std::io::Result<SessionHandle> {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let thread_user = user.clone();
    let thread = thread::Builder::new()
        .name(format!("session-{user}"))
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!(user = %thread_user, error = %e, "Failed to build session runtime");
                    fail(&events, &thread_user, e.to_string());
                    return;
                }
            };
            runtime.block_on(run(thread_user, credential, connector, command_rx, events));
        })?;
    Ok(SessionHandle { commands, thread })
}

/// The worker loop: authenticate, connect, snapshot, then serve commands
/// and remote events until disconnected.
async fn run(
    user: BareJid,
    credential: StoredCredential,
    connector: Arc<dyn RemoteConnector>,
    mut commands: mpsc::UnboundedReceiver<ControlMessage>,
    events: mpsc::UnboundedSender<BridgeEvent>,
) {
    let mut client = match connector.authenticate(&credential).await {
        Ok(client) => client,
        Err(e) => {
            warn!(user = %user, error = %e, "Remote authentication failed");
            fail(&events, &user, e.to_string());
            return;
        }
    };

    if let Err(e) = client.connect().await {
        warn!(user = %user, error = %e, "Remote connection failed");
        fail(&events, &user, e.to_string());
        return;
    }
    info!(user = %user, "Remote session connected");

    let mut remote_events = client.take_events();

    let directory = match client.fetch_directory().await {
        Ok(directory) => directory,
        Err(e) => {
            warn!(user = %user, error = %e, "Directory fetch failed");
            let _ = client.disconnect().await;
            fail(&events, &user, e.to_string());
            return;
        }
    };

    let mut contacts = directory.contacts;
    let contact_ids: Vec<String> = contacts.iter().map(|c| c.contact_id.clone()).collect();
    match client.query_presence(&contact_ids).await {
        Ok(snapshots) => {
            for snapshot in snapshots {
                if let Some(contact) = contacts
                    .iter_mut()
                    .find(|c| c.contact_id == snapshot.contact_id)
                {
                    contact.status = snapshot.status;
                    contact.status_message = snapshot.status_message;
                }
            }
        }
        // Non-fatal: the directory still goes out, just without fresh presence.
        Err(e) => warn!(user = %user, error = %e, "Batched presence query failed"),
    }

    let conversations: HashMap<String, ConversationInfo> = directory
        .conversations
        .iter()
        .map(|c| (c.conversation_id.clone(), c.clone()))
        .collect();

    // The snapshots are the first two events, in this order, before anything
    // else is emitted for this user.
    let _ = events.send(BridgeEvent::new(
        user.clone(),
        EventPayload::ContactsSnapshot(contacts),
    ));
    let _ = events.send(BridgeEvent::new(
        user.clone(),
        EventPayload::ConversationsSnapshot(directory.conversations),
    ));

    let mut state = WorkerState::default();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None | Some(ControlMessage::Disconnect) => {
                    debug!(user = %user, "Disconnecting remote session");
                    if let Err(e) = client.disconnect().await {
                        warn!(user = %user, error = %e, "Remote disconnect failed");
                    }
                    break;
                }
                Some(command) => {
                    handle_command(command, &mut state, &conversations, client.as_mut(), &user).await;
                }
            },
            event = remote_events.recv() => match event {
                Some(event) => {
                    if let Some(payload) = translate_event(event) {
                        let _ = events.send(BridgeEvent::new(user.clone(), payload));
                    }
                }
                None => {
                    warn!(user = %user, "Remote event stream closed");
                    fail(&events, &user, "connection to the remote service was lost".to_string());
                    break;
                }
            },
        }
    }

    info!(user = %user, "Session worker stopped");
}

/// Presence the user last asked the gateway to mirror. Cached only; the
/// remote service has no rich presence push.
#[derive(Debug, Default)]
struct WorkerState {
    connected: bool,
    presence_kind: Option<String>,
    presence_show: Option<String>,
}

async fn handle_command(
    command: ControlMessage,
    state: &mut WorkerState,
    conversations: &HashMap<String, ConversationInfo>,
    client: &mut dyn RemoteClient,
    user: &BareJid,
) {
    match command {
        ControlMessage::Connect => {
            state.connected = true;
            debug!(user = %user, connected = state.connected, "Marked session connected");
        }
        ControlMessage::SetPresence { kind, show } => {
            state.presence_kind = kind;
            state.presence_show = show;
            debug!(
                user = %user,
                kind = ?state.presence_kind,
                show = ?state.presence_show,
                "Cached own presence"
            );
        }
        ControlMessage::SendChatMessage {
            scope,
            target,
            text,
        } => {
            let Some(conversation_id) = resolve_target(scope, &target, conversations, client)
            else {
                debug!(user = %user, target = %target, "Dropping chat message for unknown target");
                return;
            };
            if let Err(e) = client.send_chat_message(&conversation_id, &text).await {
                warn!(user = %user, conversation = %conversation_id, error = %e, "Sending chat message failed");
            }
        }
        ControlMessage::SendTyping { target, state } => {
            let Some(conversation_id) =
                resolve_target(ChatScope::Direct, &target, conversations, client)
            else {
                debug!(user = %user, target = %target, "Dropping typing update for unknown target");
                return;
            };
            let typing = state == TypingState::Started;
            if let Err(e) = client.set_typing(&conversation_id, typing).await {
                warn!(user = %user, conversation = %conversation_id, error = %e, "Sending typing update failed");
            }
        }
        // Terminal commands are handled by the loop itself.
        ControlMessage::Disconnect => {}
    }
}

/// Resolve a command target to a conversation id: direct lookup through the
/// client for one-to-one targets, conversation-id lookup for group targets.
fn resolve_target(
    scope: ChatScope,
    target: &str,
    conversations: &HashMap<String, ConversationInfo>,
    client: &dyn RemoteClient,
) -> Option<String> {
    match scope {
        ChatScope::Direct => client.direct_conversation(target),
        ChatScope::Group => conversations
            .contains_key(target)
            .then(|| target.to_string()),
    }
}

/// Convert one remote event into zero or one bridge event. Events caused by
/// the bridged user's own actions never echo back.
fn translate_event(event: RemoteEvent) -> Option<EventPayload> {
    match event {
        RemoteEvent::PresenceChanged {
            contact_id,
            status,
            status_message,
        } => Some(EventPayload::Presence {
            contact_id,
            status,
            status_message,
        }),
        RemoteEvent::MessageReceived {
            sender_is_self: true,
            ..
        }
        | RemoteEvent::TypingChanged {
            sender_is_self: true,
            ..
        } => None,
        RemoteEvent::MessageReceived {
            conversation_id,
            conversation_kind,
            sender_id,
            text,
            ..
        } => Some(EventPayload::ChatMessage {
            scope: conversation_kind,
            conversation_id,
            sender_id,
            text,
        }),
        RemoteEvent::TypingChanged {
            conversation_id,
            conversation_kind,
            sender_id,
            state,
            ..
        } => Some(EventPayload::Typing {
            scope: conversation_kind,
            conversation_id,
            sender_id,
            state,
        }),
    }
}

fn fail(events: &mpsc::UnboundedSender<BridgeEvent>, user: &BareJid, reason: String) {
    let _ = events.send(BridgeEvent::new(
        user.clone(),
        EventPayload::SessionFailed { reason },
    ));
}
