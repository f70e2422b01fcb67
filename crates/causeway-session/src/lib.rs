//! # causeway-session
//!
//! Session-side core of the Causeway gateway: the typed message vocabulary
//! exchanged with the XMPP translation layer, the boundaries to the remote
//! chat service and the credential store, and the per-user session workers
//! with their registry.
//!
//! ## Architecture
//!
//! - **Events**: [`ControlMessage`] flows gateway → worker, [`BridgeEvent`]
//!   flows worker → gateway through one shared queue.
//! - **Workers**: each bridged user is served by a [`worker`] running an
//!   isolated single-threaded runtime on its own OS thread, so one user's
//!   remote I/O latency never stalls another user or the gateway.
//! - **Registry**: [`SessionRegistry`] maps bridged users to their workers.
//!   It is constructed once and injected into the gateway, never a process
//!   global.
//! - **Boundaries**: [`RemoteConnector`]/[`RemoteClient`] abstract the remote
//!   service's client library; [`CredentialStore`] abstracts the persisted
//!   registration records.

pub mod credential;
pub mod event;
pub mod registry;
pub mod remote;
pub mod testing;
pub mod worker;

pub use credential::{CredentialStore, MemoryStore, StoreError, StoredCredential};
pub use event::{
    BridgeEvent, ChatScope, ContactInfo, ControlMessage, ConversationInfo, EventPayload,
    PresenceStatus, TypingState,
};
pub use registry::SessionRegistry;
pub use remote::{
    PresenceSnapshot, RemoteClient, RemoteConnector, RemoteDirectory, RemoteError, RemoteEvent,
};
pub use worker::SessionHandle;
