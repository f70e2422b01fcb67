//! The top-level bridge: run loop, dispatcher and shutdown.
//!
//! Two tasks serialize on one lock over [`BridgeGateway`]: the stanza loop
//! polls the inbound channel, the dispatcher drains the shared worker
//! event queue. Both poll with a short timeout so the online flag is
//! observed promptly; neither ever blocks while holding the lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use minidom::Element;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{info, warn};

use causeway_session::BridgeEvent;

use crate::gateway::BridgeGateway;

/// Poll interval of the stanza loop and the dispatcher.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Why [`Bridge::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The stop handle cleared the online flag.
    Stopped,
    /// The inbound stanza channel closed: the wire connection is gone and
    /// the caller should reconnect after its retry delay.
    WireClosed,
}

/// Signal-safe stop handle: requesting a stop is a single atomic store.
#[derive(Clone)]
pub struct StopHandle {
    online: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Owns the gateway lock and the event queue consumer.
pub struct Bridge {
    gateway: Arc<Mutex<BridgeGateway>>,
    events: mpsc::UnboundedReceiver<BridgeEvent>,
    online: Arc<AtomicBool>,
}

impl Bridge {
    /// Wrap a gateway and the worker event queue. The returned handle stops
    /// the bridge from any thread or signal context.
    pub fn new(
        gateway: BridgeGateway,
        events: mpsc::UnboundedReceiver<BridgeEvent>,
    ) -> (Self, StopHandle) {
        let online = Arc::new(AtomicBool::new(true));
        let handle = StopHandle {
            online: Arc::clone(&online),
        };
        (
            Self {
                gateway: Arc::new(Mutex::new(gateway)),
                events,
                online,
            },
            handle,
        )
    }

    /// Shared access to the gateway, for embedding and tests.
    pub fn gateway(&self) -> Arc<Mutex<BridgeGateway>> {
        Arc::clone(&self.gateway)
    }

    /// Run until stopped or the wire closes. Sessions are torn down before
    /// returning in either case.
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<Element>) -> RunOutcome {
        let Bridge {
            gateway,
            events,
            online,
        } = self;

        let dispatcher = tokio::spawn(dispatch_events(
            Arc::clone(&gateway),
            events,
            Arc::clone(&online),
        ));

        let outcome = loop {
            if !online.load(Ordering::SeqCst) {
                break RunOutcome::Stopped;
            }
            match timeout(POLL_INTERVAL, inbound.recv()).await {
                Err(_) => continue,
                Ok(None) => {
                    warn!("Inbound stanza channel closed");
                    break RunOutcome::WireClosed;
                }
                Ok(Some(element)) => {
                    let mut gateway = gateway.lock().await;
                    // Faults inside a handler never take the loop down.
                    if let Err(e) = gateway.handle_element(element).await {
                        warn!(error = %e, "Stanza handler failed");
                    }
                }
            }
        };

        online.store(false, Ordering::SeqCst);
        if dispatcher.await.is_err() {
            warn!("Dispatcher task panicked");
        }

        gateway.lock().await.shutdown_sessions();
        info!(outcome = ?outcome, "Bridge loop finished");
        outcome
    }
}

/// The outbound dispatcher: single consumer of the worker event queue.
async fn dispatch_events(
    gateway: Arc<Mutex<BridgeGateway>>,
    mut events: mpsc::UnboundedReceiver<BridgeEvent>,
    online: Arc<AtomicBool>,
) {
    while online.load(Ordering::SeqCst) {
        match timeout(POLL_INTERVAL, events.recv()).await {
            Err(_) => continue,
            Ok(None) => return,
            Ok(Some(event)) => {
                let mut gateway = gateway.lock().await;
                if let Err(e) = gateway.handle_event(event) {
                    warn!(error = %e, "Event handler failed");
                }
            }
        }
    }

    // One final drain for events already in flight when the flag cleared.
    while let Ok(event) = events.try_recv() {
        let mut gateway = gateway.lock().await;
        if let Err(e) = gateway.handle_event(event) {
            warn!(error = %e, "Event handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use causeway_session::{MemoryStore, RemoteDirectory, SessionRegistry};
    use causeway_session::testing::ScriptedConnector;

    use crate::gateway::GatewayConfig;
    use crate::outbound::stanza_channel;

    fn bridge() -> (Bridge, StopHandle) {
        let (_events_tx, events_rx) = mpsc::unbounded_channel::<BridgeEvent>();
        let connector = Arc::new(ScriptedConnector::new(RemoteDirectory::default()));
        let (worker_events_tx, _worker_events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry::new(connector, worker_events_tx));
        let (wire, _outbound) = stanza_channel();
        let config = GatewayConfig {
            domain: "chat.example.net".parse().unwrap(),
            conference_domain: None,
            display_name: "Causeway".to_string(),
            network: "chat".to_string(),
        };
        let gateway = BridgeGateway::new(config, wire, Arc::new(MemoryStore::new()), registry);
        Bridge::new(gateway, events_rx)
    }

    #[tokio::test]
    async fn stop_handle_ends_the_loop() {
        let (bridge, stop) = bridge();
        let (_inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        assert!(stop.is_online());
        stop.request_stop();
        let outcome = bridge.run(inbound_rx).await;
        assert_eq!(outcome, RunOutcome::Stopped);
    }

    #[tokio::test]
    async fn closed_wire_reports_reconnect() {
        let (bridge, _stop) = bridge();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        drop(inbound_tx);

        let outcome = bridge.run(inbound_rx).await;
        assert_eq!(outcome, RunOutcome::WireClosed);
    }
}
