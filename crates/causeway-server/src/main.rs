use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use causeway_session::{CredentialStore, SessionRegistry};
use causeway_xmpp::{stanza_channel, Bridge, BridgeGateway, RunOutcome};

mod component;
mod config;
mod loopback;
mod store;

use config::ServerConfig;
use loopback::LoopbackConnector;
use store::FileStore;

/// Fixed delay before re-dialing a lost component connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Causeway gateway starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("CAUSEWAY_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1))
        .unwrap_or_else(|| "causeway.toml".to_string());
    let config = ServerConfig::load(Path::new(&config_path))?;
    let gateway_config = config.gateway_config()?;

    let store: Arc<dyn CredentialStore> = Arc::new(FileStore::open(&config.store.path)?);
    // The remote backend is pluggable through RemoteConnector; the built-in
    // loopback backend serves development deployments.
    let connector = Arc::new(LoopbackConnector::new());

    loop {
        let component = match component::connect(&config.component, &config.gateway.domain).await {
            Ok(component) => component,
            Err(e) => {
                warn!(error = %e, "Component connection failed; retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        info!(domain = %config.gateway.domain, "Component connected");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry::new(connector.clone(), events_tx));
        let (wire, outbound_rx) = stanza_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let gateway = BridgeGateway::new(
            gateway_config.clone(),
            wire,
            Arc::clone(&store),
            registry,
        );
        let (bridge, stop) = Bridge::new(gateway, events_rx);

        let io = tokio::spawn(component::run(component, inbound_tx, outbound_rx));
        let signal_stop = stop.clone();
        let signals = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Stop requested");
                signal_stop.request_stop();
            }
        });

        let outcome = bridge.run(inbound_rx).await;
        io.abort();

        match outcome {
            RunOutcome::Stopped => break,
            RunOutcome::WireClosed => {
                signals.abort();
                warn!(delay = ?RECONNECT_DELAY, "Wire connection lost; reconnecting");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }

    store.flush()?;
    info!("Causeway gateway stopped");
    Ok(())
}
