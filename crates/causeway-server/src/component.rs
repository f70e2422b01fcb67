//! XEP-0114 component link.
//!
//! Owns the tokio-xmpp component connection: inbound stanzas are forwarded
//! into the bridge's channel, the gateway's outbound channel is drained
//! onto the wire. The connection object is only ever touched from this
//! task.

use futures::StreamExt;
use minidom::Element;
use tokio::sync::mpsc;
use tokio_xmpp::tcp::TcpServerConnector;
use tokio_xmpp::Component;
use tracing::{info, warn};

use crate::config::ComponentConfig;

/// Dial the XMPP server and complete the component handshake.
pub async fn connect(
    config: &ComponentConfig,
    domain: &str,
) -> Result<Component<TcpServerConnector>, tokio_xmpp::Error> {
    info!(domain, server = %config.server, port = config.port, "Connecting component");
    Component::new(
        domain,
        &config.secret,
        format!("{}:{}", config.server, config.port),
    )
    .await
}

/// Drive the connection until either side closes.
pub async fn run(
    mut component: Component<TcpServerConnector>,
    inbound: mpsc::UnboundedSender<Element>,
    mut outbound: mpsc::UnboundedReceiver<Element>,
) {
    loop {
        tokio::select! {
            stanza = component.next() => match stanza {
                Some(element) => {
                    if inbound.send(element).is_err() {
                        // The bridge is gone; nothing left to feed.
                        break;
                    }
                }
                None => {
                    warn!("Component stream closed by server");
                    break;
                }
            },
            element = outbound.recv() => match element {
                Some(element) => {
                    if let Err(e) = component.send_stanza(element).await {
                        warn!(error = %e, "Failed to write stanza to component stream");
                        break;
                    }
                }
                None => break,
            },
        }
    }
}
