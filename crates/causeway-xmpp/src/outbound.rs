//! Outbound stanza channel.
//!
//! Every stanza the gateway emits goes through one channel drained by the
//! connection I/O task, so the wire object itself is only ever touched from
//! that task. Senders are cheap clones; sends are fire-and-forget.

use minidom::Element;
use tokio::sync::mpsc;
use tracing::debug;

/// Sending half of the outbound stanza channel.
#[derive(Clone)]
pub struct StanzaSender {
    tx: mpsc::UnboundedSender<Element>,
}

impl StanzaSender {
    /// Queue a stanza for delivery. Dropped with a debug log when the wire
    /// side has gone away; the gateway never blocks on the connection.
    pub fn send(&self, stanza: impl Into<Element>) {
        if self.tx.send(stanza.into()).is_err() {
            debug!("Outbound stanza channel closed; dropping stanza");
        }
    }
}

/// Create the outbound channel pair: the sender goes into the gateway, the
/// receiver into the connection I/O task.
pub fn stanza_channel() -> (StanzaSender, mpsc::UnboundedReceiver<Element>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StanzaSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmpp_parsers::presence::{Presence, Type as PresenceType};

    #[test]
    fn sends_convert_to_elements() {
        let (sender, mut rx) = stanza_channel();
        sender.send(Presence::new(PresenceType::Subscribe));

        let element = rx.try_recv().expect("stanza queued");
        assert_eq!(element.name(), "presence");
        assert_eq!(element.attr("type"), Some("subscribe"));
    }

    #[test]
    fn send_after_receiver_dropped_is_silent() {
        let (sender, rx) = stanza_channel();
        drop(rx);
        sender.send(Presence::new(PresenceType::Unavailable));
    }
}
