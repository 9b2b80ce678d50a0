//! In-process loopback transport

use tokio::sync::mpsc::UnboundedReceiver;

use super::Transport;
use crate::error::TransportError;
use crate::event::{self, CloseStatus, Inbound, PacketSender, TransportEvent};

/// In-process loopback transport
///
/// Two `LocalTransport`s created by [`LocalTransport::pair`] reference each
/// other's inboxes: a packet sent on one is queued as an inbound event on the
/// other. Delivery is asynchronous (the receiver picks the packet up from its
/// [`Inbound`] stream) and order preserving. No bytes are encoded, so this is
/// the transport used for same-process debugging and for tests.
///
/// # Examples
///
/// ```
/// use transport::{LocalTransport, Packet, Transport, TransportEvent};
///
/// let (mut client, server) = LocalTransport::pair();
/// let mut client_inbound = client.ready()?;
///
/// server.send(Packet::reply("root").with("applicationType", "browser"));
/// match client_inbound.try_next() {
///     Some(TransportEvent::Packet(packet)) => assert_eq!(packet.from_actor(), Some("root")),
///     other => panic!("unexpected event {other:?}"),
/// }
/// # Ok::<(), transport::TransportError>(())
/// ```
#[derive(Debug)]
pub struct LocalTransport {
    peer: PacketSender,
    own: PacketSender,
    inbox: Option<UnboundedReceiver<TransportEvent>>,
    closed: bool,
}

impl LocalTransport {
    /// Create a connected pair of loopback transports
    ///
    /// Returns `(client, server)`; packets sent on one are received by the
    /// other.
    pub fn pair() -> (Self, Self) {
        let (client_tx, client_rx) = event::channel();
        let (server_tx, server_rx) = event::channel();

        let client = Self {
            peer: PacketSender::new(server_tx.clone()),
            own: PacketSender::new(client_tx.clone()),
            inbox: Some(client_rx),
            closed: false,
        };

        let server = Self {
            peer: PacketSender::new(client_tx),
            own: PacketSender::new(server_tx),
            inbox: Some(server_rx),
            closed: false,
        };

        (client, server)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Transport for LocalTransport {
    fn sender(&self) -> PacketSender {
        self.peer.clone()
    }

    fn ready(&mut self) -> Result<Inbound, TransportError> {
        let rx = self.inbox.take().ok_or(TransportError::AlreadyStarted)?;
        Ok(Inbound::new(rx))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        tracing::debug!("closing local transport");
        self.peer.send_closed(CloseStatus::Normal);
        self.own.send_closed(CloseStatus::Normal);
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Packet;

    #[test]
    fn pair_delivers_in_order() {
        let (client, mut server) = LocalTransport::pair();
        let mut inbound = server.ready().unwrap();

        for i in 1..=5 {
            client.send(Packet::request("root", "echo").with("seq", i));
        }

        for i in 1..=5 {
            match inbound.try_next() {
                Some(TransportEvent::Packet(packet)) => {
                    assert_eq!(packet.get("seq").and_then(|v| v.as_i64()), Some(i));
                }
                other => panic!("expected packet, got {other:?}"),
            }
        }
        assert_eq!(inbound.try_next(), None);
    }

    #[test]
    fn packets_sent_before_ready_are_buffered() {
        let (client, mut server) = LocalTransport::pair();
        client.send(Packet::request("root", "listTabs"));

        let mut inbound = server.ready().unwrap();
        assert!(matches!(inbound.try_next(), Some(TransportEvent::Packet(_))));
    }

    #[test]
    fn ready_twice_is_an_error() {
        let (_client, mut server) = LocalTransport::pair();
        let _inbound = server.ready().unwrap();
        assert!(matches!(server.ready(), Err(TransportError::AlreadyStarted)));
    }

    #[test]
    fn close_is_observed_by_both_sides_once() {
        let (mut client, mut server) = LocalTransport::pair();
        let mut client_inbound = client.ready().unwrap();
        let mut server_inbound = server.ready().unwrap();

        client.close();
        client.close();

        assert_eq!(
            client_inbound.try_next(),
            Some(TransportEvent::Closed(CloseStatus::Normal))
        );
        assert_eq!(client_inbound.try_next(), None);
        assert_eq!(
            server_inbound.try_next(),
            Some(TransportEvent::Closed(CloseStatus::Normal))
        );
        assert_eq!(server_inbound.try_next(), None);
    }

    #[test]
    fn dropping_one_side_closes_the_other() {
        let (client, mut server) = LocalTransport::pair();
        let mut inbound = server.ready().unwrap();

        client.send(Packet::request("root", "listTabs"));
        drop(client);

        assert!(matches!(inbound.try_next(), Some(TransportEvent::Packet(_))));
        assert_eq!(
            inbound.try_next(),
            Some(TransportEvent::Closed(CloseStatus::Normal))
        );
    }

    #[test]
    fn send_after_peer_inbound_dropped_is_harmless() {
        let (client, mut server) = LocalTransport::pair();
        let inbound = server.ready().unwrap();
        drop(inbound);

        assert!(!client.sender().send(Packet::request("root", "listTabs")));
    }
}
