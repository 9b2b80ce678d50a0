//! Transport abstraction
//!
//! A transport moves whole [`Packet`]s between the server and one client.
//! The core trait [`Transport`] allows plugging in different mechanisms, such
//! as a TCP socket or an in-process loopback pair, without the connection
//! layer being able to tell them apart.
//!
//! # Examples
//!
//! ## Using the loopback pair
//!
//! ```
//! use transport::{LocalTransport, Packet, Transport, TransportEvent};
//!
//! let (client, mut server) = LocalTransport::pair();
//! let mut inbound = server.ready()?;
//!
//! client.send(Packet::request("root", "listTabs"));
//! assert!(matches!(inbound.try_next(), Some(TransportEvent::Packet(_))));
//! # Ok::<(), transport::TransportError>(())
//! ```
//!
//! ## Using a socket
//!
//! ```no_run
//! use transport::{SocketTransport, Transport};
//!
//! # async fn run() -> std::io::Result<()> {
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:6000").await?;
//! let mut transport = SocketTransport::new(stream);
//! let inbound = transport.ready();
//! # Ok(())
//! # }
//! ```

use crate::error::TransportError;
use crate::event::{Inbound, PacketSender};
use crate::packet::Packet;

mod local;
mod socket;


pub use local::LocalTransport;
pub use socket::SocketTransport;

/// Duplex channel that frames and delivers whole packets.
///
/// # Requirements
///
/// - `send` must preserve order: packets reach the peer in the order they
///   were sent.
/// - The [`Inbound`] stream returned by `ready` yields every fully received
///   packet in receipt order and then exactly one close event.
/// - Packets sent by the peer before `ready` is called are buffered, not
///   lost.
/// - `close` is idempotent, and both sides observe the close.
pub trait Transport: 'static {
    /// Handle for queueing packets to the peer.
    fn sender(&self) -> PacketSender;

    /// Queue a packet for delivery to the peer.
    fn send(&self, packet: Packet) {
        self.sender().send(packet);
    }

    /// Begin delivering inbound events.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyStarted`] if called more than once.
    fn ready(&mut self) -> Result<Inbound, TransportError>;

    /// Close the transport.
    fn close(&mut self);
}
