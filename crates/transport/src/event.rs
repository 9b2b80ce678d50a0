//! Events delivered by a transport and the channel handles that carry them.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

use crate::packet::Packet;

/// Why a transport closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseStatus {
    /// The transport was closed deliberately or the peer hung up cleanly.
    Normal,
    /// The transport failed: bad framing, an I/O error or a vanished peer.
    Error(String),
}

impl CloseStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CloseStatus::Normal)
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseStatus::Normal => f.write_str("closed"),
            CloseStatus::Error(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// An inbound event from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Packet(Packet),
    Closed(CloseStatus),
}

pub(crate) fn channel() -> (UnboundedSender<TransportEvent>, UnboundedReceiver<TransportEvent>) {
    mpsc::unbounded_channel()
}

/// Cloneable handle that queues packets for delivery to a transport's peer.
///
/// Actors that reply asynchronously hold one of these and send their reply
/// once it is ready.
#[derive(Debug, Clone)]
pub struct PacketSender {
    tx: UnboundedSender<TransportEvent>,
}

impl PacketSender {
    pub(crate) fn new(tx: UnboundedSender<TransportEvent>) -> Self {
        Self { tx }
    }

    /// Queue a packet, returning `false` if the peer has gone away.
    pub fn send(&self, packet: Packet) -> bool {
        match self.tx.send(TransportEvent::Packet(packet)) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!("dropping packet for disconnected peer");
                false
            }
        }
    }

    pub(crate) fn send_closed(&self, status: CloseStatus) {
        let _ = self.tx.send(TransportEvent::Closed(status));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Stream of inbound events returned by [`crate::Transport::ready`].
///
/// Yields packets in receipt order followed by exactly one
/// [`TransportEvent::Closed`]; nothing is yielded after that. If every sender
/// disappears without announcing a close, a `Closed` error event is
/// synthesized.
#[derive(Debug)]
pub struct Inbound {
    rx: UnboundedReceiver<TransportEvent>,
    closed: bool,
}

impl Inbound {
    pub(crate) fn new(rx: UnboundedReceiver<TransportEvent>) -> Self {
        Self { rx, closed: false }
    }

    /// Take the next event if one is already queued, without waiting.
    pub fn try_next(&mut self) -> Option<TransportEvent> {
        if self.closed {
            return None;
        }
        match self.rx.try_recv() {
            Ok(event) => Some(self.observe(event)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.observe(disconnected())),
        }
    }

    /// Wait for the next event.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        futures::StreamExt::next(self).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn observe(&mut self, event: TransportEvent) -> TransportEvent {
        if matches!(event, TransportEvent::Closed(_)) {
            self.closed = true;
            self.rx.close();
        }
        event
    }
}

impl Stream for Inbound {
    type Item = TransportEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(this.observe(event))),
            Poll::Ready(None) => Poll::Ready(Some(this.observe(disconnected()))),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn disconnected() -> TransportEvent {
    TransportEvent::Closed(CloseStatus::Error("transport dropped".to_string()))
}
