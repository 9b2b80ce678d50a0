//! Socket-backed transport implementation

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::Transport;
use crate::codec::PacketCodec;
use crate::error::TransportError;
use crate::event::{self, CloseStatus, Inbound, PacketSender, TransportEvent};

type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;

/// Socket-backed transport
///
/// Wraps the byte streams of an accepted connection, framing packets with
/// [`PacketCodec`]. Outgoing packets are encoded by a background writer task
/// spawned at construction, so packets may be sent before [`Transport::ready`]
/// is called. `ready` spawns the reader task, which decodes inbound packets
/// until end of stream.
///
/// Bytes that cannot be decoded into a packet close the transport with a
/// [`CloseStatus::Error`]; a corrupt packet is never delivered.
///
/// Must be created from within a tokio runtime.
pub struct SocketTransport {
    peer_addr: Option<SocketAddr>,
    outgoing: PacketSender,
    own: PacketSender,
    inbox: Option<UnboundedReceiver<TransportEvent>>,
    read_half: Option<BoxedRead>,
    codec: PacketCodec,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

impl SocketTransport {
    /// Create a transport from an accepted TCP stream
    pub fn new(stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok();
        let (read, write) = stream.into_split();
        let mut transport = Self::from_split(read, write);
        transport.peer_addr = peer_addr;
        transport
    }

    /// Create a transport from any pair of async byte streams
    pub fn from_split<R, W>(read: R, write: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_codec(read, write, PacketCodec::new())
    }

    /// Create a transport with a custom codec, e.g. a smaller packet size limit
    pub fn with_codec<R, W>(read: R, write: W, codec: PacketCodec) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (own_tx, own_rx) = event::channel();
        let (out_tx, out_rx) = event::channel();
        let own = PacketSender::new(own_tx);

        let sink = FramedWrite::new(write, codec.clone());
        tokio::spawn(write_loop(sink, out_rx, own.clone()));

        Self {
            peer_addr: None,
            outgoing: PacketSender::new(out_tx),
            own,
            inbox: Some(own_rx),
            read_half: Some(Box::new(read)),
            codec,
            reader: None,
            closed: false,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

impl Transport for SocketTransport {
    fn sender(&self) -> PacketSender {
        self.outgoing.clone()
    }

    fn ready(&mut self) -> Result<Inbound, TransportError> {
        let rx = self.inbox.take().ok_or(TransportError::AlreadyStarted)?;

        if !self.closed {
            if let Some(read) = self.read_half.take() {
                let framed = FramedRead::new(read, self.codec.clone());
                self.reader = Some(tokio::spawn(read_loop(framed, self.own.clone())));
            }
        }

        Ok(Inbound::new(rx))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        tracing::debug!(peer = ?self.peer_addr, "closing socket transport");

        self.outgoing.send_closed(CloseStatus::Normal);
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.own.send_closed(CloseStatus::Normal);
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop(mut framed: FramedRead<BoxedRead, PacketCodec>, own: PacketSender) {
    let status = loop {
        match framed.next().await {
            Some(Ok(packet)) => {
                tracing::trace!(?packet, "received packet");
                if !own.send(packet) {
                    return;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "closing transport after undecodable input");
                break CloseStatus::Error(e.to_string());
            }
            None => break CloseStatus::Normal,
        }
    };
    own.send_closed(status);
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, PacketCodec>,
    mut rx: UnboundedReceiver<TransportEvent>,
    own: PacketSender,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = rx.recv().await {
        match event {
            TransportEvent::Packet(packet) => {
                if let Err(e) = sink.send(packet).await {
                    tracing::warn!(error = %e, "failed to write packet");
                    own.send_closed(CloseStatus::Error(e.to_string()));
                    return;
                }
            }
            TransportEvent::Closed(_) => break,
        }
    }

    if let Err(e) = sink.get_mut().shutdown().await {
        tracing::debug!(error = %e, "error shutting down socket writer");
    }
}
