//! Packet transports for the remote debugging protocol.
//!
//! This crate moves whole protocol [`Packet`]s between a debugging server and
//! its clients. It handles transport concerns only:
//!
//! - Encoding packets to the `<length>:<json>` wire format ([`PacketCodec`])
//! - The [`Transport`] contract shared by every implementation
//! - [`LocalTransport`], a loopback pair for in-process debugging
//! - [`SocketTransport`], which frames packets over a TCP stream
//!
//! Routing packets to actors belongs in upstream crates (e.g., `server`).

mod codec;
mod error;
mod event;
pub mod io;
mod packet;

pub mod testing;

pub use codec::PacketCodec;
pub use error::{CodecError, PacketError, TransportError};
pub use event::{CloseStatus, Inbound, PacketSender, TransportEvent};
pub use io::{LocalTransport, SocketTransport, Transport};
pub use packet::Packet;

/// The default port the remote debugging listener binds to
pub const DEFAULT_DEBUGGER_PORT: u16 = 6000;
