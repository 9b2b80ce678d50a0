use std::fmt;
use std::io;

use thiserror::Error;
use transport::TransportError;

/// Errors raised by the server API.
///
/// These are configuration-time faults at the call site. Faults while
/// handling a request are reported to the client as [`ProtocolError`] reply
/// packets instead.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("debugger server has not been initialized")]
    NotInitialized,

    #[error("no root actor implementation installed, add an actor module first")]
    NoRootActor,

    #[error("'{0}' is a reserved actor name")]
    ReservedName(String),

    #[error("an actor named '{0}' is already registered")]
    DuplicateName(String),

    #[error("actor factory has neither a name nor an actor prefix")]
    UnnamedFactory,

    #[error("listening on port {port}")]
    Listen {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("connection '{0}' is closed")]
    ConnectionClosed(String),

    #[error("no such actor pool")]
    NoSuchPool,
}

/// Error names sent to clients in reply packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    NoSuchActor,
    UnrecognizedPacketType,
    UnknownError,
}

impl ProtocolError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolError::NoSuchActor => "noSuchActor",
            ProtocolError::UnrecognizedPacketType => "unrecognizedPacketType",
            ProtocolError::UnknownError => "unknownError",
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
