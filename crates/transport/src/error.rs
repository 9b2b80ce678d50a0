//! Error types for the transport layer.

use std::io;

/// Errors that can occur while encoding or decoding framed packets.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// An I/O error occurred while reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The length prefix contained something other than ASCII digits.
    #[error("malformed packet length prefix")]
    MalformedLength,

    /// No `:` separator was found within the maximum prefix length.
    #[error("missing packet length separator")]
    MissingSeparator,

    /// The packet body exceeds the configured maximum size.
    #[error("packet size {size} exceeds maximum allowed {max}")]
    PacketTooLarge {
        /// The announced packet size.
        size: usize,
        /// The maximum allowed size.
        max: usize,
    },

    /// Failed to deserialize the JSON packet body.
    #[error("JSON deserialization failed: {0}")]
    JsonDeserialize(#[source] serde_json::Error),

    /// Failed to serialize the outgoing packet to JSON.
    #[error("JSON serialization failed: {0}")]
    JsonSerialize(#[source] serde_json::Error),
}

/// Errors raised by [`crate::Transport`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport has already been started")]
    AlreadyStarted,

    #[error("transport is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A JSON value could not be used as a packet.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("packets must be JSON objects, got {0}")]
    NotAnObject(&'static str),
}
