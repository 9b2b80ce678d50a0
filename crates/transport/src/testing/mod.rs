//! Testing utilities for the transport layer.
//!
//! Helpers for building framed byte streams to feed a
//! [`crate::SocketTransport`] or a [`crate::PacketCodec`] in tests.

use serde::Serialize;

/// Construct a valid packet frame from a JSON-serializable message.
///
/// # Example
///
/// ```
/// use transport::testing::frame_packet;
/// use serde_json::json;
///
/// let bytes = frame_packet(&json!({"to": "root", "type": "listTabs"}));
/// assert!(bytes.starts_with(b"31:"));
/// ```
pub fn frame_packet(packet: &impl Serialize) -> Vec<u8> {
    let json = serde_json::to_string(packet).expect("failed to serialize packet");
    format!("{}:{}", json.len(), json).into_bytes()
}

/// Construct multiple packet frames concatenated together.
pub fn frame_packets<T: Serialize>(packets: &[T]) -> Vec<u8> {
    packets.iter().flat_map(|p| frame_packet(p)).collect()
}
