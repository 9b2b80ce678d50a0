//! Packet codec implementation using tokio-util.
//!
//! This module provides [`PacketCodec`], which implements both the `Encoder`
//! and `Decoder` traits from tokio-util for protocol packets.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::packet::Packet;

/// Default maximum packet size (16 MB).
const DEFAULT_MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Longest length prefix accepted before the `:` separator.
const MAX_PREFIX_LEN: usize = 20;

/// Codec for encoding and decoding framed packets.
///
/// Each packet is sent as its UTF-8 JSON byte length in decimal, a colon,
/// and the JSON text itself:
/// ```text
/// <length>:<JSON body>
/// ```
///
/// # Example
///
/// ```ignore
/// use tokio_util::codec::FramedRead;
/// use transport::PacketCodec;
///
/// let framed = FramedRead::new(reader, PacketCodec::new());
/// ```
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_packet_size: usize,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Create a new codec with a custom maximum packet size.
    ///
    /// Packets larger than this are rejected with [`CodecError::PacketTooLarge`].
    pub fn with_max_size(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(separator) = src.iter().position(|b| *b == b':') else {
            // Reject garbage early rather than buffering it forever
            if !src.iter().all(u8::is_ascii_digit) {
                return Err(CodecError::MalformedLength);
            }
            if src.len() > MAX_PREFIX_LEN {
                return Err(CodecError::MissingSeparator);
            }
            return Ok(None);
        };

        let length = parse_length(&src[..separator])?;
        if length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: length,
                max: self.max_packet_size,
            });
        }

        let total_length = separator + 1 + length;
        if src.len() < total_length {
            src.reserve(total_length - src.len());
            return Ok(None);
        }

        let body = &src[separator + 1..total_length];
        let packet: Packet = serde_json::from_slice(body).map_err(CodecError::JsonDeserialize)?;

        src.advance(total_length);

        Ok(Some(packet))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).map_err(CodecError::JsonSerialize)?;

        dst.reserve(MAX_PREFIX_LEN + 1 + json.len());
        dst.put_slice(json.len().to_string().as_bytes());
        dst.put_u8(b':');
        dst.put_slice(&json);

        Ok(())
    }
}

fn parse_length(prefix: &[u8]) -> Result<usize, CodecError> {
    if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN || !prefix.iter().all(u8::is_ascii_digit)
    {
        return Err(CodecError::MalformedLength);
    }

    std::str::from_utf8(prefix)
        .ok()
        .and_then(|digits| digits.parse().ok())
        .ok_or(CodecError::MalformedLength)
}
