//! Length-prefixed packet framing.
//!
//! ```text
//! +----------------+------------------+------------------+
//! | total len (LE) | reserved (4 B)   | payload          |
//! | u16            | zero on write    | len - 6 bytes    |
//! +----------------+------------------+------------------+
//! ```
//!
//! The total length counts the header and must lie in
//! `[HEADER_SIZE, MAX_PACKET_SIZE]`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::NetError;

/// Size of the packet header in bytes.
pub const HEADER_SIZE: usize = 6;

/// Largest accepted total packet length, header included.
pub const MAX_PACKET_SIZE: usize = 4 * 1024;

/// `tokio_util` codec for the packet format above.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, NetError> {
        if src.len() < HEADER_SIZE {
            src.reserve(HEADER_SIZE - src.len());
            return Ok(None);
        }

        let total = u16::from_le_bytes([src[0], src[1]]) as usize;
        if !(HEADER_SIZE..=MAX_PACKET_SIZE).contains(&total) {
            return Err(NetError::HeaderLength(total));
        }

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        Ok(Some(src.split_to(total - HEADER_SIZE).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, NetError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            // Half a header or half a payload before EOF.
            None if !src.is_empty() => Err(NetError::BadConn),
            None => Ok(None),
        }
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = NetError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), NetError> {
        let total = payload.len() + HEADER_SIZE;
        if total > MAX_PACKET_SIZE {
            return Err(NetError::HeaderLength(total));
        }

        dst.reserve(total);
        dst.put_u16_le(total as u16);
        dst.put_bytes(0, HEADER_SIZE - 2);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
