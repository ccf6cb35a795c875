//! Codec and transport abstractions.
//!
//! A [`Transport`] moves whole frames of bytes (a length-prefixed TCP
//! packet, a WebSocket data frame). A [`Codec`] sits on top of it and turns
//! frames into application messages. Listeners are configured with a
//! [`NewCodecFn`] so applications can swap the message mapping without
//! touching the socket code.

pub mod json;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::NetResult;

pub use json::{json_codec, JsonCodec};

/// Inbound application message as decoded by a codec.
pub type Message = serde_json::Value;

/// Frame-level byte transport for one connection.
///
/// Reads and writes may run concurrently from different tasks; each
/// implementation serializes its own read and write halves.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read the next complete frame.
    async fn read_frame(&self) -> NetResult<Bytes>;

    /// Write one complete frame.
    async fn write_frame(&self, frame: Bytes) -> NetResult<()>;

    /// Shut the connection down.
    async fn close(&self) -> NetResult<()>;
}

/// Bidirectional message transcoder bound to one connection.
#[async_trait]
pub trait Codec: Send + Sync {
    /// Send one already-encoded payload.
    async fn send(&self, payload: Bytes) -> NetResult<()>;

    /// Receive and decode one message.
    async fn recv(&self) -> NetResult<Message>;

    /// Close the underlying transport.
    async fn close(&self) -> NetResult<()>;
}

/// Factory turning a raw transport into a codec.
pub type NewCodecFn = Arc<dyn Fn(Box<dyn Transport>) -> Arc<dyn Codec> + Send + Sync>;
