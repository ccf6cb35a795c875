//! JSON codec: one JSON document per transport frame.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use crate::error::NetResult;

use super::{Codec, Message, NewCodecFn, Transport};

/// Codec mapping each frame to one JSON value.
pub struct JsonCodec {
    transport: Box<dyn Transport>,
}

impl JsonCodec {
    /// Wrap a transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl std::fmt::Debug for JsonCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCodec").finish()
    }
}

#[async_trait]
impl Codec for JsonCodec {
    async fn send(&self, payload: Bytes) -> NetResult<()> {
        self.transport.write_frame(payload).await
    }

    async fn recv(&self) -> NetResult<Message> {
        let frame = self.transport.read_frame().await?;
        serde_json::from_slice(&frame).map_err(|e| {
            debug!(error = %e, len = frame.len(), "Failed to decode JSON frame");
            e.into()
        })
    }

    async fn close(&self) -> NetResult<()> {
        self.transport.close().await
    }
}

/// Default [`NewCodecFn`] producing a [`JsonCodec`].
pub fn json_codec() -> NewCodecFn {
    Arc::new(|transport: Box<dyn Transport>| -> Arc<dyn Codec> {
        Arc::new(JsonCodec::new(transport))
    })
}

/// Serialize a value into a payload suitable for [`Codec::send`].
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> NetResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}
