//! WebSocket stream adapter.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::codec::Transport;
use crate::error::{NetError, NetResult};

/// Deadline for writing one frame.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// [`Transport`] carrying one frame per WebSocket data message.
///
/// Outbound frames are sent as text when they are valid UTF-8 and as
/// binary otherwise. Control frames are handled by the WebSocket layer and
/// never surface as frames.
pub struct WsTransport<S> {
    reader: Mutex<SplitStream<WebSocketStream<S>>>,
    writer: Mutex<SplitSink<WebSocketStream<S>, Message>>,
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: WebSocketStream<S>) -> Self {
        let (writer, reader) = stream.split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_frame(&self) -> NetResult<Bytes> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Bytes::copy_from_slice(text.as_bytes())),
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "WebSocket peer sent close");
                    return Err(NetError::ConnClosing);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(NetError::BadConn),
            }
        }
    }

    async fn write_frame(&self, frame: Bytes) -> NetResult<()> {
        let message = match String::from_utf8(frame.to_vec()) {
            Ok(text) => Message::text(text),
            Err(_) => Message::binary(frame),
        };

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(WRITE_DEADLINE, writer.send(message)).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(NetError::WriteTimeout),
        }
    }

    async fn close(&self) -> NetResult<()> {
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(WRITE_DEADLINE, writer.close()).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(NetError::WriteTimeout),
        }
    }
}
