//! Framed TCP stream adapter.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::Transport;
use crate::error::{NetError, NetResult};

use super::packet::PacketCodec;

/// Longest time spent flushing buffered frames on close.
pub const CLOSE_DEADLINE: Duration = Duration::from_secs(2);

/// [`Transport`] over a TCP stream using [`PacketCodec`] framing.
///
/// No read or write deadline is applied; dead peers are reclaimed by
/// session expiry. Only the final flush in [`Transport::close`] is bounded.
pub struct TcpTransport {
    reader: Mutex<FramedRead<OwnedReadHalf, PacketCodec>>,
    writer: Mutex<FramedWrite<OwnedWriteHalf, PacketCodec>>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: Mutex::new(FramedRead::new(read_half, PacketCodec)),
            writer: Mutex::new(FramedWrite::new(write_half, PacketCodec)),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_frame(&self) -> NetResult<Bytes> {
        match self.reader.lock().await.next().await {
            Some(frame) => frame,
            None => Err(NetError::BadConn),
        }
    }

    async fn write_frame(&self, frame: Bytes) -> NetResult<()> {
        self.writer.lock().await.send(frame).await
    }

    async fn close(&self) -> NetResult<()> {
        let shutdown = async { self.writer.lock().await.close().await };
        match tokio::time::timeout(CLOSE_DEADLINE, shutdown).await {
            Ok(result) => result,
            Err(_) => Err(NetError::WriteTimeout),
        }
    }
}
