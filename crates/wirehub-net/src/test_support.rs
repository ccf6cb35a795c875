//! In-memory codec and recording protocol shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::codec::{Codec, Message};
use crate::error::{NetError, NetResult};
use crate::protocol::Protocol;
use crate::session::Session;

/// Codec backed by channels; the other end is a [`ChannelPeer`].
pub struct ChannelCodec {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
    outbound: mpsc::UnboundedSender<Bytes>,
    closed: Arc<AtomicBool>,
}

/// Test-side handle of a [`ChannelCodec`].
pub struct ChannelPeer {
    inbound: Option<mpsc::UnboundedSender<Message>>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    closed: Arc<AtomicBool>,
}

impl ChannelCodec {
    pub fn pair() -> (Arc<dyn Codec>, ChannelPeer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let codec: Arc<dyn Codec> = Arc::new(Self {
            inbound: tokio::sync::Mutex::new(in_rx),
            outbound: out_tx,
            closed: closed.clone(),
        });
        let peer = ChannelPeer {
            inbound: Some(in_tx),
            outbound: out_rx,
            closed,
        };
        (codec, peer)
    }
}

#[async_trait]
impl Codec for ChannelCodec {
    async fn send(&self, payload: Bytes) -> NetResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::ConnClosing);
        }
        self.outbound.send(payload).map_err(|_| NetError::BadConn)
    }

    async fn recv(&self) -> NetResult<Message> {
        self.inbound.lock().await.recv().await.ok_or(NetError::BadConn)
    }

    async fn close(&self) -> NetResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl ChannelPeer {
    /// Deliver a message to the session's read task.
    pub fn push(&self, message: Message) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(message);
        }
    }

    /// Next payload the session wrote, or `None` after two seconds.
    pub async fn next_sent(&mut self) -> Option<Bytes> {
        tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// End the inbound stream; the next `recv` fails.
    pub fn hang_up(self) {
        drop(self);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Codec whose peer never reads nor writes: every call stays pending.
pub struct StalledCodec;

impl StalledCodec {
    pub fn new() -> Arc<dyn Codec> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Codec for StalledCodec {
    async fn send(&self, _payload: Bytes) -> NetResult<()> {
        std::future::pending().await
    }

    async fn recv(&self) -> NetResult<Message> {
        std::future::pending().await
    }

    async fn close(&self) -> NetResult<()> {
        std::future::pending().await
    }
}

/// Protocol recording every callback.
#[derive(Default)]
pub struct RecordingProtocol {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    messages: Mutex<Vec<Message>>,
    reject_kind: Option<String>,
}

impl RecordingProtocol {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Rejects messages whose `kind` field equals `kind`.
    pub fn rejecting(kind: &str) -> Arc<Self> {
        Arc::new(Self {
            reject_kind: Some(kind.to_string()),
            ..Self::default()
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub async fn wait_for_messages(&self, count: usize) {
        wait_until(|| self.messages.lock().unwrap().len() >= count).await;
    }

    pub async fn wait_for_disconnects(&self, count: usize) {
        wait_until(|| self.disconnects() >= count).await;
    }
}

pub async fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[async_trait]
impl Protocol for RecordingProtocol {
    async fn on_connect(&self, _session: &Arc<Session>) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_disconnect(&self, _session: &Arc<Session>) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn verify(&self, message: &Message) -> NetResult<()> {
        match (&self.reject_kind, message.get("kind").and_then(|k| k.as_str())) {
            (Some(reject), Some(kind)) if reject == kind => {
                Err(NetError::protocol(format!("rejected kind {kind}")))
            }
            _ => Ok(()),
        }
    }

    async fn on_message(&self, _session: &Arc<Session>, message: Message) -> NetResult<()> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}
