//! One logical, bidirectional, message-oriented connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::json::encode_json;
use crate::codec::Codec;
use crate::error::{NetError, NetResult};
use crate::panic::with_recover;
use crate::protocol::Protocol;

use super::id::{GlobalIdGenerator, IdGenerator, SessionId};
use super::manager::Manager;

/// Capacity of the outbound mailbox drained by the write task.
pub const MAILBOX_CAPACITY: usize = 100;

/// Upper bound on the codec shutdown performed by [`Session::close`].
pub const CODEC_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra-data key holding the peer address.
pub const KEY_REMOTE_ADDR: &str = "remote_addr";

/// Extra-data key holding the WebSocket client's `User-Agent`.
pub const KEY_USER_AGENT: &str = "ua";

/// A single connection managed by the session layer.
///
/// Created unstarted; [`Session::start`] binds a codec and spawns the read
/// and write tasks. [`Session::close`] tears everything down exactly once.
pub struct Session {
    id: SessionId,
    protocol: Arc<dyn Protocol>,
    /// Non-owning handle used to deregister on close.
    manager: Weak<Manager>,
    codec: OnceLock<Arc<dyn Codec>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    mailbox_tx: mpsc::Sender<Bytes>,
    /// Taken by the write task on start.
    mailbox_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    send_lock: tokio::sync::Mutex<()>,
    extra_data: DashMap<String, serde_json::Value>,
    connected_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(id: SessionId, protocol: Arc<dyn Protocol>, manager: Weak<Manager>) -> Arc<Self> {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
        Arc::new(Self {
            id,
            protocol,
            manager,
            codec: OnceLock::new(),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            mailbox_tx,
            mailbox_rx: Mutex::new(Some(mailbox_rx)),
            send_lock: tokio::sync::Mutex::new(()),
            extra_data: DashMap::new(),
            connected_at: Utc::now(),
        })
    }

    /// Create a session that belongs to no manager (outbound links).
    pub fn detached(protocol: Arc<dyn Protocol>) -> Arc<Self> {
        Self::new(GlobalIdGenerator.next_id(), protocol, Weak::new())
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether [`Session::close`] has run (or is running).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Bind the codec, notify the protocol and spawn the read/write tasks.
    ///
    /// May be called once; later calls fail with [`NetError::AlreadyStarted`].
    pub async fn start(self: &Arc<Self>, codec: Arc<dyn Codec>) -> NetResult<()> {
        if self.codec.set(codec.clone()).is_err() {
            return Err(NetError::AlreadyStarted);
        }
        if self.is_closed() {
            // Closed before the codec was bound; `close` may not have seen it.
            let _ = codec.close().await;
            return Err(NetError::ConnClosing);
        }
        let mailbox = self
            .mailbox_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(NetError::AlreadyStarted)?;

        self.protocol.on_connect(self).await;

        tokio::spawn(self.clone().read_loop(codec.clone()));
        tokio::spawn(self.clone().write_loop(codec, mailbox));

        debug!(session_id = self.id, remote_addr = ?self.remote_addr(), "Session started");
        Ok(())
    }

    /// Enqueue a payload for the write task.
    ///
    /// With a zero `timeout` the call never waits: a full mailbox yields
    /// [`NetError::WriteBlocking`]. Otherwise it waits up to `timeout` for
    /// room, returning [`NetError::ConnClosing`] if the session closes first.
    pub async fn async_write(&self, payload: Bytes, timeout: Duration) -> NetResult<()> {
        if self.is_closed() {
            return Err(NetError::ConnClosing);
        }

        if timeout.is_zero() {
            return match self.mailbox_tx.try_send(payload) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(NetError::WriteBlocking),
                Err(TrySendError::Closed(_)) => Err(NetError::ConnClosing),
            };
        }

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(NetError::ConnClosing),
            result = tokio::time::timeout(timeout, self.mailbox_tx.send(payload)) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(NetError::ConnClosing),
                Err(_) => Err(NetError::WriteBlocking),
            },
        }
    }

    /// Serialize `value` as JSON and enqueue it.
    pub async fn async_write_json<T: Serialize + ?Sized>(
        &self,
        value: &T,
        timeout: Duration,
    ) -> NetResult<()> {
        self.async_write(encode_json(value)?, timeout).await
    }

    /// Write directly to the codec, bypassing the mailbox.
    ///
    /// Concurrent callers are serialized; ordering relative to mailbox
    /// writes is not defined.
    pub async fn send(&self, payload: Bytes) -> NetResult<()> {
        if self.is_closed() {
            return Err(NetError::ConnClosing);
        }
        let codec = self.codec.get().ok_or(NetError::NotStarted)?;
        let _guard = self.send_lock.lock().await;

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(NetError::ConnClosing),
            result = codec.send(payload) => result,
        }
    }

    /// Tear the session down. Only the first call does any work.
    pub async fn close(self: &Arc<Self>) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.cancel.cancel();

        if let Some(manager) = self.manager.upgrade() {
            manager.del_session(self.id);
        }

        // A peer that stopped reading must not hold up `on_disconnect`.
        if let Some(codec) = self.codec.get() {
            match tokio::time::timeout(CODEC_CLOSE_TIMEOUT, codec.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(session_id = self.id, error = %e, "Codec close failed"),
                Err(_) => warn!(session_id = self.id, "Codec close timed out"),
            }
        }

        self.protocol.on_disconnect(self).await;

        debug!(session_id = self.id, "Session closed");
    }

    /// Look up per-connection metadata.
    pub fn get_extra_data(&self, key: &str) -> Option<serde_json::Value> {
        self.extra_data.get(key).map(|entry| entry.value().clone())
    }

    /// Store per-connection metadata. Last writer wins.
    pub fn put_extra_data(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.extra_data.insert(key.into(), value.into());
    }

    /// Peer address recorded by the listener.
    pub fn remote_addr(&self) -> Option<String> {
        self.extra_string(KEY_REMOTE_ADDR)
    }

    /// `User-Agent` header of a WebSocket peer.
    pub fn user_agent(&self) -> Option<String> {
        self.extra_string(KEY_USER_AGENT)
    }

    /// Refresh the registry liveness timestamp of this session.
    pub fn reset_expire_time(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.reset_expire_time(self.id);
        }
    }

    /// Serializable snapshot of the session.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            remote_addr: self.remote_addr(),
            user_agent: self.user_agent(),
            connected_at: self.connected_at,
            closed: self.is_closed(),
        }
    }

    fn extra_string(&self, key: &str) -> Option<String> {
        self.get_extra_data(key)
            .and_then(|v| v.as_str().map(str::to_owned))
    }

    async fn read_loop(self: Arc<Self>, codec: Arc<dyn Codec>) {
        match with_recover(self.recv_messages(codec.as_ref())).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                debug!(session_id = self.id, error = %e, kind = %e.kind(), "Read loop ended");
            }
            None => warn!(session_id = self.id, "Read loop panicked"),
        }
        self.close().await;
    }

    async fn recv_messages(self: &Arc<Self>, codec: &dyn Codec) -> NetResult<()> {
        loop {
            let message = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                message = codec.recv() => message?,
            };
            self.protocol.verify(&message)?;
            self.protocol.on_message(self, message).await?;
        }
    }

    async fn write_loop(self: Arc<Self>, codec: Arc<dyn Codec>, mut mailbox: mpsc::Receiver<Bytes>) {
        match with_recover(self.drain_mailbox(codec.as_ref(), &mut mailbox)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                debug!(session_id = self.id, error = %e, kind = %e.kind(), "Write loop ended");
            }
            None => warn!(session_id = self.id, "Write loop panicked"),
        }
        // Dropping the receiver closes the mailbox for late writers.
        drop(mailbox);
        self.close().await;
    }

    async fn drain_mailbox(
        &self,
        codec: &dyn Codec,
        mailbox: &mut mpsc::Receiver<Bytes>,
    ) -> NetResult<()> {
        loop {
            let payload = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                payload = mailbox.recv() => match payload {
                    Some(payload) => payload,
                    None => return Ok(()),
                },
            };
            if self.is_closed() {
                return Ok(());
            }
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                result = codec.send(payload) => result?,
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("started", &self.codec.get().is_some())
            .finish()
    }
}

/// Snapshot of session info (serializable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session ID
    pub id: SessionId,
    /// Peer address, when known
    pub remote_addr: Option<String>,
    /// WebSocket `User-Agent`, when known
    pub user_agent: Option<String>,
    /// When the session was created
    pub connected_at: DateTime<Utc>,
    /// Whether the session has been closed
    pub closed: bool,
}
