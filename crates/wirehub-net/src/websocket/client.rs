//! Outbound WebSocket sessions and the self-healing client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::json::encode_json;
use crate::codec::{Message, NewCodecFn};
use crate::error::{NetError, NetResult};
use crate::protocol::Protocol;
use crate::session::{Session, KEY_REMOTE_ADDR};

use super::transport::WsTransport;

/// Delay between two failed dial attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Mailbox timeout for keepalives and [`ReconnectingClient::send`].
pub const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Produces the keepalive payload on every tick.
pub type KeepaliveFn = Arc<dyn Fn() -> Bytes + Send + Sync>;

/// Dial `url` and start a session on the resulting connection.
///
/// The session is not registered with any manager.
pub async fn connect_session(
    url: &str,
    new_codec: NewCodecFn,
    protocol: Arc<dyn Protocol>,
) -> NetResult<Arc<Session>> {
    let (ws, _response) = connect_async(url).await?;

    let session = Session::detached(protocol);
    session.put_extra_data(KEY_REMOTE_ADDR, url);
    let codec = new_codec(Box::new(WsTransport::new(ws)));
    session.start(codec).await?;

    debug!(session_id = session.id(), url, "Outbound WebSocket session started");
    Ok(session)
}

/// Connection state of a [`ReconnectingClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// Connection lost, waiting for the next dial attempt.
    Disconnected,
    /// Dialing.
    Connecting,
    /// A live session is in place.
    Connected,
    /// [`ReconnectingClient::close`] was called.
    Closed,
}

/// Options for [`ReconnectingClient`].
pub struct ClientBuilder {
    url: String,
    new_codec: NewCodecFn,
    protocol: Arc<dyn Protocol>,
    retry_delay: Duration,
    keepalive_interval: Duration,
    keepalive: Option<KeepaliveFn>,
}

impl ClientBuilder {
    /// Delay between two failed dial attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Send `payload()` every `interval` through the current session.
    /// A zero interval disables keepalive.
    pub fn keepalive(mut self, interval: Duration, payload: KeepaliveFn) -> Self {
        self.keepalive_interval = interval;
        self.keepalive = Some(payload);
        self
    }

    /// Dial once and return the client. The first dial must succeed.
    pub async fn connect(self) -> NetResult<ReconnectingClient> {
        let (state_tx, _) = watch::channel(ClientState::Connecting);
        let user = self.protocol;
        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| ClientInner {
            url: self.url,
            new_codec: self.new_codec,
            adapter: Arc::new(ClientProtocol {
                client: weak.clone(),
                user,
            }),
            session: RwLock::new(None),
            cancel: CancellationToken::new(),
            state: state_tx,
            reconnecting: AtomicBool::new(false),
            keepalive_started: AtomicBool::new(false),
            retry_delay: self.retry_delay,
            keepalive_interval: self.keepalive_interval,
            keepalive: self.keepalive,
        });

        if let Err(e) = inner.dial().await {
            inner.cancel.cancel();
            inner.set_state(ClientState::Closed);
            return Err(e);
        }
        Ok(ReconnectingClient { inner })
    }
}

/// WebSocket client that redials whenever its session drops.
///
/// The wrapped protocol sees every session's `on_connect` and
/// `on_disconnect`. After a disconnect the client waits `retry_delay`
/// between attempts until a dial succeeds or [`ReconnectingClient::close`]
/// is called. Keepalive, when configured, starts with the first session and
/// always targets the current one.
#[derive(Clone)]
pub struct ReconnectingClient {
    inner: Arc<ClientInner>,
}

impl ReconnectingClient {
    pub fn builder(
        url: impl Into<String>,
        new_codec: NewCodecFn,
        protocol: Arc<dyn Protocol>,
    ) -> ClientBuilder {
        ClientBuilder {
            url: url.into(),
            new_codec,
            protocol,
            retry_delay: DEFAULT_RETRY_DELAY,
            keepalive_interval: Duration::ZERO,
            keepalive: None,
        }
    }

    /// Enqueue `payload` on the current session.
    ///
    /// Fails with [`NetError::NotConnected`] while no session is live.
    pub async fn send(&self, payload: Bytes) -> NetResult<()> {
        let session = self.inner.current().ok_or(NetError::NotConnected)?;
        session.async_write(payload, CLIENT_WRITE_TIMEOUT).await
    }

    /// Serialize `value` as JSON and enqueue it on the current session.
    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> NetResult<()> {
        self.send(encode_json(value)?).await
    }

    /// Current session, if connected.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.inner.current()
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    /// Stop reconnecting and keepalive, then close the current session.
    pub async fn close(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();
        self.inner.set_state(ClientState::Closed);

        let session = self
            .inner
            .session
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(session) = session {
            session.close().await;
        }
        info!(url = %self.inner.url, "Reconnecting client closed");
    }
}

impl std::fmt::Debug for ReconnectingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingClient")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

struct ClientInner {
    url: String,
    new_codec: NewCodecFn,
    adapter: Arc<ClientProtocol>,
    session: RwLock<Option<Arc<Session>>>,
    cancel: CancellationToken,
    state: watch::Sender<ClientState>,
    reconnecting: AtomicBool,
    keepalive_started: AtomicBool,
    retry_delay: Duration,
    keepalive_interval: Duration,
    keepalive: Option<KeepaliveFn>,
}

impl ClientInner {
    fn current(&self) -> Option<Arc<Session>> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_state(&self, state: ClientState) {
        self.state.send_replace(state);
    }

    async fn dial(&self) -> NetResult<()> {
        self.set_state(ClientState::Connecting);
        let session =
            connect_session(&self.url, self.new_codec.clone(), self.adapter.clone()).await?;

        if self.cancel.is_cancelled() {
            session.close().await;
            return Err(NetError::ConnClosing);
        }
        {
            // A close racing the store either shows up here or clears it after.
            let mut current = self.session.write().unwrap_or_else(|e| e.into_inner());
            if session.is_closed() {
                return Err(NetError::ConnClosing);
            }
            *current = Some(session);
        }
        self.set_state(ClientState::Connected);
        info!(url = %self.url, "Connected");
        Ok(())
    }

    /// Forget `session` if it is still the current one.
    fn clear_session(&self, session: &Arc<Session>) {
        let mut current = self.session.write().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)) {
            *current = None;
        }
    }

    fn spawn_reconnect(self: Arc<Self>) {
        if self.cancel.is_cancelled() || self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_state(ClientState::Disconnected);

        tokio::spawn(async move {
            self.redial().await;
            self.finish_reconnect();
        });
    }

    /// Dial until a session is in place or the client is closed.
    async fn redial(&self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.dial().await {
                Ok(()) => return,
                Err(e) => {
                    warn!(url = %self.url, error = %e, retry_in_ms = self.retry_delay.as_millis() as u64, "Reconnect failed");
                    if !self.cancel.is_cancelled() {
                        self.set_state(ClientState::Disconnected);
                    }
                }
            }
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    /// Release the reconnect slot.
    ///
    /// A session that dropped while the slot was still held had its
    /// `spawn_reconnect` ignored, so the loop is started again here.
    fn finish_reconnect(self: Arc<Self>) {
        self.reconnecting.store(false, Ordering::Release);
        if self.needs_redial() {
            debug!(url = %self.url, "Session lost during reconnect, dialing again");
            self.spawn_reconnect();
        }
    }

    fn needs_redial(&self) -> bool {
        !self.cancel.is_cancelled() && self.current().map_or(true, |s| s.is_closed())
    }

    fn start_keepalive(self: &Arc<Self>) {
        let Some(payload) = self.keepalive.clone() else {
            return;
        };
        if self.keepalive_interval.is_zero() || self.keepalive_started.swap(true, Ordering::AcqRel) {
            return;
        }

        let client = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let interval = self.keepalive_interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(client) = client.upgrade() else { break };
                        let Some(session) = client.current() else { continue };
                        if let Err(e) = session.async_write(payload(), CLIENT_WRITE_TIMEOUT).await {
                            debug!(session_id = session.id(), error = %e, "Keepalive not sent");
                        }
                    }
                }
            }
            debug!("Keepalive stopped");
        });
    }
}

/// Protocol wrapper binding sessions back to their client.
struct ClientProtocol {
    client: Weak<ClientInner>,
    user: Arc<dyn Protocol>,
}

#[async_trait]
impl Protocol for ClientProtocol {
    async fn on_connect(&self, session: &Arc<Session>) {
        self.user.on_connect(session).await;
        if let Some(client) = self.client.upgrade() {
            client.start_keepalive();
        }
    }

    async fn on_disconnect(&self, session: &Arc<Session>) {
        self.user.on_disconnect(session).await;
        if let Some(client) = self.client.upgrade() {
            client.clear_session(session);
            client.spawn_reconnect();
        }
    }

    fn verify(&self, message: &Message) -> NetResult<()> {
        self.user.verify(message)
    }

    async fn on_message(&self, session: &Arc<Session>, message: Message) -> NetResult<()> {
        self.user.on_message(session, message).await
    }
}
