//! Plain and TLS WebSocket listeners.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::NewCodecFn;
use crate::error::{NetError, NetResult};
use crate::protocol::Protocol;
use crate::session::{Manager, KEY_REMOTE_ADDR, KEY_USER_AGENT};

use super::tls::load_tls_acceptor;
use super::transport::WsTransport;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Everything a listener needs to turn an upgraded stream into a session.
#[derive(Clone)]
struct Upgrader {
    manager: Arc<Manager>,
    new_codec: NewCodecFn,
    protocol: Arc<dyn Protocol>,
}

impl Upgrader {
    /// Run the WebSocket handshake on `stream` and start a session on it.
    async fn serve<S>(self, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut user_agent = String::new();
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            if let Some(ua) = request
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
            {
                user_agent = ua.to_string();
            }
            Ok(response)
        };

        let ws = match accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!(peer = %peer, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let session = self.manager.new_session(self.protocol);
        session.put_extra_data(KEY_REMOTE_ADDR, peer.to_string());
        session.put_extra_data(KEY_USER_AGENT, user_agent);
        let codec = (self.new_codec)(Box::new(WsTransport::new(ws)));

        if let Err(e) = session.start(codec).await {
            warn!(session_id = session.id(), error = %e, "Failed to start WebSocket session");
            session.close().await;
        }
    }
}

/// Cancellation slot shared by both listener flavors.
#[derive(Default)]
struct Running(Mutex<Option<CancellationToken>>);

impl Running {
    fn begin(&self) -> NetResult<CancellationToken> {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(NetError::AlreadyStarted);
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Ok(token)
    }

    fn abort(&self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn stop(&self) {
        if let Some(token) = self.0.lock().unwrap_or_else(|e| e.into_inner()).take() {
            token.cancel();
        }
    }
}

fn set_nodelay(stream: &TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
    }
}

async fn bind(running: &Running, addr: &str) -> NetResult<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(e) => {
            running.abort();
            Err(e.into())
        }
    }
}

/// Accepts WebSocket upgrades over plain TCP.
pub struct WebsocketServer {
    upgrader: Upgrader,
    running: Running,
}

impl WebsocketServer {
    pub fn new(manager: Arc<Manager>, new_codec: NewCodecFn, protocol: Arc<dyn Protocol>) -> Self {
        Self {
            upgrader: Upgrader {
                manager,
                new_codec,
                protocol,
            },
            running: Running::default(),
        }
    }

    /// Bind `addr` and serve upgrades in the background. Any request path
    /// is accepted.
    pub async fn start(&self, addr: &str) -> NetResult<SocketAddr> {
        let cancel = self.running.begin()?;
        let listener = bind(&self.running, addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "WebSocket listener started");

        let upgrader = self.upgrader.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        set_nodelay(&stream, peer);
                        tokio::spawn(upgrader.clone().serve(stream, peer));
                    }
                    Err(e) => {
                        warn!(error = %e, "WebSocket accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
            info!("WebSocket listener stopped");
        });
        Ok(local_addr)
    }

    /// Stop accepting. Established sessions keep running.
    pub fn stop(&self) {
        self.running.stop();
    }
}

/// Accepts WebSocket upgrades over TLS.
pub struct WebsocketTlsServer {
    upgrader: Upgrader,
    running: Running,
}

impl WebsocketTlsServer {
    pub fn new(manager: Arc<Manager>, new_codec: NewCodecFn, protocol: Arc<dyn Protocol>) -> Self {
        Self {
            upgrader: Upgrader {
                manager,
                new_codec,
                protocol,
            },
            running: Running::default(),
        }
    }

    /// Load the PEM certificate chain and key, bind `addr` and serve
    /// upgrades in the background.
    pub async fn start(
        &self,
        addr: &str,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> NetResult<SocketAddr> {
        let acceptor = load_tls_acceptor(cert_path.as_ref(), key_path.as_ref())?;
        let cancel = self.running.begin()?;
        let listener = bind(&self.running, addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Secure WebSocket listener started");

        let upgrader = self.upgrader.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        set_nodelay(&stream, peer);
                        tokio::spawn(serve_tls(acceptor.clone(), upgrader.clone(), stream, peer));
                    }
                    Err(e) => {
                        warn!(error = %e, "Secure WebSocket accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
            info!("Secure WebSocket listener stopped");
        });
        Ok(local_addr)
    }

    /// Stop accepting. Established sessions keep running.
    pub fn stop(&self) {
        self.running.stop();
    }
}

async fn serve_tls(
    acceptor: TlsAcceptor,
    upgrader: Upgrader,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
) {
    match acceptor.accept(stream).await {
        Ok(tls) => upgrader.serve(tls, peer).await,
        Err(e) => debug!(peer = %peer, error = %e, "TLS handshake failed"),
    }
}
