//! Length-prefixed TCP listener.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::NewCodecFn;
use crate::error::{NetError, NetResult};
use crate::protocol::Protocol;
use crate::session::{Manager, KEY_REMOTE_ADDR};

use super::transport::TcpTransport;

/// Back-off after a failed `accept`.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accepts TCP connections and runs one session per connection.
pub struct TcpServer {
    manager: Arc<Manager>,
    new_codec: NewCodecFn,
    protocol: Arc<dyn Protocol>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl TcpServer {
    pub fn new(manager: Arc<Manager>, new_codec: NewCodecFn, protocol: Arc<dyn Protocol>) -> Self {
        Self {
            manager,
            new_codec,
            protocol,
            cancel: Mutex::new(None),
        }
    }

    /// Bind `addr` and start accepting in the background.
    ///
    /// Returns the bound address, useful when binding port 0.
    pub async fn start(&self, addr: &str) -> NetResult<SocketAddr> {
        let cancel = {
            let mut slot = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                return Err(NetError::AlreadyStarted);
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.cancel.lock().unwrap_or_else(|e| e.into_inner()).take();
                return Err(e.into());
            }
        };
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "TCP listener started");

        tokio::spawn(accept_loop(
            listener,
            cancel,
            self.manager.clone(),
            self.new_codec.clone(),
            self.protocol.clone(),
        ));
        Ok(local_addr)
    }

    /// Stop accepting. Established sessions keep running.
    pub fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().unwrap_or_else(|e| e.into_inner()).take() {
            cancel.cancel();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    cancel: CancellationToken,
    manager: Arc<Manager>,
    new_codec: NewCodecFn,
    protocol: Arc<dyn Protocol>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                tokio::spawn(serve_connection(
                    stream,
                    peer,
                    manager.clone(),
                    new_codec.clone(),
                    protocol.clone(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "TCP accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
    info!("TCP listener stopped");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    manager: Arc<Manager>,
    new_codec: NewCodecFn,
    protocol: Arc<dyn Protocol>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let session = manager.new_session(protocol);
    session.put_extra_data(KEY_REMOTE_ADDR, peer.to_string());
    let codec = new_codec(Box::new(TcpTransport::new(stream)));

    if let Err(e) = session.start(codec).await {
        warn!(session_id = session.id(), error = %e, "Failed to start TCP session");
        session.close().await;
    }
}
