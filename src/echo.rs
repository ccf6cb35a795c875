//! Protocol served by the bundled listeners: every JSON object is echoed
//! back to its sender.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use wirehub_net::{Message, NetError, NetResult, Protocol, Session};

/// Echoes inbound objects through the session mailbox.
pub struct EchoProtocol {
    write_timeout: Duration,
}

impl EchoProtocol {
    pub fn new(write_timeout: Duration) -> Self {
        Self { write_timeout }
    }
}

#[async_trait]
impl Protocol for EchoProtocol {
    async fn on_connect(&self, session: &Arc<Session>) {
        info!(
            session_id = session.id(),
            remote_addr = ?session.remote_addr(),
            user_agent = ?session.user_agent(),
            "Client connected"
        );
    }

    async fn on_disconnect(&self, session: &Arc<Session>) {
        info!(session_id = session.id(), "Client disconnected");
    }

    fn verify(&self, message: &Message) -> NetResult<()> {
        if message.is_object() {
            Ok(())
        } else {
            Err(NetError::protocol("expected a JSON object"))
        }
    }

    async fn on_message(&self, session: &Arc<Session>, message: Message) -> NetResult<()> {
        debug!(session_id = session.id(), "Echoing message");
        session.reset_expire_time();
        match session.async_write_json(&message, self.write_timeout).await {
            Ok(()) => Ok(()),
            // A slow reader drops replies instead of losing the connection.
            Err(NetError::WriteBlocking) => {
                warn!(session_id = session.id(), "Reply dropped, mailbox full");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Protocol for the upstream link: logs whatever the upstream sends.
pub struct UpstreamProtocol;

#[async_trait]
impl Protocol for UpstreamProtocol {
    async fn on_connect(&self, session: &Arc<Session>) {
        info!(session_id = session.id(), upstream = ?session.remote_addr(), "Upstream connected");
    }

    async fn on_disconnect(&self, session: &Arc<Session>) {
        warn!(session_id = session.id(), "Upstream disconnected");
    }

    fn verify(&self, _message: &Message) -> NetResult<()> {
        Ok(())
    }

    async fn on_message(&self, session: &Arc<Session>, message: Message) -> NetResult<()> {
        debug!(session_id = session.id(), %message, "Upstream message");
        Ok(())
    }
}
