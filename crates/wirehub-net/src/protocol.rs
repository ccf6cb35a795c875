//! Application callback surface bound to sessions.

use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::Message;
use crate::error::NetResult;
use crate::session::Session;

/// Application handler invoked by a [`Session`].
///
/// `verify` runs before `on_message` for every inbound message. An error
/// from either closes the session; there is no skip-and-continue path.
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Called once when the session starts, before any message is read.
    async fn on_connect(&self, session: &Arc<Session>);

    /// Called exactly once when the session closes.
    async fn on_disconnect(&self, session: &Arc<Session>);

    /// Validate an inbound message.
    fn verify(&self, message: &Message) -> NetResult<()>;

    /// Handle a verified inbound message.
    async fn on_message(&self, session: &Arc<Session>, message: Message) -> NetResult<()>;
}
