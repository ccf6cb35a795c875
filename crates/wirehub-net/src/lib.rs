//! # wirehub-net
//!
//! Transport-agnostic session layer for wirehub. Provides:
//!
//! - Sessions with a bounded outbound mailbox and one-shot close
//! - A sharded session registry with idle expiry
//! - Length-prefixed JSON over TCP
//! - JSON over WebSocket, plain or TLS
//! - An outbound WebSocket client that reconnects and sends keepalives
//! - A pluggable handler for panics caught in session tasks

pub mod codec;
pub mod error;
pub mod panic;
pub mod protocol;
pub mod session;
pub mod tcp;
pub mod websocket;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::{json_codec, Codec, JsonCodec, Message, NewCodecFn, Transport};
pub use error::{ErrorKind, NetError, NetResult};
pub use panic::{set_panic_handler, PanicHandler, PanicPayload};
pub use protocol::Protocol;
pub use session::{Manager, Session, SessionId, SessionInfo};
pub use tcp::TcpServer;
pub use websocket::{
    connect_session, ClientState, ReconnectingClient, WebsocketServer, WebsocketTlsServer,
};
