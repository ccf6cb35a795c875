//! WebSocket listeners, transport and the reconnecting client.

pub mod client;
pub mod server;
pub mod tls;
pub mod transport;

pub use client::{
    connect_session, ClientBuilder, ClientState, KeepaliveFn, ReconnectingClient,
    CLIENT_WRITE_TIMEOUT, DEFAULT_RETRY_DELAY,
};
pub use server::{WebsocketServer, WebsocketTlsServer};
pub use tls::load_tls_acceptor;
pub use transport::{WsTransport, WRITE_DEADLINE};
