//! TCP listener with length-prefixed JSON framing.

pub mod packet;
pub mod server;
pub mod transport;

pub use packet::{PacketCodec, HEADER_SIZE, MAX_PACKET_SIZE};
pub use server::TcpServer;
pub use transport::TcpTransport;
