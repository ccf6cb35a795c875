//! Session-layer errors.
//!
//! Every failure that can happen on one connection is a [`NetError`]. The
//! [`ErrorKind`] classification decides whether the failure tears the
//! session down or is handed back to the caller.

use std::fmt;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use wirehub_core::error::{AppError, ErrorKind as AppErrorKind};

/// A specialized `Result` type for session-layer operations.
pub type NetResult<T> = Result<T, NetError>;

/// Category of a [`NetError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or truncated wire data.
    Framing,
    /// The outbound mailbox could not accept the payload in time.
    Backpressure,
    /// The session is closed or closing.
    Closed,
    /// The protocol handler rejected a message.
    Protocol,
    /// The underlying socket, TLS or WebSocket layer failed.
    Transport,
    /// The API was used out of order (e.g. started twice).
    Usage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Framing => write!(f, "FRAMING"),
            Self::Backpressure => write!(f, "BACKPRESSURE"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Protocol => write!(f, "PROTOCOL"),
            Self::Transport => write!(f, "TRANSPORT"),
            Self::Usage => write!(f, "USAGE"),
        }
    }
}

/// Errors produced by sessions, codecs, transports and listeners.
#[derive(Debug, Error)]
pub enum NetError {
    /// The session was closed before or during the operation.
    #[error("use of closed connection")]
    ConnClosing,

    /// The mailbox stayed full for the whole write timeout.
    #[error("write data was blocking")]
    WriteBlocking,

    /// The peer could not supply a full header or payload.
    #[error("connection was bad")]
    BadConn,

    /// A packet header declared a total length outside the accepted range.
    #[error("invalid length: {0}")]
    HeaderLength(usize),

    /// `start` was called on a session that already has a codec.
    #[error("session already started")]
    AlreadyStarted,

    /// A direct send was attempted before the session was started.
    #[error("session not started")]
    NotStarted,

    /// The reconnecting client currently holds no live session.
    #[error("not connected")]
    NotConnected,

    /// The protocol handler rejected a message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A WebSocket frame could not be written before the write deadline.
    #[error("websocket write timed out")]
    WriteTimeout,

    /// WebSocket protocol or handshake failure.
    #[error("websocket error: {0}")]
    WebSocket(#[source] Box<tungstenite::Error>),

    /// Invalid JSON payload.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// TLS material could not be loaded.
    #[error("tls error: {0}")]
    Tls(String),

    /// Socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Create a protocol rejection error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadConn | Self::HeaderLength(_) | Self::Json(_) => ErrorKind::Framing,
            Self::WriteBlocking => ErrorKind::Backpressure,
            Self::ConnClosing | Self::NotConnected => ErrorKind::Closed,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::WriteTimeout | Self::WebSocket(_) | Self::Tls(_) | Self::Io(_) => {
                ErrorKind::Transport
            }
            Self::AlreadyStarted | Self::NotStarted => ErrorKind::Usage,
        }
    }

    /// Whether the error ends the connection it happened on.
    ///
    /// Backpressure and usage errors are returned to the caller and leave
    /// the session running.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Backpressure | ErrorKind::Usage)
    }
}

impl From<tungstenite::Error> for NetError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl From<NetError> for AppError {
    fn from(err: NetError) -> Self {
        let kind = match err.kind() {
            ErrorKind::Framing => AppErrorKind::Serialization,
            ErrorKind::Usage => AppErrorKind::Internal,
            _ if matches!(err, NetError::Tls(_)) => AppErrorKind::Tls,
            _ if matches!(err, NetError::Io(_)) => AppErrorKind::Io,
            _ => AppErrorKind::Network,
        };
        AppError::with_source(kind, err.to_string(), err)
    }
}
