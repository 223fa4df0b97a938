//! Typed error kinds shared by the client and server halves of the tunnel.

use thiserror::Error;

/// Every failure mode the tunneling core can produce.
///
/// Per-stream variants (`StreamOpenFailed`, `IoError` while bridging) are
/// logged and contained by callers; per-tunnel variants (`TransportClosed`,
/// `HandshakeRejected`, `IoError` on the control channel) tear the tunnel
/// down. See the propagation policy in the project's error-handling design
/// notes for which is which.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid remote: {0}")]
    InvalidRemote(String),

    #[error("invalid user: {0}")]
    InvalidUser(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("authentication denied: {0}")]
    AuthDenied(String),

    #[error("access to '{0}' denied")]
    AccessDenied(String),

    #[error("handshake timed out waiting for {0}")]
    HandshakeTimeout(&'static str),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("stream open failed: {0}")]
    StreamOpenFailed(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("config decode failed: {0}")]
    ConfigDecode(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("tls error: {0}")]
    TlsError(String),

    #[error("config file error: {0}")]
    ConfigFileError(String),

    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
