//! Transport error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Would-block conditions are not failures; the caller queues instead.
    pub fn is_would_block(&self) -> bool {
        matches!(self, TransportError::Io(e) if e.kind() == std::io::ErrorKind::WouldBlock)
    }
}
