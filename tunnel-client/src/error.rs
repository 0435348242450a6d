use thiserror::Error;
use tunnel_wire::{CryptoError, ProtocolError};

/// Errors surfaced to a caller of [`crate::session::TunnelClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("cryptographic failure: {0}")]
    Crypto(#[from] CryptoError),
    #[error("attestation rejected: {0}")]
    Attestation(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    RequestTimeout,
    #[error("tunnel disconnected")]
    Disconnected,
}
