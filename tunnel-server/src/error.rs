use thiserror::Error;
use tunnel_wire::{CryptoError, ProtocolError};

/// Errors surfaced while running one control socket's session loop.
///
/// Per `spec.md` §7, a [`SessionError`] closes the socket and fans out a
/// failure to every pending waiter; it never crosses the tunnel boundary
/// itself (the client only ever sees `Disconnected`/close-code 1006).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("cryptographic failure: {0}")]
    Crypto(#[from] CryptoError),
    #[error("transport closed or errored: {0}")]
    Transport(String),
    #[error("host application error: {0}")]
    Host(String),
}
