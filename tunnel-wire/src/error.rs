use thiserror::Error;

/// Errors from the cryptographic envelope: sealed-box key delivery and the
/// per-socket secretbox AEAD.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("sealed box failed to open (wrong recipient key or corrupted ciphertext)")]
    SealedBoxOpenFailed,
    #[error("secretbox AEAD authentication failed")]
    AeadAuthFailed,
}

/// Errors from the control-socket protocol state machine, independent of
/// the underlying transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("received {frame} before the handshake completed")]
    BeforeHandshake { frame: &'static str },
    #[error("a symmetric key is already installed for this socket; ignoring duplicate client_kx")]
    DuplicateKeyInstall,
    #[error("received an unexpected frame type: {frame}")]
    UnexpectedFrame { frame: &'static str },
    #[error("failed to decode envelope: {0}")]
    Decode(String),
    #[error("failed to encode envelope: {0}")]
    Encode(String),
}
