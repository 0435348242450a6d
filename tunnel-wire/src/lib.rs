//! Wire data model and cryptographic envelope shared by both legs of the
//! attested tunnel: the three [`envelope::Frame`] variants, the seven
//! [`message::InnerMessage`] kinds they carry once decrypted, the
//! multiplexing [`ids::RequestId`]/[`ids::ConnectionId`], and the sealed-box
//! / secretbox primitives in [`crypto`].

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod message;

pub use crypto::{SealedBox, SessionKey};
pub use envelope::{ClientKx, Enc, Frame, ServerKx};
pub use error::{CryptoError, ProtocolError};
pub use ids::{ConnectionId, RequestId};
pub use message::InnerMessage;

/// Encrypts an [`InnerMessage`] into an `enc` frame under the session key.
pub fn encrypt_message(key: &SessionKey, msg: &InnerMessage) -> Result<Frame, ProtocolError> {
    let plaintext =
        serde_cbor::to_vec(msg).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    let (nonce, ciphertext) = crypto::secretbox_seal(key, &plaintext);
    Ok(Frame::Enc(Enc { nonce, ciphertext }))
}

/// Decrypts an `enc` frame's ciphertext into an [`InnerMessage`].
///
/// Per `spec.md` §3's invariant, this is the only path by which a
/// post-handshake message is accepted: a bare `server_kx`/`client_kx`
/// frame arriving after the handshake, or a frame this function can't
/// decrypt, must be rejected by the caller rather than interpreted.
pub fn decrypt_message(key: &SessionKey, enc: &Enc) -> Result<InnerMessage, ProtocolError> {
    let plaintext = crypto::secretbox_open(key, &enc.nonce, &enc.ciphertext)
        .map_err(|_| ProtocolError::Decode("secretbox authentication failed".to_string()))?;
    serde_cbor::from_slice(&plaintext).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::HeaderList;

    #[test]
    fn encrypt_then_decrypt_recovers_message() {
        let key = SessionKey::generate();
        let msg = InnerMessage::HttpResponse {
            request_id: RequestId::generate(),
            status: 200,
            status_text: "OK".to_string(),
            headers: HeaderList::new(),
            body: Some("{\"uptime\":{\"formatted\":\"1h\"}}".to_string()),
            error: None,
        };

        let frame = encrypt_message(&key, &msg).unwrap();
        let Frame::Enc(enc) = frame else {
            panic!("expected Enc frame");
        };
        let decoded = decrypt_message(&key, &enc).unwrap();
        assert_eq!(decoded.kind(), "http_response");
    }

    #[test]
    fn decrypt_fails_under_wrong_key() {
        let key = SessionKey::generate();
        let other_key = SessionKey::generate();
        let msg = InnerMessage::WsClientClose {
            connection_id: ConnectionId::generate(),
            code: Some(1000),
            reason: None,
        };
        let Frame::Enc(enc) = encrypt_message(&key, &msg).unwrap() else {
            panic!("expected Enc frame");
        };
        assert!(decrypt_message(&other_key, &enc).is_err());
    }
}
