//! The three wire frames that travel over the `/__ra__` WebSocket, and the
//! CBOR codec both legs use to (de)serialize them (`spec.md` §4.5/§6,
//! with the browser-JSON/server-CBOR split resolved to CBOR-on-both-legs
//! per `DESIGN.md`'s Open Question decision).

use serde::{Deserialize, Serialize};

use crate::{crypto::SealedBox, error::ProtocolError};

/// A `server_kx` frame: the server's ephemeral X25519 public key plus the
/// attestation evidence (a raw quote, base64/hex/binary as the caller's
/// transport prefers — this crate treats it as opaque bytes; parsing is
/// `qvl`'s job, one layer up).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerKx {
    pub x25519_public_key: [u8; 32],
    #[serde(with = "serde_bytes")]
    pub quote: Vec<u8>,
}

/// A `client_kx` frame: the client's session key, sealed to the server's
/// X25519 public key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientKx {
    pub sealed_symmetric_key: SealedBox,
}

/// An `enc` frame: the post-handshake AEAD envelope. Its plaintext,
/// once opened, is a CBOR-encoded [`crate::message::InnerMessage`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Enc {
    pub nonce: [u8; 24],
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

/// The top-level frame discriminated union. Every frame on the wire
/// carries a `type` tag; this is an internally-tagged CBOR map
/// `{"type": "...", <fields>}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    ServerKx(ServerKx),
    ClientKx(ClientKx),
    Enc(Enc),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::ServerKx(_) => "server_kx",
            Frame::ClientKx(_) => "client_kx",
            Frame::Enc(_) => "enc",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_cbor::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_cbor::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::SYMMETRIC_KEY_LEN;

    #[test]
    fn server_kx_roundtrips() {
        let frame = Frame::ServerKx(ServerKx {
            x25519_public_key: [0x11; 32],
            quote: vec![0xAA; 16],
        });
        let bytes = frame.encode().unwrap();
        let back = Frame::decode(&bytes).unwrap();
        assert_eq!(back.kind(), "server_kx");
    }

    #[test]
    fn enc_roundtrips() {
        let frame = Frame::Enc(Enc {
            nonce: [0x02; 24],
            ciphertext: vec![0x03; SYMMETRIC_KEY_LEN],
        });
        let bytes = frame.encode().unwrap();
        let back = Frame::decode(&bytes).unwrap();
        assert_eq!(back.kind(), "enc");
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Frame::decode(&[0xFF, 0x00, 0x01]).is_err());
    }
}
