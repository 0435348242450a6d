//! Tunnel cryptography: sealed-box key delivery (X25519 + HKDF-SHA256 +
//! XSalsa20-Poly1305) and the post-handshake secretbox envelope
//! (XSalsa20-Poly1305 with a random 24-byte nonce).
//!
//! `spec.md` §4.5/§9 calls for libsodium's `crypto_box_seal` and
//! `secretbox`. This implementation keeps the secretbox half bit-for-bit
//! (XSalsa20-Poly1305, 24-byte random nonce, 32-byte key) but derives the
//! sealed-box key via X25519 ECDH + HKDF-SHA256 instead of libsodium's
//! BLAKE2b-derived nonce and raw-shared-secret key schedule — see
//! `DESIGN.md`'s Open Question decision for the reasoning.

use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use xsalsa20poly1305::{
    aead::{Aead, KeyInit},
    Key, Nonce, XSalsa20Poly1305,
};
use zeroize::Zeroize;

use crate::error::CryptoError;

pub const SYMMETRIC_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const X25519_PUBLIC_LEN: usize = 32;

/// The random 32-byte symmetric key a client generates per session and
/// delivers to the server via [`seal`]. Zeroized on drop.
#[derive(Clone)]
pub struct SessionKey([u8; SYMMETRIC_KEY_LEN]);

impl SessionKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SYMMETRIC_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LEN] {
        &self.0
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A sealed box: an ephemeral X25519 public key, a random nonce, and the
/// XSalsa20-Poly1305 ciphertext. Anonymous-sender: the recipient learns
/// nothing about the sender's identity beyond possession of the plaintext.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SealedBox {
    pub ephemeral_public_key: [u8; X25519_PUBLIC_LEN],
    pub nonce: [u8; NONCE_LEN],
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

fn derive_key(
    shared_secret: &x25519_dalek::SharedSecret,
    ephemeral_pub: &PublicKey,
    recipient_pub: &PublicKey,
) -> Key {
    let hk = Hkdf::<Sha256>::new(None, shared_secret.as_bytes());
    let mut info = Vec::with_capacity(64 + 16);
    info.extend_from_slice(b"attested-tunnel-sealed-box-v1");
    info.extend_from_slice(ephemeral_pub.as_bytes());
    info.extend_from_slice(recipient_pub.as_bytes());
    let mut key_bytes = [0u8; SYMMETRIC_KEY_LEN];
    hk.expand(&info, &mut key_bytes)
        .expect("32 is a valid HKDF-SHA256 output length");
    Key::from(key_bytes)
}

/// Encrypts `plaintext` to `recipient_pub` using a freshly generated
/// ephemeral X25519 keypair. Only the recipient (holder of the matching
/// [`StaticSecret`]) can recover the plaintext.
pub fn seal(recipient_pub: &PublicKey, plaintext: &[u8]) -> SealedBox {
    let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
    let ephemeral_pub = PublicKey::from(&ephemeral_secret);
    let shared = ephemeral_secret.diffie_hellman(recipient_pub);
    let key = derive_key(&shared, &ephemeral_pub, recipient_pub);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let cipher = XSalsa20Poly1305::new(&key);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .expect("encryption over an in-memory buffer cannot fail");

    SealedBox {
        ephemeral_public_key: ephemeral_pub.to_bytes(),
        nonce: nonce_bytes,
        ciphertext,
    }
}

/// Opens a sealed box addressed to `(my_secret, my_pub)`.
pub fn open(
    my_secret: &StaticSecret,
    my_pub: &PublicKey,
    sealed: &SealedBox,
) -> Result<Vec<u8>, CryptoError> {
    let ephemeral_pub = PublicKey::from(sealed.ephemeral_public_key);
    let shared = my_secret.diffie_hellman(&ephemeral_pub);
    let key = derive_key(&shared, &ephemeral_pub, my_pub);

    let cipher = XSalsa20Poly1305::new(&key);
    let nonce = Nonce::from(sealed.nonce);
    cipher
        .decrypt(&nonce, sealed.ciphertext.as_slice())
        .map_err(|_| CryptoError::SealedBoxOpenFailed)
}

/// Encrypts `plaintext` under the session's symmetric key with a fresh
/// random 24-byte nonce. Returns `(nonce, ciphertext)` for embedding in an
/// `enc` frame.
pub fn secretbox_seal(key: &SessionKey, plaintext: &[u8]) -> ([u8; NONCE_LEN], Vec<u8>) {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let cipher = XSalsa20Poly1305::new(Key::from_slice(&key.0));
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .expect("encryption over an in-memory buffer cannot fail");
    (nonce_bytes, ciphertext)
}

/// Decrypts an `enc` frame's `(nonce, ciphertext)` under the session key.
///
/// Per `spec.md` §8: a replayed nonce within one session is still accepted
/// by the AEAD itself (no nonce-reuse detection at this layer); callers
/// relying on replay protection must add it above this layer.
pub fn secretbox_open(
    key: &SessionKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XSalsa20Poly1305::new(Key::from_slice(&key.0));
    let nonce = Nonce::from(*nonce);
    cipher
        .decrypt(&nonce, ciphertext)
        .map_err(|_| CryptoError::AeadAuthFailed)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sealed_box_roundtrips() {
        let recipient_secret = StaticSecret::random_from_rng(OsRng);
        let recipient_pub = PublicKey::from(&recipient_secret);

        let plaintext = b"thirty two byte symmetric key!!";
        let sealed = seal(&recipient_pub, plaintext);
        let opened = open(&recipient_secret, &recipient_pub, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn sealed_box_rejects_wrong_recipient() {
        let recipient_secret = StaticSecret::random_from_rng(OsRng);
        let recipient_pub = PublicKey::from(&recipient_secret);
        let other_secret = StaticSecret::random_from_rng(OsRng);
        let other_pub = PublicKey::from(&other_secret);

        let sealed = seal(&recipient_pub, b"secret");
        assert!(open(&other_secret, &other_pub, &sealed).is_err());
    }

    #[test]
    fn sealed_box_rejects_tampered_ciphertext() {
        let recipient_secret = StaticSecret::random_from_rng(OsRng);
        let recipient_pub = PublicKey::from(&recipient_secret);

        let mut sealed = seal(&recipient_pub, b"secret payload");
        sealed.ciphertext[0] ^= 0x01;
        assert!(open(&recipient_secret, &recipient_pub, &sealed).is_err());
    }

    #[test]
    fn secretbox_roundtrips() {
        let key = SessionKey::generate();
        let (nonce, ciphertext) = secretbox_seal(&key, b"hello enclave");
        let plaintext = secretbox_open(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello enclave");
    }

    #[test]
    fn secretbox_rejects_bit_flipped_ciphertext() {
        let key = SessionKey::generate();
        let (nonce, mut ciphertext) = secretbox_seal(&key, b"hello enclave");
        ciphertext[0] ^= 0x01;
        assert!(secretbox_open(&key, &nonce, &ciphertext).is_err());
    }

    #[test]
    fn secretbox_rejects_bit_flipped_nonce() {
        let key = SessionKey::generate();
        let (mut nonce, ciphertext) = secretbox_seal(&key, b"hello enclave");
        nonce[0] ^= 0x01;
        assert!(secretbox_open(&key, &nonce, &ciphertext).is_err());
    }

    #[test]
    fn secretbox_nonces_are_unique_across_calls() {
        let key = SessionKey::generate();
        let (nonce1, _) = secretbox_seal(&key, b"a");
        let (nonce2, _) = secretbox_seal(&key, b"a");
        assert_ne!(nonce1, nonce2);
    }
}
