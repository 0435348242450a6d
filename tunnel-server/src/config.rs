use std::time::Duration;

use x25519_dalek::{PublicKey, StaticSecret};

/// Pending HTTP requests fail after this long and surface `RequestTimeout`
/// to the waiting `fetch` (`spec.md` §4.5).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-relay configuration. `spec.md` §6 states there is no CLI surface in
/// the core; a relay binary assembles this once, at the edge, from its own
/// config/CLI/env handling, and passes it into `tunnel-server` as a plain
/// value (mirrors the teacher's `Config`-struct-at-the-edge convention).
pub struct Config {
    /// The relay's long-lived X25519 keypair, used to receive the sealed
    /// session key from each connecting client. A production relay
    /// generates this once (e.g. derived inside the enclave) and reuses it
    /// across control sockets; rotating it invalidates in-flight
    /// handshakes.
    pub x25519_secret: StaticSecret,
    pub request_timeout: Duration,
}

impl Config {
    pub fn new(x25519_secret: StaticSecret) -> Self {
        Self {
            x25519_secret,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn x25519_public(&self) -> PublicKey {
        PublicKey::from(&self.x25519_secret)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
