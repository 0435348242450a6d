use std::time::Duration;

use qvl::Crl;

/// Matches the relay's default; a pending `fetch` fails with
/// [`crate::error::ClientError::RequestTimeout`] after this long
/// (`spec.md` §4.5/§5).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `spec.md` §5: "the client schedules a reconnect after ~1 s on close".
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Node-side tunnel configuration: the quote-verification trust anchors
/// plus the client's own timeouts. Measurement and TCB policy are supplied
/// separately (see [`crate::policy`]) since they're call-site predicates,
/// not data.
pub struct Config {
    pub pinned_roots: Vec<sha256::Hash>,
    pub crls: Vec<Crl>,
    pub request_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl Config {
    pub fn new(pinned_roots: Vec<sha256::Hash>, crls: Vec<Crl>) -> Self {
        Self {
            pinned_roots,
            crls,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}
