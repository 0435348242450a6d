//! Virtual WebSocket adapter, server side: on `ws_client_connect`, registers
//! a virtual client with the host's WebSocket-server abstraction, forwards
//! inbound `ws_message`s preserving text/binary typing, and relays
//! host-originated sends and closes back through the tunnel
//! (`spec.md` §4.7).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SessionError;

/// One frame exchanged between a virtual WS sub-connection and its host
/// handler, in either direction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WsFrame {
    Text(String),
    Binary(Vec<u8>),
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
}

/// A live virtual WebSocket sub-connection, as handed to the host
/// application by [`WsHost::accept`].
pub struct WsHostConnection {
    /// The session forwards client-originated frames into this channel;
    /// the host's own task reads them.
    pub inbound_tx: mpsc::Sender<WsFrame>,
    /// The session reads host-originated frames from this channel and
    /// relays them to the client over the tunnel.
    pub outbound_rx: mpsc::Receiver<WsFrame>,
}

/// The host application's WebSocket-server abstraction, as seen by the
/// relay's virtual adapter. `spec.md` §4.7 describes this as "the host's
/// WebSocket-server abstraction"; this crate only defines the narrow
/// interface the tunnel needs against it.
#[async_trait]
pub trait WsHost: Send + Sync + 'static {
    /// Accepts a new virtual client connection. Returning `Err` causes the
    /// session to emit a `ws_event(error)` and never open the
    /// sub-connection.
    async fn accept(
        &self,
        url: &str,
        protocols: Option<&[String]>,
    ) -> Result<WsHostConnection, SessionError>;
}

/// State machine for one WS sub-connection, per `spec.md` §4.7.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WsConnState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl WsConnState {
    /// Whether a message arriving in this state should be processed
    /// (`spec.md` §4.7: "Any message after CLOSED is dropped").
    pub fn accepts_messages(self) -> bool {
        !matches!(self, WsConnState::Closed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn closed_state_drops_messages() {
        assert!(WsConnState::Open.accepts_messages());
        assert!(WsConnState::Connecting.accepts_messages());
        assert!(WsConnState::Closing.accepts_messages());
        assert!(!WsConnState::Closed.accepts_messages());
    }
}
