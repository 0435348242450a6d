//! The virtual WebSocket surface: a client-side handle to one tunneled WS
//! sub-connection, driven by `ws_event`/`ws_message` inner messages
//! (`spec.md` §4.7).

use tokio::sync::{mpsc, oneshot};

use crate::error::ClientError;

/// One frame received from the tunneled sub-connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WsClientEvent {
    Open,
    Text(String),
    Binary(Vec<u8>),
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
    Error(String),
}

/// A command sent to the background session task to act on behalf of one
/// sub-connection.
#[derive(Debug)]
pub(crate) enum WsCommand {
    SendText(String),
    SendBinary(Vec<u8>),
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
}

pub(crate) struct WsConnectRequest {
    pub url: String,
    pub protocols: Option<Vec<String>>,
    pub responder: oneshot::Sender<Result<WsHandle, ClientError>>,
}

/// A live virtual WebSocket sub-connection, as handed back by
/// [`crate::session::TunnelClient::connect_ws`].
///
/// State machine per `spec.md` §4.7 (`CONNECTING → OPEN → CLOSING →
/// CLOSED`) is tracked by the background session task; once `events`
/// yields a [`WsClientEvent::Close`] or is closed, every further `send`
/// is a no-op from the caller's perspective (the channel is simply gone).
pub struct WsHandle {
    pub(crate) command_tx: mpsc::Sender<WsCommand>,
    pub events: mpsc::Receiver<WsClientEvent>,
}

impl WsHandle {
    pub async fn send_text(&self, data: String) {
        let _ = self.command_tx.send(WsCommand::SendText(data)).await;
    }

    pub async fn send_binary(&self, data: Vec<u8>) {
        let _ = self.command_tx.send(WsCommand::SendBinary(data)).await;
    }

    pub async fn close(&self, code: Option<u16>, reason: Option<String>) {
        let _ = self.command_tx.send(WsCommand::Close { code, reason }).await;
    }
}
