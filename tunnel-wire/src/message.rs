//! Inner messages: the plaintext payload of an `enc` frame, carrying
//! virtualized HTTP request/response and WS sub-connection lifecycle
//! traffic (`spec.md` §4.6/§4.7).

use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, RequestId};

/// HTTP header list, order-preserving (unlike a map, a given name may
/// legitimately repeat, e.g. `Set-Cookie`).
pub type HeaderList = Vec<(String, String)>;

/// `ws_event`'s `eventType` discriminant.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsEventType {
    Open,
    Close,
    Error,
}

/// Whether a `ws_message`'s `data` is a UTF-8 string or a base64-encoded
/// binary frame, preserving the browser `WebSocket`'s text/binary typing.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsDataType {
    String,
    Arraybuffer,
}

/// One tunneled HTTP or WebSocket inner message. `spec.md` §4.6/§4.7 name
/// these seven message kinds; each carries its own multiplexing id.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InnerMessage {
    HttpRequest {
        request_id: RequestId,
        method: String,
        url: String,
        headers: HeaderList,
        /// Base64-encoded if the request body is binary; `spec.md` §9's
        /// Open Question is resolved as "always base64" (`DESIGN.md`).
        body: Option<String>,
    },
    HttpResponse {
        request_id: RequestId,
        status: u16,
        status_text: String,
        headers: HeaderList,
        body: Option<String>,
        error: Option<String>,
    },
    WsClientConnect {
        connection_id: ConnectionId,
        url: String,
        protocols: Option<Vec<String>>,
    },
    WsClientClose {
        connection_id: ConnectionId,
        code: Option<u16>,
        reason: Option<String>,
    },
    WsMessage {
        connection_id: ConnectionId,
        data: String,
        data_type: WsDataType,
    },
    WsEvent {
        connection_id: ConnectionId,
        event_type: WsEventType,
        code: Option<u16>,
        reason: Option<String>,
        error: Option<String>,
    },
}

impl InnerMessage {
    /// The wire `type` discriminator, for logging/error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            InnerMessage::HttpRequest { .. } => "http_request",
            InnerMessage::HttpResponse { .. } => "http_response",
            InnerMessage::WsClientConnect { .. } => "ws_client_connect",
            InnerMessage::WsClientClose { .. } => "ws_client_close",
            InnerMessage::WsMessage { .. } => "ws_message",
            InnerMessage::WsEvent { .. } => "ws_event",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn http_request_roundtrips_through_cbor() {
        let msg = InnerMessage::HttpRequest {
            request_id: RequestId::generate(),
            method: "GET".to_string(),
            url: "/uptime".to_string(),
            headers: vec![("accept".to_string(), "application/json".to_string())],
            body: None,
        };
        let bytes = serde_cbor::to_vec(&msg).unwrap();
        let back: InnerMessage = serde_cbor::from_slice(&bytes).unwrap();
        assert_eq!(back.kind(), "http_request");
    }

    #[test]
    fn ws_message_preserves_data_type() {
        let msg = InnerMessage::WsMessage {
            connection_id: ConnectionId::generate(),
            data: "aGVsbG8=".to_string(),
            data_type: WsDataType::Arraybuffer,
        };
        let bytes = serde_cbor::to_vec(&msg).unwrap();
        let InnerMessage::WsMessage { data_type, .. } =
            serde_cbor::from_slice(&bytes).unwrap()
        else {
            panic!("expected WsMessage");
        };
        assert_eq!(data_type, WsDataType::Arraybuffer);
    }
}
