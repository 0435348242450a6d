//! The virtual `fetch` surface: allocates a `requestId`, registers a
//! waiter, and resolves with the response or rejects on error/timeout
//! (`spec.md` §4.6).

use tokio::sync::oneshot;
use tunnel_wire::message::HeaderList;

use crate::error::ClientError;

/// A materialized `http_response`, successful or application-level failed
/// (network/transport failures surface as `Err(ClientError)` instead).
#[derive(Clone, Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderList,
    /// Base64-encoded when the body is binary, per `spec.md` §4.6.
    pub body: Option<String>,
}

pub(crate) struct FetchRequest {
    pub method: String,
    pub url: String,
    pub headers: HeaderList,
    pub body: Option<String>,
    pub responder: oneshot::Sender<Result<FetchResponse, ClientError>>,
}
