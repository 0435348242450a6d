//! Virtual HTTP adapter, server side: materializes a tunneled
//! `http_request` into the host application's request object (any
//! `tower::Service<http::Request<Body>>`, e.g. an `axum::Router`) and
//! streams its response back as an `http_response` (`spec.md` §4.6).

use axum::body::Body;
use base64::Engine;
use http::{HeaderName, HeaderValue, Method, Request, Response};
use http_body_util::BodyExt;
use tower::{Service, ServiceExt};
use tunnel_wire::{
    message::{HeaderList, InnerMessage},
    RequestId,
};

fn base64_decode(s: &str) -> Result<Vec<u8>, String> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| format!("invalid base64 request body: {e}"))
}

fn base64_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn build_request(
    method: &str,
    url: &str,
    headers: &HeaderList,
    body: Option<&str>,
) -> Result<Request<Body>, String> {
    let method =
        Method::from_bytes(method.as_bytes()).map_err(|e| format!("bad method: {e}"))?;

    let body_bytes = match body {
        Some(b) => base64_decode(b)?,
        None => Vec::new(),
    };

    let mut builder = Request::builder().method(method).uri(url);
    for (name, value) in headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        let Ok(value) = HeaderValue::from_str(value) else {
            continue;
        };
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from(body_bytes))
        .map_err(|e| format!("failed to build request: {e}"))
}

fn error_response(request_id: RequestId, message: String) -> InnerMessage {
    InnerMessage::HttpResponse {
        request_id,
        status: 500,
        status_text: "Internal Server Error".to_string(),
        headers: HeaderList::new(),
        body: None,
        error: Some(message),
    }
}

async fn response_to_inner_message(
    request_id: RequestId,
    response: Response<Body>,
) -> InnerMessage {
    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let body_bytes = match response.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => {
            return error_response(
                request_id,
                "failed to read response body".to_string(),
            )
        }
    };

    InnerMessage::HttpResponse {
        request_id,
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("").to_string(),
        headers,
        body: Some(base64_encode(&body_bytes)),
        error: None,
    }
}

/// Materializes one `http_request` into `app` and returns the
/// `http_response` inner message to send back over the tunnel. Never
/// returns an error itself: an application or materialization failure
/// becomes a status-500 `http_response` with `error` set, per `spec.md`
/// §4.6.
pub async fn dispatch_http_request<S>(
    app: S,
    request_id: RequestId,
    method: &str,
    url: &str,
    headers: &HeaderList,
    body: Option<&str>,
) -> InnerMessage
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Error: std::fmt::Display,
    S::Future: Send,
{
    let request = match build_request(method, url, headers, body) {
        Ok(req) => req,
        Err(e) => return error_response(request_id, e),
    };

    match app.oneshot(request).await {
        Ok(response) => response_to_inner_message(request_id, response).await,
        Err(e) => error_response(request_id, e.to_string()),
    }
}

#[cfg(test)]
mod test {
    use axum::{routing::get, Router};

    use super::*;

    async fn uptime_handler() -> &'static str {
        "{\"uptime\":{\"formatted\":\"1h\"}}"
    }

    #[tokio::test]
    async fn dispatches_matching_route() {
        let app = Router::new().route("/uptime", get(uptime_handler));
        let msg = dispatch_http_request(
            app,
            RequestId::generate(),
            "GET",
            "/uptime",
            &HeaderList::new(),
            None,
        )
        .await;

        let InnerMessage::HttpResponse {
            status, body, error, ..
        } = msg
        else {
            panic!("expected HttpResponse");
        };
        assert_eq!(status, 200);
        assert!(error.is_none());
        let body_bytes = base64_decode(&body.unwrap()).unwrap();
        assert_eq!(body_bytes, b"{\"uptime\":{\"formatted\":\"1h\"}}");
    }

    #[tokio::test]
    async fn unmatched_route_surfaces_404_not_error_field() {
        let app = Router::new().route("/uptime", get(uptime_handler));
        let msg = dispatch_http_request(
            app,
            RequestId::generate(),
            "GET",
            "/does-not-exist",
            &HeaderList::new(),
            None,
        )
        .await;

        let InnerMessage::HttpResponse { status, error, .. } = msg else {
            panic!("expected HttpResponse");
        };
        assert_eq!(status, 404);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn bad_base64_body_surfaces_500() {
        let app = Router::new().route("/uptime", get(uptime_handler));
        let msg = dispatch_http_request(
            app,
            RequestId::generate(),
            "POST",
            "/uptime",
            &HeaderList::new(),
            Some("not valid base64!!"),
        )
        .await;

        let InnerMessage::HttpResponse { status, error, .. } = msg else {
            panic!("expected HttpResponse");
        };
        assert_eq!(status, 500);
        assert!(error.is_some());
    }
}
