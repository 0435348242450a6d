//! Relay side of the attested tunnel: a single WebSocket route (`/__ra__`)
//! that runs the control-socket handshake and multiplexes tunneled HTTP
//! and WebSocket traffic into a host `tower::Service` and [`WsHost`]
//! (`spec.md` §4, §6).
//!
//! A relay binary wires this in roughly the way the teacher wires its own
//! axum routers: build a [`Config`], wrap it and the host app in
//! [`TunnelState`], then `.route("/__ra__", get(upgrade_handler))` it into
//! the outer `Router`.

pub mod config;
pub mod error;
pub mod http_adapter;
pub mod session;
pub mod ws_adapter;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use http::Request;
use rtask::NotifyOnce;
use tower::Service;
use tracing::{info, warn};

pub use config::Config;
pub use error::SessionError;
pub use ws_adapter::{WsFrame, WsHost, WsHostConnection};

/// Everything the `/__ra__` upgrade handler needs: the relay's keypair and
/// timeouts, the quote to present at handshake, the host HTTP application,
/// and the host WS acceptor.
pub struct TunnelState<S, H> {
    pub config: Arc<Config>,
    /// The raw attestation quote presented in every `server_kx` frame.
    /// `spec.md` §4.5 treats this as opaque bytes produced once, outside
    /// this crate (e.g. read from the enclave's quote device), and reused
    /// across control sockets until it's refreshed by the embedder.
    pub quote_bytes: Vec<u8>,
    pub app: S,
    pub ws_host: Arc<H>,
    /// Signaled by the embedder to drain every open control socket, e.g.
    /// as one of the "static" shutdown sources in `rtask`'s
    /// `try_join_tasks_and_shutdown`.
    pub shutdown: NotifyOnce,
}

impl<S: Clone, H> Clone for TunnelState<S, H> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            quote_bytes: self.quote_bytes.clone(),
            app: self.app.clone(),
            ws_host: Arc::clone(&self.ws_host),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S, H> TunnelState<S, H> {
    pub fn new(
        config: Config,
        quote_bytes: Vec<u8>,
        app: S,
        ws_host: H,
        shutdown: NotifyOnce,
    ) -> Self {
        Self {
            config: Arc::new(config),
            quote_bytes,
            app,
            ws_host: Arc::new(ws_host),
            shutdown,
        }
    }
}

/// The axum handler for `GET /__ra__`. Upgrades to a WebSocket and hands
/// off to [`session::run_session`]. Any other path or method never reaches
/// this handler at all: the embedder's router only ever points `/__ra__`
/// at it, so there is nothing here to refuse (`spec.md` §6).
pub async fn upgrade_handler<S, H>(
    ws: WebSocketUpgrade,
    State(state): State<TunnelState<S, H>>,
) -> Response
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Error: std::fmt::Display,
    S::Future: Send,
    H: WsHost,
{
    ws.on_upgrade(move |socket| run_session_logging(socket, state))
}

async fn run_session_logging<S, H>(socket: WebSocket, state: TunnelState<S, H>)
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Error: std::fmt::Display,
    S::Future: Send,
    H: WsHost,
{
    info!("tunnel control socket opened");
    let result = session::run_session(
        socket,
        state.config,
        state.quote_bytes,
        state.app,
        state.ws_host,
        state.shutdown,
    )
    .await;
    match result {
        Ok(()) => info!("tunnel control socket closed"),
        Err(e) => warn!(error = %e, "tunnel control socket closed with error"),
    }
}
