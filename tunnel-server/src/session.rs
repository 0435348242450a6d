//! The relay-side control socket: handshake state machine, frame read
//! loop, and multiplexing of tunneled HTTP requests and WS sub-connections
//! by id (`spec.md` §4.5, §5).

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Body,
    extract::ws::{Message, WebSocket},
};
use futures::{stream::FuturesUnordered, SinkExt, StreamExt};
use http::{Request, Response};
use rtask::{NotifyOnce, RTask};
use tokio::sync::mpsc;
use tower::Service;
use tracing::{debug, warn};
use tunnel_wire::{
    envelope::{ClientKx, ServerKx},
    ids::ConnectionId,
    message::InnerMessage,
    crypto, Frame, SessionKey,
};

use crate::{
    config::Config,
    error::SessionError,
    http_adapter::dispatch_http_request,
    ws_adapter::{WsConnState, WsFrame, WsHost},
};

/// Channel depth for the per-session outbound queue. Sized generously
/// since it's bounded by in-flight requests/WS traffic on one socket, not
/// by the number of sockets the relay serves.
const OUTBOUND_CHANNEL_SIZE: usize = 256;

struct WsConnSlot {
    inbound_tx: mpsc::Sender<WsFrame>,
    state: WsConnState,
}

/// Runs one control socket end-to-end: sends `server_kx`, installs the
/// session key from exactly one `client_kx`, then loops decoding `enc`
/// frames and dispatching their inner messages until the socket closes or
/// `shutdown` fires.
pub async fn run_session<S, H>(
    mut socket: WebSocket,
    config: Arc<Config>,
    quote_bytes: Vec<u8>,
    app: S,
    ws_host: Arc<H>,
    mut shutdown: NotifyOnce,
) -> Result<(), SessionError>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Error: std::fmt::Display,
    S::Future: Send,
    H: WsHost,
{
    let server_kx = Frame::ServerKx(ServerKx {
        x25519_public_key: config.x25519_public().to_bytes(),
        quote: quote_bytes,
    });
    send_frame(&mut socket, &server_kx).await?;

    let mut key: Option<SessionKey> = None;
    let mut ws_conns: HashMap<ConnectionId, WsConnSlot> = HashMap::new();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<InnerMessage>(OUTBOUND_CHANNEL_SIZE);
    let mut eph_tasks = FuturesUnordered::new();

    loop {
        tokio::select! {
            biased;

            () = shutdown.recv() => {
                debug!("session shutting down");
                break;
            }

            maybe_msg = socket.next() => {
                match maybe_msg {
                    None | Some(Ok(Message::Close(_))) => break,
                    Some(Err(e)) => return Err(SessionError::Transport(e.to_string())),
                    Some(Ok(Message::Binary(bytes))) => {
                        let result = handle_incoming_frame(
                            &bytes,
                            &config,
                            &mut key,
                            &app,
                            ws_host.as_ref(),
                            &outbound_tx,
                            &mut ws_conns,
                            &mut eph_tasks,
                        ).await;
                        if let Err(e) = result {
                            warn!(error = %e, "dropping malformed/out-of-order frame");
                        }
                    }
                    // Text/ping/pong frames carry no protocol meaning here;
                    // ping/pong are already handled by the transport.
                    Some(Ok(_)) => {}
                }
            }

            Some(inner) = outbound_rx.recv() => {
                let Some(k) = key.as_ref() else {
                    // A spawned task raced the handshake; this can't
                    // happen since tasks are only spawned after `key` is
                    // installed, but drop defensively rather than panic.
                    continue;
                };
                let frame = tunnel_wire::encrypt_message(k, &inner)?;
                send_frame(&mut socket, &frame).await?;
            }

            Some(name) = eph_tasks.next(), if !eph_tasks.is_empty() => {
                debug!("session task finished: {name}");
            }
        }
    }

    for slot in ws_conns.into_values() {
        let _ = slot
            .inbound_tx
            .send(WsFrame::Close {
                code: Some(1006),
                reason: None,
            })
            .await;
    }

    Ok(())
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), SessionError> {
    let bytes = frame.encode()?;
    socket
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))
}

#[allow(clippy::too_many_arguments)]
async fn handle_incoming_frame<S, H>(
    bytes: &[u8],
    config: &Arc<Config>,
    key: &mut Option<SessionKey>,
    app: &S,
    ws_host: &H,
    outbound_tx: &mpsc::Sender<InnerMessage>,
    ws_conns: &mut HashMap<ConnectionId, WsConnSlot>,
    eph_tasks: &mut FuturesUnordered<rtask::task::LoggedRTask<()>>,
) -> Result<(), SessionError>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Error: std::fmt::Display,
    S::Future: Send,
    H: WsHost,
{
    let frame = Frame::decode(bytes)?;
    match frame {
        Frame::ServerKx(_) => Err(tunnel_wire::ProtocolError::UnexpectedFrame {
            frame: "server_kx",
        }
        .into()),

        Frame::ClientKx(ClientKx {
            sealed_symmetric_key,
        }) => {
            if key.is_some() {
                // spec.md §4.5: a second client_kx is ignored; the caller
                // logs and moves on rather than treating this as fatal.
                return Err(tunnel_wire::ProtocolError::DuplicateKeyInstall.into());
            }
            let opened = crypto::open(
                &config.x25519_secret,
                &config.x25519_public(),
                &sealed_symmetric_key,
            )?;
            let bytes: [u8; 32] = opened
                .try_into()
                .map_err(|_| tunnel_wire::CryptoError::SealedBoxOpenFailed)?;
            *key = Some(SessionKey::from_bytes(bytes));
            Ok(())
        }

        Frame::Enc(enc) => {
            let Some(k) = key.as_ref() else {
                return Err(tunnel_wire::ProtocolError::BeforeHandshake { frame: "enc" }.into());
            };
            let inner = tunnel_wire::decrypt_message(k, &enc)?;
            handle_inner_message(inner, config, app, ws_host, outbound_tx, ws_conns, eph_tasks)
                .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_inner_message<S, H>(
    inner: InnerMessage,
    config: &Arc<Config>,
    app: &S,
    ws_host: &H,
    outbound_tx: &mpsc::Sender<InnerMessage>,
    ws_conns: &mut HashMap<ConnectionId, WsConnSlot>,
    eph_tasks: &mut FuturesUnordered<rtask::task::LoggedRTask<()>>,
) -> Result<(), SessionError>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Error: std::fmt::Display,
    S::Future: Send,
    H: WsHost,
{
    match inner {
        InnerMessage::HttpRequest {
            request_id,
            method,
            url,
            headers,
            body,
        } => {
            let app = app.clone();
            let outbound_tx = outbound_tx.clone();
            let timeout = config.request_timeout;
            eph_tasks.push(
                RTask::spawn(format!("http-request-{request_id}"), async move {
                    let response = tokio::time::timeout(
                        timeout,
                        dispatch_http_request(app, request_id, &method, &url, &headers, body.as_deref()),
                    )
                    .await
                    .unwrap_or_else(|_| InnerMessage::HttpResponse {
                        request_id,
                        status: 504,
                        status_text: "Gateway Timeout".to_string(),
                        headers: Vec::new(),
                        body: None,
                        error: Some("host application did not respond in time".to_string()),
                    });
                    let _ = outbound_tx.send(response).await;
                })
                .logged(),
            );
            Ok(())
        }

        InnerMessage::HttpResponse { .. } => Err(tunnel_wire::ProtocolError::UnexpectedFrame {
            frame: "http_response",
        }
        .into()),

        InnerMessage::WsClientConnect {
            connection_id,
            url,
            protocols,
        } => {
            let protocols_slice = protocols.as_deref();
            match ws_host.accept(&url, protocols_slice).await {
                Ok(conn) => {
                    ws_conns.insert(
                        connection_id,
                        WsConnSlot {
                            inbound_tx: conn.inbound_tx,
                            state: WsConnState::Open,
                        },
                    );
                    let relay_outbound_tx = outbound_tx.clone();
                    eph_tasks.push(
                        RTask::spawn(
                            format!("ws-relay-{connection_id}"),
                            relay_host_to_client(connection_id, conn.outbound_rx, relay_outbound_tx),
                        )
                        .logged(),
                    );
                    let _ = outbound_tx
                        .send(InnerMessage::WsEvent {
                            connection_id,
                            event_type: tunnel_wire::message::WsEventType::Open,
                            code: None,
                            reason: None,
                            error: None,
                        })
                        .await;
                    Ok(())
                }
                Err(e) => {
                    let _ = outbound_tx
                        .send(InnerMessage::WsEvent {
                            connection_id,
                            event_type: tunnel_wire::message::WsEventType::Error,
                            code: None,
                            reason: None,
                            error: Some(e.to_string()),
                        })
                        .await;
                    Ok(())
                }
            }
        }

        InnerMessage::WsClientClose {
            connection_id,
            code,
            reason,
        } => {
            if let Some(slot) = ws_conns.remove(&connection_id) {
                let _ = slot.inbound_tx.send(WsFrame::Close { code, reason }).await;
            }
            Ok(())
        }

        InnerMessage::WsMessage {
            connection_id,
            data,
            data_type,
        } => {
            if let Some(slot) = ws_conns.get(&connection_id) {
                if !slot.state.accepts_messages() {
                    return Ok(());
                }
                let frame = match data_type {
                    tunnel_wire::message::WsDataType::String => WsFrame::Text(data),
                    tunnel_wire::message::WsDataType::Arraybuffer => {
                        use base64::Engine;
                        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(&data)
                        else {
                            return Ok(());
                        };
                        WsFrame::Binary(bytes)
                    }
                };
                let _ = slot.inbound_tx.send(frame).await;
            }
            Ok(())
        }

        InnerMessage::WsEvent { .. } => Err(tunnel_wire::ProtocolError::UnexpectedFrame {
            frame: "ws_event",
        }
        .into()),
    }
}

async fn relay_host_to_client(
    connection_id: ConnectionId,
    mut outbound_rx: mpsc::Receiver<WsFrame>,
    outbound_tx: mpsc::Sender<InnerMessage>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        let msg = match frame {
            WsFrame::Text(data) => InnerMessage::WsMessage {
                connection_id,
                data,
                data_type: tunnel_wire::message::WsDataType::String,
            },
            WsFrame::Binary(bytes) => {
                use base64::Engine;
                InnerMessage::WsMessage {
                    connection_id,
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                    data_type: tunnel_wire::message::WsDataType::Arraybuffer,
                }
            }
            WsFrame::Close { code, reason } => {
                let _ = outbound_tx
                    .send(InnerMessage::WsEvent {
                        connection_id,
                        event_type: tunnel_wire::message::WsEventType::Close,
                        code,
                        reason,
                        error: None,
                    })
                    .await;
                return;
            }
        };
        if outbound_tx.send(msg).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;
    use axum::{routing::get, Router};
    use rand_core::OsRng;
    use tunnel_wire::message::WsEventType;
    use x25519_dalek::StaticSecret;

    use super::*;
    use crate::ws_adapter::WsHostConnection;

    async fn echo_path_handler(uri: http::Uri) -> String {
        uri.path().to_string()
    }

    fn test_app() -> Router {
        Router::new().route("/{*path}", get(echo_path_handler))
    }

    fn test_config() -> Config {
        Config::new(StaticSecret::random_from_rng(OsRng))
    }

    struct AcceptingWsHost;

    #[async_trait]
    impl WsHost for AcceptingWsHost {
        async fn accept(
            &self,
            _url: &str,
            _protocols: Option<&[String]>,
        ) -> Result<WsHostConnection, SessionError> {
            let (inbound_tx, _inbound_rx) = mpsc::channel(8);
            let (_outbound_tx, outbound_rx) = mpsc::channel(8);
            Ok(WsHostConnection { inbound_tx, outbound_rx })
        }
    }

    struct RejectingWsHost;

    #[async_trait]
    impl WsHost for RejectingWsHost {
        async fn accept(
            &self,
            _url: &str,
            _protocols: Option<&[String]>,
        ) -> Result<WsHostConnection, SessionError> {
            Err(SessionError::Transport("no such route".to_string()))
        }
    }

    #[tokio::test]
    async fn concurrent_http_requests_multiplex_by_request_id() {
        let app = test_app();
        let ws_host = AcceptingWsHost;
        let config = Arc::new(test_config());
        let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
        let mut ws_conns = HashMap::new();
        let mut eph_tasks = FuturesUnordered::new();

        let first_id = tunnel_wire::RequestId::generate();
        let second_id = tunnel_wire::RequestId::generate();

        for (request_id, path) in [(first_id, "/a"), (second_id, "/b")] {
            handle_inner_message(
                InnerMessage::HttpRequest {
                    request_id,
                    method: "GET".to_string(),
                    url: path.to_string(),
                    headers: Vec::new(),
                    body: None,
                },
                &config,
                &app,
                &ws_host,
                &outbound_tx,
                &mut ws_conns,
                &mut eph_tasks,
            )
            .await
            .unwrap();
        }

        while eph_tasks.next().await.is_some() {}

        let mut seen = HashMap::new();
        for _ in 0..2 {
            let InnerMessage::HttpResponse { request_id, body, .. } =
                outbound_rx.recv().await.unwrap()
            else {
                panic!("expected HttpResponse");
            };
            seen.insert(request_id, body);
        }

        use base64::Engine;
        let decode = |b: Option<String>| {
            String::from_utf8(
                base64::engine::general_purpose::STANDARD
                    .decode(b.unwrap())
                    .unwrap(),
            )
            .unwrap()
        };
        assert_eq!(decode(seen.remove(&first_id).unwrap()), "/a");
        assert_eq!(decode(seen.remove(&second_id).unwrap()), "/b");
    }

    #[tokio::test]
    async fn ws_message_is_dropped_for_unknown_connection() {
        let app = test_app();
        let ws_host = AcceptingWsHost;
        let config = Arc::new(test_config());
        let (outbound_tx, _outbound_rx) = mpsc::channel(8);
        let mut ws_conns = HashMap::new();
        let mut eph_tasks = FuturesUnordered::new();

        // No matching `ws_client_connect` was ever processed, so this
        // message has nowhere to go and must not error.
        handle_inner_message(
            InnerMessage::WsMessage {
                connection_id: ConnectionId::generate(),
                data: "hello".to_string(),
                data_type: tunnel_wire::message::WsDataType::String,
            },
            &config,
            &app,
            &ws_host,
            &outbound_tx,
            &mut ws_conns,
            &mut eph_tasks,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn ws_client_connect_failure_emits_error_event_not_a_slot() {
        let app = test_app();
        let ws_host = RejectingWsHost;
        let config = Arc::new(test_config());
        let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
        let mut ws_conns = HashMap::new();
        let mut eph_tasks = FuturesUnordered::new();
        let connection_id = ConnectionId::generate();

        handle_inner_message(
            InnerMessage::WsClientConnect {
                connection_id,
                url: "/ws".to_string(),
                protocols: None,
            },
            &config,
            &app,
            &ws_host,
            &outbound_tx,
            &mut ws_conns,
            &mut eph_tasks,
        )
        .await
        .unwrap();

        assert!(ws_conns.is_empty());
        let InnerMessage::WsEvent { event_type, error, .. } = outbound_rx.recv().await.unwrap()
        else {
            panic!("expected WsEvent");
        };
        assert_eq!(event_type, WsEventType::Error);
        assert!(error.is_some());
    }
}
