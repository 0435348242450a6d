//! The node-side control socket: connects, verifies the server's quote,
//! completes the handshake, and supervises reconnection
//! (`spec.md` §4.5, §5).

use std::{collections::HashMap, sync::Arc, time::Duration, time::SystemTime};

use futures::{SinkExt, StreamExt};
use qvl::{ParsedQuote, TcbPolicy, VerifyConfig};
use rtask::{NotifyOnce, RTask};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsWireMessage;
use tracing::{debug, info, warn};
use tunnel_wire::{
    envelope::{ClientKx, ServerKx},
    ids::{ConnectionId, RequestId},
    message::{HeaderList, InnerMessage, WsDataType, WsEventType},
    crypto, Frame, SessionKey,
};
use x25519_dalek::PublicKey;

use crate::{
    config::Config,
    error::ClientError,
    fetch::{FetchRequest, FetchResponse},
    policy::MeasurementPolicy,
    ws::{WsClientEvent, WsCommand, WsConnectRequest, WsHandle},
};

const FETCH_CHANNEL_SIZE: usize = 64;
const WS_CONNECT_CHANNEL_SIZE: usize = 16;
const WS_EVENT_CHANNEL_SIZE: usize = 64;
const WS_COMMAND_CHANNEL_SIZE: usize = 64;

/// A handle to a background task that owns one reconnecting control
/// socket. Cloning shares the same underlying connection.
#[derive(Clone)]
pub struct TunnelClient {
    fetch_tx: mpsc::Sender<FetchRequest>,
    ws_connect_tx: mpsc::Sender<WsConnectRequest>,
}

impl TunnelClient {
    /// Spawns the supervising task and returns a handle plus its
    /// [`RTask`]. The task reconnects indefinitely (per `spec.md` §5)
    /// until `shutdown` fires; join the returned task to observe panics.
    pub fn connect(
        url: String,
        config: Arc<Config>,
        measurement_policy: Arc<dyn MeasurementPolicy>,
        tcb_policy: Arc<dyn TcbPolicy>,
        shutdown: NotifyOnce,
    ) -> (Self, RTask<()>) {
        let (fetch_tx, fetch_rx) = mpsc::channel(FETCH_CHANNEL_SIZE);
        let (ws_connect_tx, ws_connect_rx) = mpsc::channel(WS_CONNECT_CHANNEL_SIZE);

        let task = RTask::spawn(
            "tunnel-client-supervisor",
            supervise(url, config, measurement_policy, tcb_policy, fetch_rx, ws_connect_rx, shutdown),
        );

        (Self { fetch_tx, ws_connect_tx }, task)
    }

    /// Sends a tunneled HTTP request and awaits its response.
    ///
    /// Per `spec.md` §4.6: resolves with the response, or rejects on
    /// application error (surfaced as an `Err` carrying the message) or
    /// on the 30 s request timeout.
    pub async fn fetch(
        &self,
        method: impl Into<String>,
        url: impl Into<String>,
        headers: HeaderList,
        body: Option<String>,
    ) -> Result<FetchResponse, ClientError> {
        let (responder, receiver) = oneshot::channel();
        let request = FetchRequest {
            method: method.into(),
            url: url.into(),
            headers,
            body,
            responder,
        };
        self.fetch_tx
            .send(request)
            .await
            .map_err(|_| ClientError::Disconnected)?;
        receiver.await.map_err(|_| ClientError::Disconnected)?
    }

    /// Opens a tunneled WebSocket sub-connection and waits for it to
    /// reach `OPEN` (or fail) per `spec.md` §4.7's state machine.
    pub async fn connect_ws(
        &self,
        url: impl Into<String>,
        protocols: Option<Vec<String>>,
    ) -> Result<WsHandle, ClientError> {
        let (responder, receiver) = oneshot::channel();
        let request = WsConnectRequest { url: url.into(), protocols, responder };
        self.ws_connect_tx
            .send(request)
            .await
            .map_err(|_| ClientError::Disconnected)?;
        receiver.await.map_err(|_| ClientError::Disconnected)?
    }
}

async fn supervise(
    url: String,
    config: Arc<Config>,
    measurement_policy: Arc<dyn MeasurementPolicy>,
    tcb_policy: Arc<dyn TcbPolicy>,
    mut fetch_rx: mpsc::Receiver<FetchRequest>,
    mut ws_connect_rx: mpsc::Receiver<WsConnectRequest>,
    mut shutdown: NotifyOnce,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.recv() => return,
            result = run_one_generation(
                &url,
                &config,
                measurement_policy.as_ref(),
                tcb_policy.as_ref(),
                &mut fetch_rx,
                &mut ws_connect_rx,
            ) => {
                match result {
                    Ok(()) => debug!("tunnel control socket closed cleanly"),
                    Err(e) => warn!(error = %e, "tunnel control socket failed"),
                }
            }
        }

        if shutdown.try_recv() {
            return;
        }
        tokio::select! {
            biased;
            () = shutdown.recv() => return,
            () = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
}

struct PendingWs {
    responder: oneshot::Sender<Result<WsHandle, ClientError>>,
    event_tx: mpsc::Sender<WsClientEvent>,
    event_rx: Option<mpsc::Receiver<WsClientEvent>>,
    command_tx: mpsc::Sender<(ConnectionId, WsCommand)>,
}

/// Runs one connection's handshake and frame loop to completion. Returns
/// `Ok(())` on a clean close, `Err` on any handshake or transport failure.
/// Always fails every waiter registered against this generation before
/// returning, per `spec.md` §5's "existing waiters from the prior session
/// are failed".
async fn run_one_generation(
    url: &str,
    config: &Config,
    measurement_policy: &dyn MeasurementPolicy,
    tcb_policy: &dyn TcbPolicy,
    fetch_rx: &mut mpsc::Receiver<FetchRequest>,
    ws_connect_rx: &mut mpsc::Receiver<WsConnectRequest>,
) -> Result<(), ClientError> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    let server_kx = recv_frame(&mut read).await?;
    let Frame::ServerKx(ServerKx { x25519_public_key, quote }) = server_kx else {
        return Err(tunnel_wire::ProtocolError::UnexpectedFrame { frame: "client_kx|enc" }.into());
    };

    let parsed_quote =
        qvl::parse_quote(&quote).map_err(|e| ClientError::Attestation(e.to_string()))?;
    let verify_config = VerifyConfig {
        now: SystemTime::now(),
        pinned_roots: &config.pinned_roots,
        crls: &config.crls,
    };
    qvl::verify_quote(&parsed_quote, &quote, &verify_config, tcb_policy)
        .map_err(|e| ClientError::Attestation(e.to_string()))?;
    if !measurement_policy.matches(&parsed_quote) {
        return Err(ClientError::Attestation(
            "quote measurements rejected by client policy".to_string(),
        ));
    }
    info!("tunnel quote verified, completing handshake");

    let server_pub = PublicKey::from(x25519_public_key);
    let session_key = SessionKey::generate();
    let sealed = crypto::seal(&server_pub, session_key.as_bytes());
    send_frame(&mut write, &Frame::ClientKx(ClientKx { sealed_symmetric_key: sealed })).await?;

    let mut pending_http: HashMap<RequestId, (oneshot::Sender<Result<FetchResponse, ClientError>>, RTask<()>)> =
        HashMap::new();
    let mut pending_ws_connect: HashMap<ConnectionId, PendingWs> = HashMap::new();
    let mut ws_event_txs: HashMap<ConnectionId, mpsc::Sender<WsClientEvent>> = HashMap::new();
    let (timeout_tx, mut timeout_rx) = mpsc::channel::<RequestId>(FETCH_CHANNEL_SIZE);
    let (ws_cmd_tx, mut ws_cmd_rx) = mpsc::channel::<(ConnectionId, WsCommand)>(WS_COMMAND_CHANNEL_SIZE);

    let result = loop {
        tokio::select! {
            biased;

            maybe_msg = read.next() => {
                match maybe_msg {
                    None => break Ok(()),
                    Some(Err(e)) => break Err(ClientError::Transport(e.to_string())),
                    Some(Ok(WsWireMessage::Close(_))) => break Ok(()),
                    Some(Ok(WsWireMessage::Binary(bytes))) => {
                        if let Err(e) = handle_inbound(
                            &bytes,
                            &session_key,
                            &mut pending_http,
                            &mut pending_ws_connect,
                            &mut ws_event_txs,
                        ).await {
                            warn!(error = %e, "dropping malformed frame from server");
                        }
                    }
                    Some(Ok(_)) => {}
                }
            }

            Some(req) = fetch_rx.recv() => {
                let request_id = RequestId::generate();
                let msg = InnerMessage::HttpRequest {
                    request_id,
                    method: req.method,
                    url: req.url,
                    headers: req.headers,
                    body: req.body,
                };
                if let Err(e) = send_enc(&mut write, &session_key, &msg).await {
                    let _ = req.responder.send(Err(e));
                    continue;
                }
                let timeout_tx = timeout_tx.clone();
                let timeout = config.request_timeout;
                let ticker = RTask::spawn_unnamed(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = timeout_tx.send(request_id).await;
                });
                pending_http.insert(request_id, (req.responder, ticker));
            }

            Some(request_id) = timeout_rx.recv() => {
                if let Some((responder, _ticker)) = pending_http.remove(&request_id) {
                    let _ = responder.send(Err(ClientError::RequestTimeout));
                }
            }

            Some(connect_req) = ws_connect_rx.recv() => {
                let connection_id = ConnectionId::generate();
                let msg = InnerMessage::WsClientConnect {
                    connection_id,
                    url: connect_req.url,
                    protocols: connect_req.protocols,
                };
                if let Err(e) = send_enc(&mut write, &session_key, &msg).await {
                    let _ = connect_req.responder.send(Err(e));
                    continue;
                }
                let (event_tx, event_rx) = mpsc::channel(WS_EVENT_CHANNEL_SIZE);
                pending_ws_connect.insert(connection_id, PendingWs {
                    responder: connect_req.responder,
                    event_tx,
                    event_rx: Some(event_rx),
                    command_tx: ws_cmd_tx.clone(),
                });
            }

            Some((connection_id, command)) = ws_cmd_rx.recv() => {
                if !ws_event_txs.contains_key(&connection_id) {
                    continue;
                }
                let msg = match command {
                    WsCommand::SendText(data) => InnerMessage::WsMessage {
                        connection_id,
                        data,
                        data_type: WsDataType::String,
                    },
                    WsCommand::SendBinary(bytes) => {
                        use base64::Engine;
                        InnerMessage::WsMessage {
                            connection_id,
                            data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                            data_type: WsDataType::Arraybuffer,
                        }
                    }
                    WsCommand::Close { code, reason } => {
                        ws_event_txs.remove(&connection_id);
                        InnerMessage::WsClientClose { connection_id, code, reason }
                    }
                };
                if let Err(e) = send_enc(&mut write, &session_key, &msg).await {
                    warn!(error = %e, "failed to send ws command");
                }
            }
        }
    };

    for (_, (responder, ticker)) in pending_http.drain() {
        let _ = responder.send(Err(ClientError::Disconnected));
        ticker.detach();
    }
    for (_, pending) in pending_ws_connect.drain() {
        let _ = pending.responder.send(Err(ClientError::Disconnected));
    }
    for (_, event_tx) in ws_event_txs.drain() {
        let _ = event_tx
            .send(WsClientEvent::Close { code: Some(1006), reason: None })
            .await;
    }

    result
}

async fn handle_inbound(
    bytes: &[u8],
    session_key: &SessionKey,
    pending_http: &mut HashMap<RequestId, (oneshot::Sender<Result<FetchResponse, ClientError>>, RTask<()>)>,
    pending_ws_connect: &mut HashMap<ConnectionId, PendingWs>,
    ws_event_txs: &mut HashMap<ConnectionId, mpsc::Sender<WsClientEvent>>,
) -> Result<(), ClientError> {
    let frame = Frame::decode(bytes)?;
    let Frame::Enc(enc) = frame else {
        return Err(tunnel_wire::ProtocolError::UnexpectedFrame { frame: "server_kx|client_kx" }.into());
    };
    let inner = tunnel_wire::decrypt_message(session_key, &enc)?;

    match inner {
        InnerMessage::HttpResponse { request_id, status, status_text, headers, body, error } => {
            if let Some((responder, ticker)) = pending_http.remove(&request_id) {
                ticker.detach();
                let result = match error {
                    Some(msg) => Err(ClientError::Transport(msg)),
                    None => Ok(FetchResponse { status, status_text, headers, body }),
                };
                let _ = responder.send(result);
            }
            Ok(())
        }

        InnerMessage::WsEvent { connection_id, event_type, code, reason, error } => {
            match event_type {
                WsEventType::Open => {
                    if let Some(pending) = pending_ws_connect.remove(&connection_id) {
                        let handle = WsHandle {
                            command_tx: pending.command_tx,
                            events: pending.event_rx.expect("set at insertion"),
                        };
                        ws_event_txs.insert(connection_id, pending.event_tx);
                        let _ = pending.responder.send(Ok(handle));
                    } else if let Some(tx) = ws_event_txs.get(&connection_id) {
                        let _ = tx.send(WsClientEvent::Open).await;
                    }
                    Ok(())
                }
                WsEventType::Error => {
                    let message = error.unwrap_or_else(|| "ws connection error".to_string());
                    if let Some(pending) = pending_ws_connect.remove(&connection_id) {
                        let _ = pending.responder.send(Err(ClientError::Transport(message)));
                    } else if let Some(tx) = ws_event_txs.remove(&connection_id) {
                        let _ = tx.send(WsClientEvent::Error(message)).await;
                    }
                    Ok(())
                }
                WsEventType::Close => {
                    if let Some(tx) = ws_event_txs.remove(&connection_id) {
                        let _ = tx.send(WsClientEvent::Close { code, reason }).await;
                    } else if let Some(pending) = pending_ws_connect.remove(&connection_id) {
                        let _ = pending.responder.send(Err(ClientError::Disconnected));
                    }
                    Ok(())
                }
            }
        }

        InnerMessage::WsMessage { connection_id, data, data_type } => {
            if let Some(tx) = ws_event_txs.get(&connection_id) {
                let event = match data_type {
                    WsDataType::String => WsClientEvent::Text(data),
                    WsDataType::Arraybuffer => {
                        use base64::Engine;
                        match base64::engine::general_purpose::STANDARD.decode(&data) {
                            Ok(bytes) => WsClientEvent::Binary(bytes),
                            Err(_) => return Ok(()),
                        }
                    }
                };
                let _ = tx.send(event).await;
            }
            Ok(())
        }

        InnerMessage::HttpRequest { .. }
        | InnerMessage::WsClientConnect { .. }
        | InnerMessage::WsClientClose { .. } => {
            Err(tunnel_wire::ProtocolError::UnexpectedFrame { frame: inner.kind() }.into())
        }
    }
}

type WriteHalf = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsWireMessage,
>;
type ReadHalf = futures::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

async fn recv_frame(read: &mut ReadHalf) -> Result<Frame, ClientError> {
    loop {
        match read.next().await {
            Some(Ok(WsWireMessage::Binary(bytes))) => return Ok(Frame::decode(&bytes)?),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
            None => return Err(ClientError::Disconnected),
        }
    }
}

async fn send_frame(write: &mut WriteHalf, frame: &Frame) -> Result<(), ClientError> {
    let bytes = frame.encode()?;
    write
        .send(WsWireMessage::Binary(bytes.into()))
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))
}

async fn send_enc(
    write: &mut WriteHalf,
    key: &SessionKey,
    msg: &InnerMessage,
) -> Result<(), ClientError> {
    let frame = tunnel_wire::encrypt_message(key, msg)?;
    send_frame(write, &frame).await
}
