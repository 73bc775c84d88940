//! Reliable Socket Client
//!
//! Turns an unreliable websocket connection into an acknowledged, correlated,
//! reconnecting request/response channel. Every outbound `msg` and `answer`
//! frame is tracked in a pending-ack table until the peer confirms it; every
//! `ask` is tracked in a pending-question table until the answer arrives. A
//! periodic sweep rejects entries past their deadline with a delivery failure
//! that names the original payload.
//!
//! Connection lifecycle: on open the client announces its [`Frame::Client`]
//! id and starts a keep-alive interval. A close that was not requested via
//! [`SocketClient::close`] is reported to the error handler and followed by a
//! reconnect after a fixed backoff. Both correlation tables survive the
//! reconnect; only the sweep abandons outstanding entries. An authorization
//! failure is terminal and stops the connection task for good.

use crate::error::{Result, TransportError};
use crate::frame::{Frame, KEEP_ALIVE};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Callback invoked with every transport-level error (socket closed, missing
/// acks, authorization failures). Supplied once at connect time.
pub type ErrorHandler = Arc<dyn Fn(TransportError) + Send + Sync>;

/// Callback invoked with every inbound `msg` frame: `(origin_id, question_id,
/// payload)`. The question id is the means to reply via
/// [`SocketClient::answer`] when the payload indicates a pending ask.
pub type MessageHandler = Arc<dyn Fn(String, Uuid, Value) + Send + Sync>;

/// Socket client configuration with the intervals the protocol relies on.
#[derive(Debug, Clone)]
pub struct SocketClientConfig {
    /// Relay (or peer) websocket URL, e.g. `ws://127.0.0.1:9000`
    pub url: String,
    /// Logical endpoint id announced to the relay
    pub client_id: String,
    /// Optional bearer token sent in the `Authorization` header on connect
    pub bearer_token: Option<String>,
    /// Default deadline for send/ask/answer when the caller gives none
    pub default_timeout: Duration,
    /// How often the correlation tables are swept for expired entries
    pub sweep_interval: Duration,
    /// How often a keep-alive no-op frame is transmitted
    pub keep_alive_interval: Duration,
    /// Fixed pause before a reconnect attempt after an unexpected close
    pub reconnect_backoff: Duration,
}

impl SocketClientConfig {
    pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            bearer_token: None,
            default_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(5),
            keep_alive_interval: Duration::from_secs(30),
            reconnect_backoff: Duration::from_millis(500),
        }
    }
}

/// One outstanding correlation table entry
struct Pending<T> {
    deadline: Instant,
    reply: oneshot::Sender<Result<T>>,
}

struct ClientInner {
    config: SocketClientConfig,
    /// Frames queued for the connection task; buffered across reconnects
    outbound: mpsc::UnboundedSender<WsMessage>,
    /// Outstanding acknowledgements we are waiting for, by frame id
    acks: Mutex<HashMap<Uuid, Pending<()>>>,
    /// Open questions we still need answers for, by question frame id
    questions: Mutex<HashMap<Uuid, Pending<Value>>>,
    /// Original payloads of in-flight frames, retained for delivery errors
    pending_payloads: Mutex<HashMap<Uuid, Value>>,
    on_error: ErrorHandler,
    on_message: Mutex<Option<MessageHandler>>,
    closed: AtomicBool,
}

/// Reliable point-to-point messaging client over a websocket connection.
#[derive(Clone)]
pub struct SocketClient {
    inner: Arc<ClientInner>,
}

impl SocketClient {
    /// Connect to the relay and start the connection and sweep tasks.
    ///
    /// The first connection attempt happens inline so that terminal errors
    /// (an authorization failure in particular) propagate to the caller and
    /// abort startup. Later disconnects are handled by the reconnect loop.
    pub async fn connect(config: SocketClientConfig, on_error: ErrorHandler) -> Result<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            config,
            outbound,
            acks: Mutex::new(HashMap::new()),
            questions: Mutex::new(HashMap::new()),
            pending_payloads: Mutex::new(HashMap::new()),
            on_error,
            on_message: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let ws = open_socket(&inner.config).await?;
        info!(
            client_id = %inner.config.client_id,
            url = %inner.config.url,
            "Connection to relay established"
        );

        tokio::spawn(connection_task(Arc::clone(&inner), ws, outbound_rx));
        tokio::spawn(sweep_task(Arc::clone(&inner)));

        Ok(Self { inner })
    }

    /// Install the callback for inbound `msg` frames. Frames arriving before
    /// a handler is installed are dropped with a diagnostic.
    pub fn set_message_handler(&self, handler: MessageHandler) {
        *self.inner.on_message.lock() = Some(handler);
    }

    /// This client's announced endpoint id
    pub fn client_id(&self) -> &str {
        &self.inner.config.client_id
    }

    /// Default deadline used when callers pass no explicit timeout
    pub fn default_timeout(&self) -> Duration {
        self.inner.config.default_timeout
    }

    /// Send a payload to the given target; resolves when the matching ack
    /// arrives, fails with a delivery error if none arrives in time.
    pub async fn send(&self, target_id: &str, payload: Value, timeout: Duration) -> Result<()> {
        let id = Uuid::new_v4();
        let frame = Frame::Msg {
            id,
            origin_id: self.inner.config.client_id.clone(),
            target_id: target_id.to_string(),
            payload: payload.clone(),
        };
        let rx = self.inner.track_ack(id, payload, timeout);
        self.inner.transmit(&frame)?;
        await_settlement(rx).await
    }

    /// Ask a question: like [`send`](Self::send) but resolves with the answer
    /// payload instead of the ack.
    pub async fn ask(&self, target_id: &str, payload: Value, timeout: Duration) -> Result<Value> {
        let id = Uuid::new_v4();
        let frame = Frame::Msg {
            id,
            origin_id: self.inner.config.client_id.clone(),
            target_id: target_id.to_string(),
            payload: payload.clone(),
        };
        let (tx, rx) = oneshot::channel();
        self.inner.questions.lock().insert(
            id,
            Pending {
                deadline: Instant::now() + timeout,
                reply: tx,
            },
        );
        self.inner.pending_payloads.lock().insert(id, payload);
        self.inner.transmit(&frame)?;
        await_settlement(rx).await
    }

    /// Transmit the answer for a previously received question. Answers are
    /// acknowledged like ordinary messages.
    pub async fn answer(
        &self,
        target_id: &str,
        question_id: Uuid,
        payload: Value,
        timeout: Duration,
    ) -> Result<()> {
        let id = Uuid::new_v4();
        let frame = Frame::Answer {
            id,
            origin_id: self.inner.config.client_id.clone(),
            target_id: target_id.to_string(),
            question_id,
            payload: payload.clone(),
        };
        let rx = self.inner.track_ack(id, payload, timeout);
        self.inner.transmit(&frame)?;
        await_settlement(rx).await
    }

    /// Close the connection for good. No reconnection is attempted.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let _ = self.inner.outbound.send(WsMessage::Close(None));
    }
}

/// Await a correlation settlement; a dropped sender means the client was
/// closed while the entry was outstanding.
async fn await_settlement<T>(rx: oneshot::Receiver<Result<T>>) -> Result<T> {
    rx.await
        .map_err(|_| TransportError::connection("socket client closed"))?
}

impl ClientInner {
    fn track_ack(&self, id: Uuid, payload: Value, timeout: Duration) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        self.acks.lock().insert(
            id,
            Pending {
                deadline: Instant::now() + timeout,
                reply: tx,
            },
        );
        self.pending_payloads.lock().insert(id, payload);
        rx
    }

    fn transmit(&self, frame: &Frame) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.outbound
            .send(WsMessage::Text(text))
            .map_err(|_| TransportError::connection("socket client closed"))
    }

    /// Process one inbound text frame.
    fn handle_text(&self, text: &str) {
        if text == KEEP_ALIVE {
            return;
        }
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Received unknown message over websocket, ignoring it");
                return;
            }
        };
        match &frame {
            Frame::Msg {
                id,
                origin_id,
                payload,
                ..
            } => {
                if let Some(ack) = Frame::ack_for(&frame) {
                    let _ = self.transmit(&ack);
                }
                let handler = self.on_message.lock().clone();
                match handler {
                    Some(on_message) => on_message(origin_id.clone(), *id, payload.clone()),
                    None => debug!(origin_id = %origin_id, "No message handler installed, dropping frame"),
                }
            }
            Frame::Ack { id, .. } => {
                // A duplicate ack for an already settled id is a no-op.
                match self.acks.lock().remove(id) {
                    Some(pending) => {
                        let _ = pending.reply.send(Ok(()));
                        self.pending_payloads.lock().remove(id);
                    }
                    None => debug!(id = %id, "Ack for unknown or already settled id"),
                }
            }
            Frame::Answer {
                question_id,
                payload,
                ..
            } => {
                if let Some(pending) = self.questions.lock().remove(question_id) {
                    let _ = pending.reply.send(Ok(payload.clone()));
                    self.pending_payloads.lock().remove(question_id);
                } else {
                    debug!(question_id = %question_id, "Answer for unknown or already settled question");
                }
                if let Some(ack) = Frame::ack_for(&frame) {
                    let _ = self.transmit(&ack);
                }
            }
            Frame::Client { client_id } => {
                debug!(client_id = %client_id, "Ignoring client announcement on a client connection");
            }
        }
    }

    /// Reject every correlation entry whose deadline has passed.
    fn sweep(&self) {
        let now = Instant::now();

        let expired_acks: Vec<(Uuid, Pending<()>)> = {
            let mut acks = self.acks.lock();
            let ids: Vec<Uuid> = acks
                .iter()
                .filter(|(_, p)| p.deadline < now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| acks.remove(&id).map(|p| (id, p)))
                .collect()
        };
        for (id, pending) in expired_acks {
            let payload = self
                .pending_payloads
                .lock()
                .remove(&id)
                .unwrap_or(Value::Null);
            let reason = format!("ACK for message {id} is missing");
            (self.on_error)(TransportError::delivery(reason.clone(), payload.clone()));
            let _ = pending.reply.send(Err(TransportError::delivery(reason, payload)));
        }

        let expired_questions: Vec<(Uuid, Pending<Value>)> = {
            let mut questions = self.questions.lock();
            let ids: Vec<Uuid> = questions
                .iter()
                .filter(|(_, p)| p.deadline < now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| questions.remove(&id).map(|p| (id, p)))
                .collect()
        };
        for (id, pending) in expired_questions {
            let payload = self
                .pending_payloads
                .lock()
                .remove(&id)
                .unwrap_or(Value::Null);
            let reason = format!("Answer for message {id} is missing");
            (self.on_error)(TransportError::delivery(reason.clone(), payload.clone()));
            let _ = pending.reply.send(Err(TransportError::delivery(reason, payload)));
        }
    }
}

/// Open one websocket connection, mapping an HTTP 401 to the terminal
/// authorization error.
async fn open_socket(config: &SocketClientConfig) -> Result<WsStream> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::connection(format!("invalid websocket url: {e}")))?;
    if let Some(token) = &config.bearer_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::connection(format!("invalid bearer token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    match connect_async(request).await {
        Ok((ws, _response)) => Ok(ws),
        Err(tokio_tungstenite::tungstenite::Error::Http(response))
            if response.status().as_u16() == 401 =>
        {
            Err(TransportError::Authorization)
        }
        Err(e) => Err(TransportError::connection(e.to_string())),
    }
}

/// Owns the websocket: writes queued frames, reads inbound ones, sends
/// keep-alives, and reconnects with a fixed backoff on unexpected close.
async fn connection_task(
    inner: Arc<ClientInner>,
    mut ws: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<WsMessage>,
) {
    loop {
        // Announce who we are before anything else travels on this socket.
        let announce = Frame::Client {
            client_id: inner.config.client_id.clone(),
        };
        match serde_json::to_string(&announce) {
            Ok(text) => {
                if ws.send(WsMessage::Text(text)).await.is_err() {
                    warn!("Failed to announce client id, reconnecting");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize client announcement"),
        }

        let mut keep_alive = tokio::time::interval(inner.config.keep_alive_interval);
        keep_alive.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                queued = outbound_rx.recv() => match queued {
                    Some(message) => {
                        if ws.send(message).await.is_err() {
                            break;
                        }
                    }
                    None => return,
                },
                _ = keep_alive.tick() => {
                    if ws.send(WsMessage::Text(KEEP_ALIVE.to_string())).await.is_err() {
                        break;
                    }
                }
                incoming = ws.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => inner.handle_text(&text),
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        if let Ok(text) = String::from_utf8(bytes) {
                            inner.handle_text(&text);
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong handled by tungstenite
                    Some(Err(e)) => {
                        warn!(error = %e, "Error on websocket");
                        break;
                    }
                }
            }

            if inner.closed.load(Ordering::SeqCst) {
                let _ = ws.close(None).await;
                return;
            }
        }

        if inner.closed.load(Ordering::SeqCst) {
            return;
        }

        // Not caller-initiated: report and reestablish. Correlation tables
        // stay as they are; the sweep alone abandons outstanding entries.
        let closed_err = TransportError::socket_closed(
            &inner.config.client_id,
            "socket to relay was closed, trying to reestablish it",
        );
        warn!(client_id = %inner.config.client_id, "{closed_err}");
        (inner.on_error)(closed_err);

        loop {
            tokio::time::sleep(inner.config.reconnect_backoff).await;
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            match open_socket(&inner.config).await {
                Ok(new_ws) => {
                    info!(client_id = %inner.config.client_id, "Reconnected to relay");
                    ws = new_ws;
                    break;
                }
                Err(TransportError::Authorization) => {
                    error!("Websocket authorization failed, giving up on reconnection");
                    (inner.on_error)(TransportError::Authorization);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Reconnect attempt failed");
                }
            }
        }
    }
}

/// Periodically rejects expired correlation entries.
async fn sweep_task(inner: Arc<ClientInner>) {
    let mut interval = tokio::time::interval(inner.config.sweep_interval);
    interval.tick().await;
    loop {
        interval.tick().await;
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        inner.sweep();
    }
}
