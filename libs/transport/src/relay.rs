//! Message Relay
//!
//! Hub server that multiplexes many socket clients when no direct
//! node-to-node connection is available. Each client announces itself with a
//! [`Frame::Client`] frame; every other frame is forwarded verbatim to the
//! socket registered under its target id. Unknown targets are dropped with a
//! diagnostic, never retried here: retry is the sending client's
//! responsibility via its own ack timeout.
//!
//! A relay bound with [`MessageRelay::bind_with_token`] validates the
//! `Authorization` header during the websocket handshake and rejects anything
//! else with HTTP 401, which clients treat as terminal.

use crate::error::{Result, TransportError};
use crate::frame::{Frame, KEEP_ALIVE};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

type SocketRegistry = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<WsMessage>>>>;
type ConnectionTasks = Arc<parking_lot::Mutex<Vec<JoinHandle<()>>>>;

/// Websocket relay that forwards frames between registered clients by id.
pub struct MessageRelay {
    local_addr: SocketAddr,
    sockets: SocketRegistry,
    accept_handle: JoinHandle<()>,
    connections: ConnectionTasks,
}

impl MessageRelay {
    /// Bind the relay to the given address and start accepting clients.
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_inner(addr, None).await
    }

    /// Bind a relay that only accepts handshakes carrying `Authorization:
    /// Bearer <token>`; everything else is rejected with HTTP 401.
    pub async fn bind_with_token(addr: &str, token: impl Into<String>) -> Result<Self> {
        Self::bind_inner(addr, Some(token.into())).await
    }

    async fn bind_inner(addr: &str, expected_token: Option<String>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::connection(e.to_string()))?;
        let sockets: SocketRegistry = Arc::new(RwLock::new(HashMap::new()));
        let connections: ConnectionTasks = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let accept_handle = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&sockets),
            Arc::clone(&connections),
            expected_token,
        ));
        info!(%local_addr, "Message relay ready");
        Ok(Self {
            local_addr,
            sockets,
            accept_handle,
            connections,
        })
    }

    /// Address the relay is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Websocket URL clients should connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Number of currently registered clients
    pub async fn client_count(&self) -> usize {
        self.sockets.read().await.len()
    }

    /// Close the relay: wait a bounded number of attempts for clients to
    /// disconnect gracefully, then sever whatever is still connected and
    /// release the listening port.
    pub async fn close(self) {
        info!("Relay is waiting for clients to shut down gracefully");
        for _ in 0..5 {
            if self.sockets.read().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        self.accept_handle.abort();
        let _ = self.accept_handle.await;
        let connections: Vec<JoinHandle<()>> = self.connections.lock().drain(..).collect();
        for task in connections {
            task.abort();
            let _ = task.await;
        }
        self.sockets.write().await.clear();
    }
}

async fn accept_loop(
    listener: TcpListener,
    sockets: SocketRegistry,
    connections: ConnectionTasks,
    expected_token: Option<String>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Relay accept failed");
                continue;
            }
        };
        debug!(%peer, "Got new connection");
        let sockets = Arc::clone(&sockets);
        let token = expected_token.clone();
        let handle = tokio::spawn(async move {
            match accept_connection(stream, token).await {
                Ok(ws) => serve_connection(ws, sockets).await,
                Err(e) => warn!(%peer, error = %e, "Websocket handshake failed"),
            }
        });
        connections.lock().push(handle);
    }
}

/// Websocket handshake, rejecting with HTTP 401 unless the expected bearer
/// token (when one is configured) is presented.
async fn accept_connection(
    stream: TcpStream,
    expected_token: Option<String>,
) -> std::result::Result<WebSocketStream<TcpStream>, tokio_tungstenite::tungstenite::Error> {
    accept_hdr_async(stream, move |request: &Request, response: Response| {
        let Some(expected) = &expected_token else {
            return Ok(response);
        };
        let authorized = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value == format!("Bearer {expected}"))
            .unwrap_or(false);
        if authorized {
            Ok(response)
        } else {
            warn!("Rejecting handshake without a valid bearer token");
            let mut deny = ErrorResponse::new(None);
            *deny.status_mut() = StatusCode::UNAUTHORIZED;
            Err(deny)
        }
    })
    .await
}

async fn serve_connection(ws: WebSocketStream<TcpStream>, sockets: SocketRegistry) {
    let (mut sink, mut stream) = ws.split();
    // Frames forwarded from other connections land here.
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    // Which client id this socket announced, if any. Needed to deregister.
    let mut registered: Option<String> = None;

    loop {
        tokio::select! {
            forwarded = rx.recv() => match forwarded {
                Some(message) => {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            item = stream.next() => {
                let Some(item) = item else { break };
                let text = match item {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("Discarding non-utf8 relay frame");
                            continue;
                        }
                    },
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => continue, // ping/pong
                };
                if text == KEEP_ALIVE {
                    continue;
                }

                match serde_json::from_str::<Frame>(&text) {
                    Ok(Frame::Client { client_id }) => {
                        info!(client_id = %client_id, "Got new client");
                        sockets.write().await.insert(client_id.clone(), tx.clone());
                        registered = Some(client_id);
                    }
                    Ok(frame) => {
                        let target_id = frame.target_id().unwrap_or_default();
                        let forwarded = sockets
                            .read()
                            .await
                            .get(target_id)
                            // Forward the original text verbatim, never a re-encoding.
                            .map(|out| out.send(WsMessage::Text(text.clone())));
                        match forwarded {
                            Some(Ok(())) => {}
                            Some(Err(_)) | None => {
                                let err = TransportError::unknown_target(target_id);
                                error!(target_id = %target_id, "{err}");
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "Discarding unparseable relay frame"),
                }
            }
        }
    }

    if let Some(client_id) = registered {
        sockets.write().await.remove(&client_id);
        debug!(client_id = %client_id, "Socket closed");
    }
}
