//! Distributor Abstraction
//!
//! The pluggable seam between a local actor system and whatever carries its
//! envelopes to other nodes. A distributed actor system only ever talks to
//! this trait; [`WebsocketDistributor`] is the relay-backed implementation.
//!
//! Channel naming: the `actors://` scheme prefix is stripped from the target
//! actor URI and path separators become dots, so `actors://nodeB/worker`
//! travels on channel `nodeB.worker`. When addressing the relay, only the
//! first segment (the destination node name) matters.

use crate::client::{ErrorHandler, MessageHandler, SocketClient, SocketClientConfig};
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// URI scheme used by actor names
pub const URI_SCHEME: &str = "actors://";

/// JSON-serializable envelope as it travels between nodes. `ask_timeout > 0`
/// means the receiving side is expected to eventually transmit a correlated
/// reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    pub from: String,
    pub to: String,
    pub message: Value,
    pub ask_timeout: u64,
}

/// Derive the transport channel for an actor URI:
/// `actors://nodeB/worker` becomes `nodeB.worker`.
pub fn channel_for(actor_uri: &str) -> String {
    actor_uri
        .strip_prefix(URI_SCHEME)
        .unwrap_or(actor_uri)
        .replace('/', ".")
}

/// First channel segment: the destination node name the relay routes by.
fn relay_target(channel: &str) -> &str {
    channel.split('.').next().unwrap_or(channel)
}

/// Handle that lets the receiving side answer a remote question.
#[derive(Clone)]
pub struct AnswerHandle {
    client: SocketClient,
    origin_id: String,
    question_id: Uuid,
}

impl AnswerHandle {
    /// Transmit the answer back to the asking node. The answer is itself
    /// acknowledged like an ordinary message.
    pub async fn answer(&self, payload: Value) -> Result<()> {
        let timeout = self.client.default_timeout();
        self.client
            .answer(&self.origin_id, self.question_id, payload, timeout)
            .await
    }

    pub fn question_id(&self) -> Uuid {
        self.question_id
    }
}

/// Callback receiving inbound wire envelopes. The [`AnswerHandle`] is present
/// exactly when the envelope carries an ask.
pub type EnvelopeHandler = Arc<dyn Fn(WireEnvelope, Option<AnswerHandle>) + Send + Sync>;

/// Transport abstraction for distributed actor systems.
#[async_trait]
pub trait Distributor: Send + Sync + 'static {
    /// Connect to the transport. Terminal errors (authorization in
    /// particular) must propagate to the caller so startup can abort.
    async fn connect(&self, on_error: ErrorHandler) -> Result<()>;

    /// Disconnect from the transport; no further inbound envelopes are
    /// delivered afterwards.
    async fn disconnect(&self) -> Result<()>;

    /// Install the callback for envelopes originated on other nodes.
    async fn subscribe(&self, on_envelope: EnvelopeHandler) -> Result<()>;

    /// Ship a fire-and-forget envelope; resolves once delivery is
    /// acknowledged.
    async fn send(&self, channel: &str, envelope: WireEnvelope) -> Result<()>;

    /// Ship an envelope carrying an ask; resolves with the answer payload.
    async fn ask(&self, channel: &str, envelope: WireEnvelope) -> Result<Value>;
}

/// [`Distributor`] implementation over a [`SocketClient`] talking to a
/// [`MessageRelay`](crate::relay::MessageRelay).
pub struct WebsocketDistributor {
    config: SocketClientConfig,
    client: RwLock<Option<SocketClient>>,
}

impl WebsocketDistributor {
    /// Distributor for the given system name, connecting to the relay at
    /// `relay_url`. The system name doubles as the relay client id.
    pub fn new(system_name: impl Into<String>, relay_url: impl Into<String>) -> Self {
        Self::with_config(SocketClientConfig::new(relay_url, system_name))
    }

    /// Distributor with full control over timeouts and intervals.
    pub fn with_config(config: SocketClientConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    async fn client(&self) -> Result<SocketClient> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| TransportError::connection("distributor is not connected"))
    }
}

#[async_trait]
impl Distributor for WebsocketDistributor {
    async fn connect(&self, on_error: ErrorHandler) -> Result<()> {
        let client = SocketClient::connect(self.config.clone(), on_error).await?;
        *self.client.write().await = Some(client);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(client) = self.client.write().await.take() {
            client.close();
        }
        Ok(())
    }

    async fn subscribe(&self, on_envelope: EnvelopeHandler) -> Result<()> {
        let client = self.client().await?;
        let answer_client = client.clone();
        let handler: MessageHandler = Arc::new(move |origin_id, question_id, payload| {
            let envelope: WireEnvelope = match serde_json::from_value(payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(origin_id = %origin_id, error = %e, "Discarding malformed wire envelope");
                    return;
                }
            };
            let answer = if envelope.ask_timeout > 0 {
                Some(AnswerHandle {
                    client: answer_client.clone(),
                    origin_id,
                    question_id,
                })
            } else {
                None
            };
            on_envelope(envelope, answer);
        });
        client.set_message_handler(handler);
        Ok(())
    }

    async fn send(&self, channel: &str, envelope: WireEnvelope) -> Result<()> {
        let client = self.client().await?;
        let timeout = client.default_timeout();
        let payload = serde_json::to_value(&envelope)?;
        client.send(relay_target(channel), payload, timeout).await
    }

    async fn ask(&self, channel: &str, envelope: WireEnvelope) -> Result<Value> {
        let client = self.client().await?;
        let timeout = if envelope.ask_timeout > 0 {
            Duration::from_millis(envelope.ask_timeout)
        } else {
            client.default_timeout()
        };
        let payload = serde_json::to_value(&envelope)?;
        client.ask(relay_target(channel), payload, timeout).await
    }
}
