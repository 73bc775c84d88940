//! Message Envelopes and Reply Plumbing
//!
//! Every message travels through the system inside an [`Envelope`]. Asks
//! additionally carry an [`AskReply`]: a take-once slot raced between the
//! responding actor and the ask's timeout timer, so each ask settles exactly
//! once no matter which side gets there first.

use crate::actor::SupervisionStrategy;
use crate::error::Result;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::warn;
use troupe_transport::AnswerHandle;

/// Marker trait for message payloads. Blanket-implemented for every type
/// that is cloneable, printable and JSON-serializable, so a system's message
/// enum only needs the usual derives.
pub trait Payload:
    Clone + fmt::Debug + Send + Serialize + DeserializeOwned + 'static
{
}

impl<T> Payload for T where
    T: Clone + fmt::Debug + Send + Serialize + DeserializeOwned + 'static
{
}

/// Outcome of an ask: the responder's optional reply value, or the error
/// that settled the ask first.
pub type AskOutcome<M> = Result<Option<M>>;

enum ReplySink<M> {
    Local(oneshot::Sender<AskOutcome<M>>),
    Remote(AnswerHandle),
}

/// Take-once reply slot for an ask in flight.
///
/// Clones share the slot; the first `settle` call consumes the sink and every
/// later call is a no-op returning `false`.
pub struct AskReply<M> {
    slot: Arc<Mutex<Option<ReplySink<M>>>>,
}

impl<M> Clone for AskReply<M> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<M: Payload> AskReply<M> {
    /// Slot wired to a local oneshot the asking task awaits on.
    pub(crate) fn local() -> (Self, oneshot::Receiver<AskOutcome<M>>) {
        let (tx, rx) = oneshot::channel();
        let reply = Self {
            slot: Arc::new(Mutex::new(Some(ReplySink::Local(tx)))),
        };
        (reply, rx)
    }

    /// Slot wired to a remote asker on another node.
    pub(crate) fn remote(handle: AnswerHandle) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(ReplySink::Remote(handle)))),
        }
    }

    /// Settle the ask. Returns `true` if this call won the slot.
    ///
    /// A remote slot only ships successful outcomes back over the wire;
    /// a failed handler leaves the remote asker to its own timeout, exactly
    /// as a crashed node would.
    pub(crate) fn settle(&self, outcome: AskOutcome<M>) -> bool {
        let sink = self.slot.lock().take();
        match sink {
            None => false,
            Some(ReplySink::Local(tx)) => {
                let _ = tx.send(outcome);
                true
            }
            Some(ReplySink::Remote(handle)) => {
                if let Ok(value) = outcome {
                    let payload = match &value {
                        Some(message) => match serde_json::to_value(message) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize answer payload");
                                return true;
                            }
                        },
                        None => serde_json::Value::Null,
                    };
                    tokio::spawn(async move {
                        if let Err(e) = handle.answer(payload).await {
                            warn!(error = %e, "Failed to deliver answer to remote asker");
                        }
                    });
                }
                true
            }
        }
    }
}

/// A message in flight inside the system, addressed by actor URI.
pub struct Envelope<M> {
    pub from: String,
    pub to: String,
    pub message: M,
    /// Present exactly when this envelope carries an ask.
    pub reply: Option<AskReply<M>>,
    /// Ask timeout; zero for fire-and-forget sends.
    pub ask_timeout: Duration,
}

/// Runtime-level events routed to the designated error receiver actor
/// (and, for undeliverable messages, to the root actor).
#[derive(Debug, Clone)]
pub enum SystemEvent<M> {
    /// A message addressed to an unknown or already shut down actor.
    Undeliverable {
        from: String,
        to: String,
        info: String,
        message: M,
    },
    /// An actor's handler returned an error and supervision was applied.
    HandlerFailure {
        actor: String,
        error: String,
        strategy: SupervisionStrategy,
    },
    /// An ask expired before any reply settled it.
    AskTimeout {
        from: String,
        to: String,
        timeout_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActorError;
    use serde_json::json;

    #[tokio::test]
    async fn test_local_reply_settles_exactly_once() {
        let (reply, rx) = AskReply::<serde_json::Value>::local();
        assert!(reply.settle(Ok(Some(json!("PONG")))));
        // Second settlement loses the race and is discarded.
        assert!(!reply.settle(Err(ActorError::failure("late"))));
        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome, Some(json!("PONG")));
    }

    #[tokio::test]
    async fn test_timeout_beats_late_reply() {
        let (reply, rx) = AskReply::<serde_json::Value>::local();
        assert!(reply.settle(Err(ActorError::AskTimeout {
            from: "actors://system".to_string(),
            to: "actors://system/slow".to_string(),
            timeout_ms: 10,
        })));
        assert!(!reply.settle(Ok(Some(json!("too late")))));
        assert!(matches!(
            rx.await.unwrap(),
            Err(ActorError::AskTimeout { timeout_ms: 10, .. })
        ));
    }
}
