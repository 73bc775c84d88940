//! Distributed Actor System
//!
//! Wraps a local [`ActorSystem`] with a [`Distributor`], making remote
//! actors addressable by URI exactly like local ones: the dispatcher routes
//! any envelope whose target is not under this system's root out through the
//! distributor, and inbound wire envelopes re-enter the local inbox as if
//! they had been sent locally. An inbound ask carries an answer handle, so
//! the local actor's reply travels back over the wire to the asking node.

use crate::error::{ActorError, Result};
use crate::message::{AskReply, Envelope, Payload};
use crate::system::{ActorSystem, ActorSystemOptions};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use troupe_transport::{channel_for, AnswerHandle, Distributor, ErrorHandler, WireEnvelope};

/// An [`ActorSystem`] connected to other nodes through a [`Distributor`].
///
/// Derefs to the wrapped system, so actor creation and messaging read the
/// same whether or not the system is distributed.
pub struct DistributedActorSystem<M: Payload> {
    system: ActorSystem<M>,
    distributor: Arc<dyn Distributor>,
}

impl<M: Payload> DistributedActorSystem<M> {
    /// Start a distributed system. The system is not running (sends and
    /// asks fail fast) until the distributor is connected and subscribed;
    /// terminal connection errors abort startup.
    pub async fn create(
        options: ActorSystemOptions,
        distributor: Arc<dyn Distributor>,
        on_error: ErrorHandler,
    ) -> Result<Self> {
        let system = ActorSystem::new(options).await;
        system.set_running(false);
        system.install_distributor(Arc::clone(&distributor));

        distributor.connect(on_error).await?;
        let inbound_system = system.clone();
        distributor
            .subscribe(Arc::new(move |envelope, answer| {
                inbound_system.accept_remote(envelope, answer);
            }))
            .await?;
        system.set_running(true);
        debug!(system = %system.system_name(), "Connection to the relay established");
        Ok(Self {
            system,
            distributor,
        })
    }

    pub fn system(&self) -> &ActorSystem<M> {
        &self.system
    }

    /// Disconnect from the transport, then shut the local system down.
    pub async fn shutdown(&self) -> Result<()> {
        self.distributor.disconnect().await?;
        self.system.shutdown().await
    }
}

impl<M: Payload> Deref for DistributedActorSystem<M> {
    type Target = ActorSystem<M>;

    fn deref(&self) -> &Self::Target {
        &self.system
    }
}

impl<M: Payload> ActorSystem<M> {
    /// Re-enter an envelope that arrived over the wire into the local inbox.
    /// Called from the transport's subscription callback.
    pub(crate) fn accept_remote(&self, wire: WireEnvelope, answer: Option<AnswerHandle>) {
        let message: M = match serde_json::from_value(wire.message) {
            Ok(message) => message,
            Err(e) => {
                warn!(from = %wire.from, to = %wire.to, error = %e, "Dropping undecodable remote payload");
                return;
            }
        };
        let reply = answer.map(AskReply::remote);
        if let Some(reply) = &reply {
            // The asking node enforces its own deadline, but abandoning the
            // slot locally too keeps a never-answered ask from pinning its
            // answer handle forever.
            let timer_reply = reply.clone();
            let (from, to) = (wire.from.clone(), wire.to.clone());
            let timeout = Duration::from_millis(wire.ask_timeout);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if timer_reply.settle(Err(ActorError::AskTimeout {
                    from,
                    to,
                    timeout_ms: timeout.as_millis() as u64,
                })) {
                    debug!("Remote ask expired before the local actor answered");
                }
            });
        }
        let envelope = Envelope {
            from: wire.from,
            to: wire.to,
            message,
            reply,
            ask_timeout: Duration::from_millis(wire.ask_timeout),
        };
        if self.enqueue(envelope).is_err() {
            warn!("Dropping remote envelope, the actor system is shut down");
        }
    }
}

/// Ship an envelope addressed to another node out through the distributor.
/// Asks resolve with the remote answer; `Null` answers map to `None`.
pub(crate) async fn forward_remote<M: Payload>(
    distributor: Arc<dyn Distributor>,
    envelope: Envelope<M>,
) {
    let Envelope {
        from,
        to,
        message,
        reply,
        ask_timeout,
    } = envelope;

    let channel = channel_for(&to);
    let message = match serde_json::to_value(&message) {
        Ok(value) => value,
        Err(e) => {
            error!(from = %from, to = %to, error = %e, "Failed to serialize outbound payload");
            if let Some(reply) = reply {
                reply.settle(Err(ActorError::Serialization(e.to_string())));
            }
            return;
        }
    };
    let wire = WireEnvelope {
        from: from.clone(),
        to: to.clone(),
        message,
        ask_timeout: ask_timeout.as_millis() as u64,
    };

    match reply {
        Some(reply) => match distributor.ask(&channel, wire).await {
            Ok(value) => {
                let outcome = if value.is_null() {
                    Ok(None)
                } else {
                    serde_json::from_value::<M>(value)
                        .map(Some)
                        .map_err(|e| ActorError::Serialization(e.to_string()))
                };
                if !reply.settle(outcome) {
                    debug!(from = %from, to = %to, "Discarding remote answer to an ask that already timed out");
                }
            }
            Err(e) => {
                warn!(from = %from, to = %to, error = %e, "Remote ask failed");
                reply.settle(Err(ActorError::Transport(e)));
            }
        },
        None => {
            if let Err(e) = distributor.send(&channel, wire).await {
                error!(from = %from, to = %to, error = %e, "Message was not delivered to the remote node");
            }
        }
    }
}
