//! Actor References
//!
//! An [`ActorRef`] is an address, not a pointer: it holds the actor's
//! hierarchical URI and a handle to its system, and resolves through the
//! registry on every use. A reference therefore stays valid across a
//! supervised restart, because the name survives even though the instance
//! behind it is replaced.

use crate::error::Result;
use crate::message::Payload;
use crate::system::ActorSystem;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Address of an actor in a system, e.g. `actors://system/parent/child`.
pub struct ActorRef<M: Payload> {
    name: Arc<str>,
    system: ActorSystem<M>,
}

impl<M: Payload> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            system: self.system.clone(),
        }
    }
}

impl<M: Payload> PartialEq for ActorRef<M> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<M: Payload> Eq for ActorRef<M> {}

impl<M: Payload> fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActorRef").field(&self.name).finish()
    }
}

impl<M: Payload> fmt::Display for ActorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl<M: Payload> ActorRef<M> {
    pub(crate) fn new(name: String, system: ActorSystem<M>) -> Self {
        Self {
            name: Arc::from(name),
            system,
        }
    }

    /// Full hierarchical URI of the actor
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the actor behind this reference has been shut down (or never
    /// existed in this system).
    pub async fn is_shutdown(&self) -> bool {
        !self.system.is_registered(&self.name).await
    }

    /// Fire-and-forget send, attributed to the system root as sender.
    pub async fn send(&self, message: M) -> Result<()> {
        self.system
            .send_from(self.system.root_uri().to_string(), self.name.to_string(), message)
    }

    /// Ask, resolving with the actor's reply or failing with a timeout.
    pub async fn ask(&self, message: M, timeout: Duration) -> Result<Option<M>> {
        self.system
            .ask_from(
                self.system.root_uri().to_string(),
                self.name.to_string(),
                message,
                timeout,
            )
            .await
    }
}
