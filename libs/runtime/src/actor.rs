//! Actor Behavior and Configuration
//!
//! The [`Actor`] trait is the behavior seam: implement `receive`, optionally
//! override the lifecycle hooks, and hand a [`Props`] factory to the system.
//! The factory (not the instance) is what the system keeps, so a supervised
//! restart can always build a fresh instance with the same parameters.

use crate::error::Result;
use crate::message::{Payload, SystemEvent};
use crate::reference::ActorRef;
use crate::system::ActorSystem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// What the system does with an actor whose handler returned an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SupervisionStrategy {
    /// Replace the instance with a fresh one from its factory, children
    /// first. State accumulated since the last start is discarded.
    Restart,
    /// Keep the instance and its state; drop only the failed message.
    Resume,
    /// Shut the actor down, cascading through its children.
    #[default]
    Shutdown,
}

/// Message-handling behavior plus lifecycle hooks.
///
/// All hooks default to no-ops. `before_start`/`after_start` may fail, which
/// aborts the spawn (or the restart, falling back to shutdown); the shutdown
/// hooks are infallible since shutdown always completes.
#[async_trait]
pub trait Actor<M: Payload>: Send {
    /// Handle one message. Returning `Ok(Some(_))` answers a pending ask;
    /// for plain sends the value is discarded. Returning `Err` triggers this
    /// actor's supervision strategy.
    async fn receive(
        &mut self,
        ctx: &ActorContext<M>,
        from: ActorRef<M>,
        message: M,
    ) -> Result<Option<M>>;

    /// Runs before the actor is registered; failure aborts the spawn.
    async fn before_start(&mut self, _ctx: &ActorContext<M>) -> Result<()> {
        Ok(())
    }

    /// Runs once the actor is registered and addressable.
    async fn after_start(&mut self, _ctx: &ActorContext<M>) -> Result<()> {
        Ok(())
    }

    /// Runs before this actor's children are shut down.
    async fn before_shutdown(&mut self, _ctx: &ActorContext<M>) {}

    /// Runs after the actor has been deregistered.
    async fn after_shutdown(&mut self, _ctx: &ActorContext<M>) {}

    /// Runtime-level events, delivered to the error receiver actor and to
    /// the root actor for undeliverable messages.
    async fn on_system_event(&mut self, _ctx: &ActorContext<M>, event: SystemEvent<M>) {
        tracing::warn!(event = ?event, "Unhandled system event");
    }
}

type ActorFactory<M> = Arc<dyn Fn() -> Box<dyn Actor<M>> + Send + Sync>;

/// Recipe for building (and rebuilding) an actor instance.
pub struct Props<M: Payload> {
    factory: ActorFactory<M>,
    type_name: String,
}

impl<M: Payload> Clone for Props<M> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            type_name: self.type_name.clone(),
        }
    }
}

impl<M: Payload> Props<M> {
    pub fn new<A, F>(factory: F) -> Self
    where
        A: Actor<M> + 'static,
        F: Fn() -> A + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<A>()
            .rsplit("::")
            .next()
            .unwrap_or("Actor")
            .to_string();
        Self {
            factory: Arc::new(move || Box::new(factory())),
            type_name,
        }
    }

    pub(crate) fn instantiate(&self) -> Box<dyn Actor<M>> {
        (self.factory)()
    }

    /// Short type name of the concrete actor, used for generated names.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

/// Spawn-time configuration for a new actor.
pub struct ActorOptions<M: Payload> {
    /// Leaf name under the parent (or the root). When `None` a unique name
    /// is generated from the actor's type name.
    pub name: Option<String>,
    pub strategy: SupervisionStrategy,
    /// Parent in the supervision tree; the root actor when `None`.
    pub parent: Option<ActorRef<M>>,
    /// Replace an existing actor under the same name instead of failing.
    pub overwrite_existing: bool,
    /// Register this actor as the system's error receiver.
    pub error_receiver: bool,
}

impl<M: Payload> Default for ActorOptions<M> {
    fn default() -> Self {
        Self {
            name: None,
            strategy: SupervisionStrategy::default(),
            parent: None,
            overwrite_existing: false,
            error_receiver: false,
        }
    }
}

impl<M: Payload> Clone for ActorOptions<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            strategy: self.strategy,
            parent: self.parent.clone(),
            overwrite_existing: self.overwrite_existing,
            error_receiver: self.error_receiver,
        }
    }
}

impl<M: Payload> ActorOptions<M> {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: SupervisionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn under(mut self, parent: &ActorRef<M>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn overwrite_existing(mut self) -> Self {
        self.overwrite_existing = true;
        self
    }

    pub fn as_error_receiver(mut self) -> Self {
        self.error_receiver = true;
        self
    }
}

/// Handle an actor receives alongside every message, giving it access to its
/// own address and to the system it runs in.
pub struct ActorContext<M: Payload> {
    me: ActorRef<M>,
    system: ActorSystem<M>,
}

impl<M: Payload> ActorContext<M> {
    pub(crate) fn new(me: ActorRef<M>, system: ActorSystem<M>) -> Self {
        Self { me, system }
    }

    /// This actor's own reference
    pub fn me(&self) -> &ActorRef<M> {
        &self.me
    }

    pub fn system(&self) -> &ActorSystem<M> {
        &self.system
    }

    /// Fire-and-forget send with this actor as the sender.
    pub async fn send(&self, to: &ActorRef<M>, message: M) -> Result<()> {
        self.system
            .send_from(self.me.name().to_string(), to.name().to_string(), message)
    }

    /// Send to an actor URI, which may live on another node.
    pub async fn send_named(&self, to: impl Into<String>, message: M) -> Result<()> {
        self.system
            .send_from(self.me.name().to_string(), to.into(), message)
    }

    /// Ask with this actor as the sender.
    pub async fn ask(
        &self,
        to: &ActorRef<M>,
        message: M,
        timeout: Duration,
    ) -> Result<Option<M>> {
        self.system
            .ask_from(
                self.me.name().to_string(),
                to.name().to_string(),
                message,
                timeout,
            )
            .await
    }

    /// Ask an actor URI, which may live on another node.
    pub async fn ask_named(
        &self,
        to: impl Into<String>,
        message: M,
        timeout: Duration,
    ) -> Result<Option<M>> {
        self.system
            .ask_from(self.me.name().to_string(), to.into(), message, timeout)
            .await
    }

    /// Spawn a child of this actor.
    pub async fn create_child(
        &self,
        props: Props<M>,
        options: ActorOptions<M>,
    ) -> Result<ActorRef<M>> {
        let options = options.under(&self.me);
        self.system.create_actor(props, options).await
    }
}
