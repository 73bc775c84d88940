//! Actor System
//!
//! Owns the actor registry, the supervision tree and the dispatcher. All
//! messages funnel through a single unbounded inbox; the dispatch loop
//! routes each envelope into the target actor's mailbox, where a dedicated
//! worker drains it one message at a time. Every actor therefore observes
//! messages in arrival order, and a slow actor only ever stalls itself.

use crate::actor::{Actor, ActorContext, ActorOptions, Props, SupervisionStrategy};
use crate::error::{ActorError, Result};
use crate::message::{AskReply, Envelope, Payload, SystemEvent};
use crate::reference::ActorRef;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use troupe_transport::{Distributor, URI_SCHEME};
use uuid::Uuid;

/// Default deadline for asks that do not specify one
pub const DEFAULT_ASK_TIMEOUT: Duration = Duration::from_secs(5);

/// System-wide configuration
#[derive(Debug, Clone)]
pub struct ActorSystemOptions {
    /// Name of the system, the first segment of every actor URI. Doubles as
    /// the node id when the system is distributed.
    pub system_name: String,
    pub default_ask_timeout: Duration,
}

impl Default for ActorSystemOptions {
    fn default() -> Self {
        Self {
            system_name: "system".to_string(),
            default_ask_timeout: DEFAULT_ASK_TIMEOUT,
        }
    }
}

impl ActorSystemOptions {
    pub fn named(system_name: impl Into<String>) -> Self {
        Self {
            system_name: system_name.into(),
            ..Self::default()
        }
    }
}

type ActorState<M> = Arc<Mutex<Box<dyn Actor<M>>>>;

/// Registry slot for one live actor.
struct ActorCell<M: Payload> {
    parent: Option<String>,
    children: Vec<String>,
    strategy: SupervisionStrategy,
    props: Props<M>,
    is_shutdown: bool,
    state: ActorState<M>,
    /// Per-actor mailbox; a dedicated worker drains it sequentially. Closes
    /// when the cell is removed from the registry.
    mailbox: mpsc::UnboundedSender<Envelope<M>>,
}

pub(crate) struct SystemInner<M: Payload> {
    system_name: String,
    root_uri: String,
    /// `root_uri` plus a trailing slash; everything under it is local.
    local_prefix: String,
    default_ask_timeout: Duration,
    inbox: mpsc::UnboundedSender<Envelope<M>>,
    actors: RwLock<HashMap<String, ActorCell<M>>>,
    error_receiver: parking_lot::RwLock<Option<String>>,
    remote: parking_lot::RwLock<Option<Arc<dyn Distributor>>>,
    running: AtomicBool,
    loop_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running actor system. Cheap to clone; all clones share the
/// same registry and dispatcher.
pub struct ActorSystem<M: Payload> {
    pub(crate) inner: Arc<SystemInner<M>>,
}

impl<M: Payload> Clone for ActorSystem<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Root of the supervision tree. Receives messages redirected from
/// nonexistent actors and logs them.
struct SystemActor;

#[async_trait::async_trait]
impl<M: Payload> Actor<M> for SystemActor {
    async fn receive(
        &mut self,
        _ctx: &ActorContext<M>,
        from: ActorRef<M>,
        message: M,
    ) -> Result<Option<M>> {
        info!(from = %from.name(), message = ?message, "Message arrived at the system root");
        Ok(None)
    }

    async fn on_system_event(&mut self, _ctx: &ActorContext<M>, event: SystemEvent<M>) {
        match event {
            SystemEvent::Undeliverable { from, to, info, .. } => {
                warn!(from = %from, to = %to, info = %info, "Undeliverable message");
            }
            other => warn!(event = ?other, "System event"),
        }
    }
}

impl<M: Payload> ActorSystem<M> {
    /// Start a new actor system: registers the root actor and spawns the
    /// dispatch loop.
    pub async fn new(options: ActorSystemOptions) -> Self {
        let root_uri = format!("{}{}", URI_SCHEME, options.system_name);
        let (inbox, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SystemInner {
            system_name: options.system_name,
            local_prefix: format!("{root_uri}/"),
            root_uri,
            default_ask_timeout: options.default_ask_timeout,
            inbox,
            actors: RwLock::new(HashMap::new()),
            error_receiver: parking_lot::RwLock::new(None),
            remote: parking_lot::RwLock::new(None),
            running: AtomicBool::new(true),
            loop_handle: parking_lot::Mutex::new(None),
        });
        let system = Self { inner };
        system.register_root().await;
        let handle = tokio::spawn(dispatch_loop(system.clone(), rx));
        *system.inner.loop_handle.lock() = Some(handle);
        info!(system = %system.inner.system_name, "Actor system started");
        system
    }

    async fn register_root(&self) {
        let cell = ActorCell {
            parent: None,
            children: Vec::new(),
            strategy: SupervisionStrategy::Resume,
            props: Props::new(|| SystemActor),
            is_shutdown: false,
            state: Arc::new(Mutex::new(Box::new(SystemActor) as Box<dyn Actor<M>>)),
            mailbox: self.spawn_worker(),
        };
        self.inner
            .actors
            .write()
            .await
            .insert(self.inner.root_uri.clone(), cell);
    }

    pub fn system_name(&self) -> &str {
        &self.inner.system_name
    }

    /// URI of the system root, e.g. `actors://system`
    pub fn root_uri(&self) -> &str {
        &self.inner.root_uri
    }

    pub fn root_ref(&self) -> ActorRef<M> {
        ActorRef::new(self.inner.root_uri.clone(), self.clone())
    }

    pub fn default_ask_timeout(&self) -> Duration {
        self.inner.default_ask_timeout
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Whether the given URI addresses this system (as opposed to a remote
    /// node reachable through a distributor).
    pub fn is_local(&self, uri: &str) -> bool {
        uri == self.inner.root_uri || uri.starts_with(&self.inner.local_prefix)
    }

    /// Spawn a new actor. Its URI is `{parent}/{name}`, with the root as
    /// parent and a generated `{TypeName}_{uuid}` leaf when unspecified.
    pub async fn create_actor(
        &self,
        props: Props<M>,
        options: ActorOptions<M>,
    ) -> Result<ActorRef<M>> {
        if !self.is_running() {
            return Err(ActorError::SystemShutDown);
        }
        let parent_uri = options
            .parent
            .as_ref()
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| self.inner.root_uri.clone());
        let leaf = options
            .name
            .clone()
            .unwrap_or_else(|| format!("{}_{}", props.type_name(), Uuid::new_v4()));
        let name = format!("{parent_uri}/{leaf}");

        {
            let actors = self.inner.actors.read().await;
            if actors.contains_key(&name) && !options.overwrite_existing {
                return Err(ActorError::ActorExists(name));
            }
        }

        // The instance only becomes addressable once before_start succeeds.
        let mut actor = props.instantiate();
        let ctx = self.context_for(&name);
        actor.before_start(&ctx).await?;

        let state: ActorState<M> = Arc::new(Mutex::new(actor));
        {
            let mut actors = self.inner.actors.write().await;
            // Re-check under the write lock: a concurrent create may have won.
            if actors.contains_key(&name) && !options.overwrite_existing {
                return Err(ActorError::ActorExists(name));
            }
            let children = actors
                .remove(&name)
                .map(|previous| previous.children)
                .unwrap_or_default();
            actors.insert(
                name.clone(),
                ActorCell {
                    parent: Some(parent_uri.clone()),
                    children,
                    strategy: options.strategy,
                    props: props.clone(),
                    is_shutdown: false,
                    state: Arc::clone(&state),
                    mailbox: self.spawn_worker(),
                },
            );
            if let Some(parent_cell) = actors.get_mut(&parent_uri) {
                if !parent_cell.children.iter().any(|c| c == &name) {
                    parent_cell.children.push(name.clone());
                }
            }
        }
        if options.error_receiver {
            *self.inner.error_receiver.write() = Some(name.clone());
            debug!(actor = %name, "Registered error receiver");
        }

        if let Err(e) = state.lock().await.after_start(&ctx).await {
            error!(actor = %name, error = %e, "after_start failed, aborting spawn");
            let _ = self.shutdown_actor(&name).await;
            return Err(e);
        }
        info!(actor = %name, "Actor created");
        Ok(ActorRef::new(name, self.clone()))
    }

    /// Look up a reference by URI. `None` when no such actor is registered.
    pub async fn get_ref(&self, name: &str) -> Option<ActorRef<M>> {
        let actors = self.inner.actors.read().await;
        actors
            .get(name)
            .filter(|cell| !cell.is_shutdown)
            .map(|_| ActorRef::new(name.to_string(), self.clone()))
    }

    /// Children of the given actor (of the root when `None`).
    pub async fn children_of(&self, parent: Option<&ActorRef<M>>) -> Vec<ActorRef<M>> {
        let parent_uri = parent
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| self.inner.root_uri.clone());
        let actors = self.inner.actors.read().await;
        actors
            .get(&parent_uri)
            .map(|cell| {
                cell.children
                    .iter()
                    .map(|child| ActorRef::new(child.clone(), self.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) async fn is_registered(&self, name: &str) -> bool {
        let actors = self.inner.actors.read().await;
        actors.get(name).map(|cell| !cell.is_shutdown).unwrap_or(false)
    }

    /// Fire-and-forget send attributed to the system root.
    pub async fn send(&self, to: &ActorRef<M>, message: M) -> Result<()> {
        self.send_from(self.inner.root_uri.clone(), to.name().to_string(), message)
    }

    /// Send to an actor URI, which may live on another node.
    pub async fn send_named(&self, to: impl Into<String>, message: M) -> Result<()> {
        self.send_from(self.inner.root_uri.clone(), to.into(), message)
    }

    /// Ask attributed to the system root.
    pub async fn ask(
        &self,
        to: &ActorRef<M>,
        message: M,
        timeout: Duration,
    ) -> Result<Option<M>> {
        self.ask_from(
            self.inner.root_uri.clone(),
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
        self.ask_from(self.inner.root_uri.clone(), to.into(), message, timeout)
            .await
    }

    pub(crate) fn send_from(&self, from: String, to: String, message: M) -> Result<()> {
        if !self.is_running() {
            return Err(ActorError::SystemShutDown);
        }
        self.inner
            .inbox
            .send(Envelope {
                from,
                to,
                message,
                reply: None,
                ask_timeout: Duration::ZERO,
            })
            .map_err(|_| ActorError::SystemShutDown)
    }

    /// Enqueue an ask. The timeout timer is armed here, at enqueue time, so
    /// queueing delay counts against the deadline and an ask can never hang.
    pub(crate) async fn ask_from(
        &self,
        from: String,
        to: String,
        message: M,
        timeout: Duration,
    ) -> Result<Option<M>> {
        if !self.is_running() {
            return Err(ActorError::SystemShutDown);
        }
        let (reply, rx) = AskReply::local();

        let timer_reply = reply.clone();
        let timer_system = self.clone();
        let (timer_from, timer_to) = (from.clone(), to.clone());
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let timeout_ms = timeout.as_millis() as u64;
            let timed_out = timer_reply.settle(Err(ActorError::AskTimeout {
                from: timer_from.clone(),
                to: timer_to.clone(),
                timeout_ms,
            }));
            if timed_out {
                debug!(from = %timer_from, to = %timer_to, timeout_ms, "Ask timed out");
                timer_system
                    .notify_error_receiver(SystemEvent::AskTimeout {
                        from: timer_from,
                        to: timer_to,
                        timeout_ms,
                    })
                    .await;
            }
        });

        self.inner
            .inbox
            .send(Envelope {
                from,
                to,
                message,
                reply: Some(reply),
                ask_timeout: timeout,
            })
            .map_err(|_| ActorError::SystemShutDown)?;
        rx.await.map_err(|_| ActorError::SystemShutDown)?
    }

    /// Shut an actor down: `before_shutdown`, cascade through its children,
    /// deregister, then `after_shutdown`. Idempotent: a second call is a
    /// no-op with a warning, never an error.
    pub fn shutdown_actor<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (state, children, parent) = {
                let mut actors = self.inner.actors.write().await;
                let Some(cell) = actors.get_mut(name) else {
                    warn!(actor = %name, "Actor is already shut down");
                    return Ok(());
                };
                if cell.is_shutdown {
                    warn!(actor = %name, "Actor is already shut down");
                    return Ok(());
                }
                // Marking first rejects new deliveries during teardown and
                // makes a concurrent second shutdown a no-op.
                cell.is_shutdown = true;
                (cell.state.clone(), cell.children.clone(), cell.parent.clone())
            };

            let ctx = self.context_for(name);
            state.lock().await.before_shutdown(&ctx).await;

            for child in &children {
                if let Err(e) = self.shutdown_actor(child).await {
                    warn!(actor = %name, child = %child, error = %e, "Child shutdown failed");
                }
            }

            {
                let mut actors = self.inner.actors.write().await;
                if let Some(parent_uri) = &parent {
                    if let Some(parent_cell) = actors.get_mut(parent_uri) {
                        parent_cell.children.retain(|c| c != name);
                    }
                }
                actors.remove(name);
            }
            {
                let mut receiver = self.inner.error_receiver.write();
                if receiver.as_deref() == Some(name) {
                    *receiver = None;
                }
            }

            state.lock().await.after_shutdown(&ctx).await;
            info!(actor = %name, "Actor shut down");
            Ok(())
        })
    }

    /// Restart an actor: children first, then replace the instance with a
    /// fresh one from its factory. Falls back to shutdown when any start
    /// hook fails, so a broken actor can never limp along half-initialized.
    pub fn restart_actor<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match self.try_restart(name).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!(actor = %name, error = %e, "Restart failed, shutting actor down");
                    self.shutdown_actor(name).await
                }
            }
        })
    }

    async fn try_restart(&self, name: &str) -> Result<()> {
        let (props, children) = {
            let actors = self.inner.actors.read().await;
            let cell = actors
                .get(name)
                .filter(|cell| !cell.is_shutdown)
                .ok_or_else(|| ActorError::ActorNotFound(name.to_string()))?;
            (cell.props.clone(), cell.children.clone())
        };
        for child in &children {
            self.restart_actor(child).await?;
        }

        let mut actor = props.instantiate();
        let ctx = self.context_for(name);
        actor.before_start(&ctx).await?;
        let state = {
            let mut actors = self.inner.actors.write().await;
            let cell = actors
                .get_mut(name)
                .ok_or_else(|| ActorError::ActorNotFound(name.to_string()))?;
            cell.state = Arc::new(Mutex::new(actor));
            Arc::clone(&cell.state)
        };
        state.lock().await.after_start(&ctx).await?;
        info!(actor = %name, "Actor restarted");
        Ok(())
    }

    /// Shut the whole system down: cascades from the root through every
    /// actor, then stops the dispatcher. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            warn!(system = %self.inner.system_name, "Actor system is already shut down");
            return Ok(());
        }
        let root = self.inner.root_uri.clone();
        self.shutdown_actor(&root).await?;
        if let Some(handle) = self.inner.loop_handle.lock().take() {
            handle.abort();
        }
        info!(system = %self.inner.system_name, "Actor system shutdown complete");
        Ok(())
    }

    /// Mailbox plus draining worker for one actor. The worker resolves the
    /// instance by name on every envelope, so it survives restarts and
    /// overwrites, and terminates once the cell (the last sender) is gone.
    fn spawn_worker(&self) -> mpsc::UnboundedSender<Envelope<M>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let system = self.clone();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                process(&system, envelope).await;
            }
        });
        tx
    }

    pub(crate) fn context_for(&self, name: &str) -> ActorContext<M> {
        ActorContext::new(ActorRef::new(name.to_string(), self.clone()), self.clone())
    }

    async fn state_of(&self, name: &str) -> Option<ActorState<M>> {
        let actors = self.inner.actors.read().await;
        actors
            .get(name)
            .filter(|cell| !cell.is_shutdown)
            .map(|cell| Arc::clone(&cell.state))
    }

    /// Deliver a runtime event to the designated error receiver, if any.
    pub(crate) async fn notify_error_receiver(&self, event: SystemEvent<M>) {
        let Some(name) = self.inner.error_receiver.read().clone() else {
            return;
        };
        let Some(state) = self.state_of(&name).await else {
            return;
        };
        let ctx = self.context_for(&name);
        state.lock().await.on_system_event(&ctx, event).await;
    }

    pub(crate) fn install_distributor(&self, distributor: Arc<dyn Distributor>) {
        *self.inner.remote.write() = Some(distributor);
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.inner.running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn enqueue(&self, envelope: Envelope<M>) -> Result<()> {
        self.inner
            .inbox
            .send(envelope)
            .map_err(|_| ActorError::SystemShutDown)
    }
}

async fn dispatch_loop<M: Payload>(
    system: ActorSystem<M>,
    mut rx: mpsc::UnboundedReceiver<Envelope<M>>,
) {
    while let Some(envelope) = rx.recv().await {
        route(&system, envelope).await;
    }
    debug!("Dispatch loop terminated");
}

/// Route one envelope: out through the distributor for remote targets,
/// into the target's mailbox otherwise.
async fn route<M: Payload>(system: &ActorSystem<M>, envelope: Envelope<M>) {
    if !system.is_local(&envelope.to) {
        let distributor = system.inner.remote.read().clone();
        if let Some(distributor) = distributor {
            // A remote ask blocks on its answer, so it gets its own task
            // instead of stalling the dispatch loop.
            tokio::spawn(crate::distributed::forward_remote(distributor, envelope));
            return;
        }
        // Without a distributor a remote address is just unknown.
    }

    let mailbox = {
        let actors = system.inner.actors.read().await;
        match actors.get(&envelope.to) {
            Some(cell) if !cell.is_shutdown => Ok(cell.mailbox.clone()),
            Some(_) => Err("actor is already shut down"),
            None => Err("no actor is registered under this name"),
        }
    };
    match mailbox {
        Ok(mailbox) => {
            if let Err(rejected) = mailbox.send(envelope) {
                undeliverable(system.clone(), rejected.0, "actor mailbox is closed").await;
            }
        }
        Err(info) => undeliverable(system.clone(), envelope, info).await,
    }
}

/// Run one envelope through its target actor and apply supervision to the
/// outcome. Executes on the actor's mailbox worker, one envelope at a time.
async fn process<M: Payload>(system: &ActorSystem<M>, envelope: Envelope<M>) {
    let resolved = {
        let actors = system.inner.actors.read().await;
        match actors.get(&envelope.to) {
            Some(cell) if !cell.is_shutdown => Ok((Arc::clone(&cell.state), cell.strategy)),
            Some(_) => Err("actor is already shut down"),
            None => Err("no actor is registered under this name"),
        }
    };

    let (state, strategy) = match resolved {
        Ok(found) => found,
        Err(info) => {
            undeliverable(system.clone(), envelope, info).await;
            return;
        }
    };

    let ctx = system.context_for(&envelope.to);
    let from_ref = ActorRef::new(envelope.from.clone(), system.clone());
    let result = {
        let mut actor = state.lock().await;
        actor.receive(&ctx, from_ref, envelope.message.clone()).await
    };

    match result {
        Ok(value) => {
            if let Some(reply) = envelope.reply {
                if !reply.settle(Ok(value)) {
                    debug!(to = %envelope.to, "Discarding reply to an ask that already timed out");
                }
            }
        }
        Err(e) => {
            error!(
                actor = %envelope.to,
                error = %e,
                strategy = ?strategy,
                "Actor failed to handle a message, applying supervision strategy"
            );
            system
                .notify_error_receiver(SystemEvent::HandlerFailure {
                    actor: envelope.to.clone(),
                    error: e.to_string(),
                    strategy,
                })
                .await;
            // A pending ask is left to its timer; a failed handler never
            // produces an answer.
            match strategy {
                SupervisionStrategy::Resume => {}
                SupervisionStrategy::Restart => {
                    if let Err(e) = system.restart_actor(&envelope.to).await {
                        warn!(actor = %envelope.to, error = %e, "Supervision restart failed");
                    }
                }
                SupervisionStrategy::Shutdown => {
                    if let Err(e) = system.shutdown_actor(&envelope.to).await {
                        warn!(actor = %envelope.to, error = %e, "Supervision shutdown failed");
                    }
                }
            }
        }
    }
}

async fn undeliverable<M: Payload>(system: ActorSystem<M>, envelope: Envelope<M>, info: &str) {
    warn!(from = %envelope.from, to = %envelope.to, info, "Undeliverable message");
    let event = SystemEvent::Undeliverable {
        from: envelope.from.clone(),
        to: envelope.to.clone(),
        info: info.to_string(),
        message: envelope.message.clone(),
    };

    // The root actor always observes undeliverable traffic; the error
    // receiver additionally gets notified unless it is the root itself.
    let root_uri = system.inner.root_uri.clone();
    if let Some(root_state) = system.state_of(&root_uri).await {
        let ctx = system.context_for(&root_uri);
        root_state
            .lock()
            .await
            .on_system_event(&ctx, event.clone())
            .await;
    }
    let receiver = system.inner.error_receiver.read().clone();
    if receiver.as_deref() != Some(root_uri.as_str()) {
        system.notify_error_receiver(event).await;
    }

    if let Some(reply) = envelope.reply {
        let settled = reply.settle(Err(ActorError::undeliverable(envelope.to.clone(), info)));
        if !settled {
            debug!(to = %envelope.to, "Undeliverable ask had already timed out");
        }
    }
}
