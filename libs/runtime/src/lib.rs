//! Actor-Model Concurrency Runtime
//!
//! Actors are named by hierarchical URI (`actors://system/parent/child`),
//! supervised by their parents and addressed through references that stay
//! valid across restarts. A single dispatcher funnels every message; asks
//! correlate replies with enqueue-time deadlines. Plugging in a
//! [`Distributor`](troupe_transport::Distributor) makes actors on other
//! nodes addressable by the same URIs.
//!
//! # Example
//!
//! ```no_run
//! use troupe_runtime::{
//!     Actor, ActorContext, ActorOptions, ActorRef, ActorSystem,
//!     ActorSystemOptions, Props, Result,
//! };
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! enum Greeting {
//!     Hello(String),
//! }
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Actor<Greeting> for Greeter {
//!     async fn receive(
//!         &mut self,
//!         _ctx: &ActorContext<Greeting>,
//!         _from: ActorRef<Greeting>,
//!         message: Greeting,
//!     ) -> Result<Option<Greeting>> {
//!         let Greeting::Hello(name) = message;
//!         Ok(Some(Greeting::Hello(format!("hello, {name}"))))
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let system = ActorSystem::new(ActorSystemOptions::default()).await;
//! let greeter = system
//!     .create_actor(Props::new(|| Greeter), ActorOptions::named("greeter"))
//!     .await?;
//! greeter.send(Greeting::Hello("world".to_string())).await?;
//! system.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod distributed;
pub mod error;
pub mod message;
pub mod reference;
pub mod system;

pub use actor::{Actor, ActorContext, ActorOptions, Props, SupervisionStrategy};
pub use distributed::DistributedActorSystem;
pub use error::{ActorError, Result};
pub use message::{Envelope, Payload, SystemEvent};
pub use reference::ActorRef;
pub use system::{ActorSystem, ActorSystemOptions, DEFAULT_ASK_TIMEOUT};

// Transport types that surface in the distributed API.
pub use troupe_transport::{
    Distributor, ErrorHandler, SocketClientConfig, TransportError, WebsocketDistributor,
};
