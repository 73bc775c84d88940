//! Reliable Point-to-Point Messaging for Distributed Actor Systems
//!
//! Layers acknowledgement, timeout, retry-by-timeout and reconnection
//! semantics on top of an unreliable websocket connection, plus a relay hub
//! for topologies without direct node-to-node connections.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │  SocketClient A  │────▶│ MessageRelay │────▶│  SocketClient B  │
//! │  acks/questions  │◀────│  by clientId │◀────│  acks/questions  │
//! └──────────────────┘     └──────────────┘     └──────────────────┘
//!          ▲                                             ▲
//!          │ Distributor trait                           │
//!   DistributedActorSystem (troupe-runtime)       remote peer system
//! ```
//!
//! Delivery is at-least-once with caller-visible failure: a `msg` or `answer`
//! without a matching `ack` before its deadline rejects the sender's future
//! with a [`TransportError::Delivery`] naming the lost payload. Answers to
//! questions are delivered at most once per question id.

pub mod client;
pub mod distributor;
pub mod error;
pub mod frame;
pub mod relay;

pub use client::{ErrorHandler, MessageHandler, SocketClient, SocketClientConfig};
pub use distributor::{
    channel_for, AnswerHandle, Distributor, EnvelopeHandler, WebsocketDistributor, WireEnvelope,
    URI_SCHEME,
};
pub use error::{Result, TransportError};
pub use frame::{Frame, KEEP_ALIVE};
pub use relay::MessageRelay;
