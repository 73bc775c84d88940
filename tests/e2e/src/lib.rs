//! Shared fixtures for end-to-end tests: a small message protocol and
//! helpers that stand up distributed actor systems against a live relay.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use troupe_runtime::{
    ActorSystemOptions, DistributedActorSystem, Result, SocketClientConfig, WebsocketDistributor,
};

/// Protocol spoken between test nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameMsg {
    Ping(u32),
    Pong(u32),
    WhoAreYou,
    IAm(String),
    Quiet,
    Lookup(String),
    Failed(String),
    Shutdown,
}

/// Socket configuration with intervals tightened for tests.
pub fn fast_config(relay_url: &str, node_name: &str) -> SocketClientConfig {
    let mut config = SocketClientConfig::new(relay_url, node_name);
    config.default_timeout = Duration::from_millis(1500);
    config.sweep_interval = Duration::from_millis(50);
    config.keep_alive_interval = Duration::from_millis(500);
    config.reconnect_backoff = Duration::from_millis(50);
    config
}

/// Stand up one distributed node connected to the relay.
pub async fn start_node(
    node_name: &str,
    relay_url: &str,
) -> Result<DistributedActorSystem<GameMsg>> {
    let distributor = Arc::new(WebsocketDistributor::with_config(fast_config(
        relay_url, node_name,
    )));
    DistributedActorSystem::create(
        ActorSystemOptions::named(node_name),
        distributor,
        Arc::new(|e| tracing::error!(error = %e, "Transport error")),
    )
    .await
}
