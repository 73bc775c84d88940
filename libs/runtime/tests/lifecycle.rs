//! Actor creation, naming and shutdown cascades.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use troupe_runtime::{
    Actor, ActorContext, ActorError, ActorOptions, ActorRef, ActorSystem, ActorSystemOptions,
    Props, Result,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Msg {
    Probe,
}

struct Noop;

#[async_trait]
impl Actor<Msg> for Noop {
    async fn receive(
        &mut self,
        _ctx: &ActorContext<Msg>,
        _from: ActorRef<Msg>,
        _message: Msg,
    ) -> Result<Option<Msg>> {
        Ok(None)
    }
}

/// Records every lifecycle hook invocation into a shared log.
struct Tracked {
    tag: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Tracked {
    fn mark(&self, hook: &str) {
        self.log.lock().unwrap().push(format!("{}:{hook}", self.tag));
    }
}

#[async_trait]
impl Actor<Msg> for Tracked {
    async fn receive(
        &mut self,
        _ctx: &ActorContext<Msg>,
        _from: ActorRef<Msg>,
        _message: Msg,
    ) -> Result<Option<Msg>> {
        Ok(None)
    }

    async fn before_start(&mut self, _ctx: &ActorContext<Msg>) -> Result<()> {
        self.mark("before_start");
        Ok(())
    }

    async fn after_start(&mut self, _ctx: &ActorContext<Msg>) -> Result<()> {
        self.mark("after_start");
        Ok(())
    }

    async fn before_shutdown(&mut self, _ctx: &ActorContext<Msg>) {
        self.mark("before_shutdown");
    }

    async fn after_shutdown(&mut self, _ctx: &ActorContext<Msg>) {
        self.mark("after_shutdown");
    }
}

fn tracked(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Props<Msg> {
    let log = Arc::clone(log);
    Props::new(move || Tracked {
        tag,
        log: Arc::clone(&log),
    })
}

#[test_log::test(tokio::test)]
async fn named_actors_get_hierarchical_uris() {
    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;

    let parent = system
        .create_actor(Props::new(|| Noop), ActorOptions::named("parent"))
        .await
        .unwrap();
    assert_eq!(parent.name(), "actors://test/parent");

    let child = system
        .create_actor(
            Props::new(|| Noop),
            ActorOptions::named("child").under(&parent),
        )
        .await
        .unwrap();
    assert_eq!(child.name(), "actors://test/parent/child");

    // Anonymous actors get a unique name derived from their type.
    let anonymous = system
        .create_actor(Props::new(|| Noop), ActorOptions::default())
        .await
        .unwrap();
    assert!(anonymous.name().starts_with("actors://test/Noop_"));

    system.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn duplicate_names_are_rejected_unless_overwriting() {
    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;

    system
        .create_actor(Props::new(|| Noop), ActorOptions::named("worker"))
        .await
        .unwrap();
    let duplicate = system
        .create_actor(Props::new(|| Noop), ActorOptions::named("worker"))
        .await;
    assert!(matches!(duplicate, Err(ActorError::ActorExists(name)) if name == "actors://test/worker"));

    system
        .create_actor(
            Props::new(|| Noop),
            ActorOptions::named("worker").overwrite_existing(),
        )
        .await
        .unwrap();

    system.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn start_hooks_run_in_order_on_creation() {
    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;
    let log = Arc::new(Mutex::new(Vec::new()));

    system
        .create_actor(tracked("a", &log), ActorOptions::named("a"))
        .await
        .unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["a:before_start", "a:after_start"]
    );

    system.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn failed_before_start_aborts_the_spawn() {
    struct FailsToStart;

    #[async_trait]
    impl Actor<Msg> for FailsToStart {
        async fn receive(
            &mut self,
            _ctx: &ActorContext<Msg>,
            _from: ActorRef<Msg>,
            _message: Msg,
        ) -> Result<Option<Msg>> {
            Ok(None)
        }

        async fn before_start(&mut self, _ctx: &ActorContext<Msg>) -> Result<()> {
            Err(ActorError::failure("refusing to start"))
        }
    }

    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;
    let spawned = system
        .create_actor(Props::new(|| FailsToStart), ActorOptions::named("bad"))
        .await;
    assert!(spawned.is_err());
    assert!(system.get_ref("actors://test/bad").await.is_none());

    system.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn shutdown_cascades_through_children() {
    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;
    let log = Arc::new(Mutex::new(Vec::new()));

    let parent = system
        .create_actor(tracked("p", &log), ActorOptions::named("p"))
        .await
        .unwrap();
    let child = system
        .create_actor(tracked("c", &log), ActorOptions::named("c").under(&parent))
        .await
        .unwrap();

    system.shutdown_actor(parent.name()).await.unwrap();

    assert!(parent.is_shutdown().await);
    assert!(child.is_shutdown().await);
    // The parent hook fires first, then the cascade runs the child's full
    // teardown, then the parent finishes.
    assert_eq!(
        log.lock().unwrap()[4..],
        [
            "p:before_shutdown",
            "c:before_shutdown",
            "c:after_shutdown",
            "p:after_shutdown"
        ]
    );

    system.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn actor_shutdown_is_idempotent() {
    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;
    let log = Arc::new(Mutex::new(Vec::new()));
    let actor = system
        .create_actor(tracked("a", &log), ActorOptions::named("a"))
        .await
        .unwrap();

    system.shutdown_actor(actor.name()).await.unwrap();
    // The second call is a no-op with a warning, never an error, and the
    // hooks do not run again.
    system.shutdown_actor(actor.name()).await.unwrap();
    assert_eq!(log.lock().unwrap().len(), 4);

    system.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn system_shutdown_blocks_further_traffic_and_is_idempotent() {
    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;
    let worker = system
        .create_actor(Props::new(|| Noop), ActorOptions::named("worker"))
        .await
        .unwrap();

    system.shutdown().await.unwrap();
    assert!(!system.is_running());

    assert!(matches!(
        worker.send(Msg::Probe).await,
        Err(ActorError::SystemShutDown)
    ));
    assert!(matches!(
        system
            .create_actor(Props::new(|| Noop), ActorOptions::named("late"))
            .await,
        Err(ActorError::SystemShutDown)
    ));

    // A second shutdown is a no-op.
    system.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn references_stay_valid_across_restart() {
    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;
    let log = Arc::new(Mutex::new(Vec::new()));
    let actor = system
        .create_actor(tracked("r", &log), ActorOptions::named("r"))
        .await
        .unwrap();

    system.restart_actor(actor.name()).await.unwrap();

    assert!(!actor.is_shutdown().await);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "r:before_start",
            "r:after_start",
            "r:before_start",
            "r:after_start"
        ]
    );

    system.shutdown().await.unwrap();
}
