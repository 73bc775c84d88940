//! Supervision strategies: Resume, Restart, Shutdown and their fallbacks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use troupe_runtime::{
    Actor, ActorContext, ActorError, ActorOptions, ActorRef, ActorSystem, ActorSystemOptions,
    Props, Result, SupervisionStrategy, SystemEvent,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Msg {
    Inc,
    Fail,
    Get,
    Count(u32),
}

#[derive(Default)]
struct Counter {
    count: u32,
}

#[async_trait]
impl Actor<Msg> for Counter {
    async fn receive(
        &mut self,
        _ctx: &ActorContext<Msg>,
        _from: ActorRef<Msg>,
        message: Msg,
    ) -> Result<Option<Msg>> {
        match message {
            Msg::Inc => {
                self.count += 1;
                Ok(None)
            }
            Msg::Fail => Err(ActorError::failure("boom")),
            Msg::Get => Ok(Some(Msg::Count(self.count))),
            Msg::Count(_) => Ok(None),
        }
    }
}

async fn wait_until_shutdown(actor: &ActorRef<Msg>) {
    for _ in 0..200 {
        if actor.is_shutdown().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("actor {} never shut down", actor.name());
}

#[test_log::test(tokio::test)]
async fn resume_keeps_state_and_drops_the_failed_message() {
    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;
    let counter = system
        .create_actor(
            Props::new(Counter::default),
            ActorOptions::named("counter").with_strategy(SupervisionStrategy::Resume),
        )
        .await
        .unwrap();

    for _ in 0..3 {
        counter.send(Msg::Inc).await.unwrap();
    }
    counter.send(Msg::Fail).await.unwrap();
    counter.send(Msg::Inc).await.unwrap();

    let answer = counter.ask(Msg::Get, Duration::from_secs(2)).await.unwrap();
    assert_eq!(answer, Some(Msg::Count(4)));
    assert!(!counter.is_shutdown().await);

    system.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn restart_replaces_the_instance_and_resets_state() {
    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;
    let counter = system
        .create_actor(
            Props::new(Counter::default),
            ActorOptions::named("counter").with_strategy(SupervisionStrategy::Restart),
        )
        .await
        .unwrap();

    for _ in 0..3 {
        counter.send(Msg::Inc).await.unwrap();
    }
    counter.send(Msg::Fail).await.unwrap();
    counter.send(Msg::Inc).await.unwrap();

    // Only the post-restart increment survives.
    let answer = counter.ask(Msg::Get, Duration::from_secs(2)).await.unwrap();
    assert_eq!(answer, Some(Msg::Count(1)));
    assert!(!counter.is_shutdown().await);

    system.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn shutdown_strategy_removes_the_actor() {
    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;
    // Shutdown is the default strategy.
    let counter = system
        .create_actor(Props::new(Counter::default), ActorOptions::named("counter"))
        .await
        .unwrap();

    counter.send(Msg::Fail).await.unwrap();
    wait_until_shutdown(&counter).await;

    let outcome = counter.ask(Msg::Get, Duration::from_secs(2)).await;
    assert!(matches!(outcome, Err(ActorError::Undeliverable { .. })));

    system.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn failed_handler_never_answers_a_pending_ask() {
    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;
    let counter = system
        .create_actor(
            Props::new(Counter::default),
            ActorOptions::named("counter").with_strategy(SupervisionStrategy::Resume),
        )
        .await
        .unwrap();

    // The handler fails immediately; the ask still runs into its timeout
    // rather than observing the failure.
    let outcome = counter.ask(Msg::Fail, Duration::from_millis(100)).await;
    assert!(matches!(
        outcome,
        Err(ActorError::AskTimeout { timeout_ms: 100, .. })
    ));

    system.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn handler_failures_are_reported_to_the_error_receiver() {
    struct EventProbe {
        events: mpsc::UnboundedSender<SystemEvent<Msg>>,
    }

    #[async_trait]
    impl Actor<Msg> for EventProbe {
        async fn receive(
            &mut self,
            _ctx: &ActorContext<Msg>,
            _from: ActorRef<Msg>,
            _message: Msg,
        ) -> Result<Option<Msg>> {
            Ok(None)
        }

        async fn on_system_event(&mut self, _ctx: &ActorContext<Msg>, event: SystemEvent<Msg>) {
            let _ = self.events.send(event);
        }
    }

    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    system
        .create_actor(
            Props::new(move || EventProbe {
                events: events_tx.clone(),
            }),
            ActorOptions::named("probe").as_error_receiver(),
        )
        .await
        .unwrap();
    let counter = system
        .create_actor(
            Props::new(Counter::default),
            ActorOptions::named("counter").with_strategy(SupervisionStrategy::Restart),
        )
        .await
        .unwrap();

    counter.send(Msg::Fail).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        SystemEvent::HandlerFailure {
            actor, strategy, ..
        } => {
            assert_eq!(actor, "actors://test/counter");
            assert_eq!(strategy, SupervisionStrategy::Restart);
        }
        other => panic!("expected a handler failure event, got {other:?}"),
    }

    system.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn failed_restart_falls_back_to_shutdown() {
    /// Starts cleanly the first time, refuses every restart.
    struct OneShot {
        starts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Actor<Msg> for OneShot {
        async fn receive(
            &mut self,
            _ctx: &ActorContext<Msg>,
            _from: ActorRef<Msg>,
            message: Msg,
        ) -> Result<Option<Msg>> {
            match message {
                Msg::Fail => Err(ActorError::failure("boom")),
                _ => Ok(None),
            }
        }

        async fn before_start(&mut self, _ctx: &ActorContext<Msg>) -> Result<()> {
            if self.starts.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err(ActorError::failure("cannot start twice"))
            }
        }
    }

    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;
    let starts = Arc::new(AtomicU32::new(0));
    let starts_in_factory = Arc::clone(&starts);
    let actor = system
        .create_actor(
            Props::new(move || OneShot {
                starts: Arc::clone(&starts_in_factory),
            }),
            ActorOptions::named("oneshot").with_strategy(SupervisionStrategy::Restart),
        )
        .await
        .unwrap();

    actor.send(Msg::Fail).await.unwrap();
    wait_until_shutdown(&actor).await;
    assert_eq!(starts.load(Ordering::SeqCst), 2);

    system.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn restart_rebuilds_children_before_the_parent() {
    struct Tracked {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Actor<Msg> for Tracked {
        async fn receive(
            &mut self,
            _ctx: &ActorContext<Msg>,
            _from: ActorRef<Msg>,
            message: Msg,
        ) -> Result<Option<Msg>> {
            match message {
                Msg::Fail => Err(ActorError::failure("boom")),
                _ => Ok(None),
            }
        }

        async fn before_start(&mut self, _ctx: &ActorContext<Msg>) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:before_start", self.tag));
            Ok(())
        }
    }

    let system = ActorSystem::new(ActorSystemOptions::named("test")).await;
    let log = Arc::new(Mutex::new(Vec::new()));
    let tracked = |tag: &'static str| {
        let log = Arc::clone(&log);
        Props::new(move || Tracked {
            tag,
            log: Arc::clone(&log),
        })
    };

    let parent = system
        .create_actor(
            tracked("p"),
            ActorOptions::named("p").with_strategy(SupervisionStrategy::Restart),
        )
        .await
        .unwrap();
    system
        .create_actor(tracked("c"), ActorOptions::named("c").under(&parent))
        .await
        .unwrap();

    parent.send(Msg::Fail).await.unwrap();

    // Both rebuild, child first.
    for _ in 0..200 {
        if log.lock().unwrap().len() >= 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "p:before_start",
            "c:before_start",
            "c:before_start",
            "p:before_start"
        ]
    );

    system.shutdown().await.unwrap();
}
