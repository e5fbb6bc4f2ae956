// tests/loopback_tests.rs
//
// Wires the controller to the loopback transport and the transport event
// task, the way the server binary does.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use tunebot_core::eventbus::{EventBus, PlaybackEvent};
use tunebot_core::models::{ChatId, CloseReason, PlayerState};
use tunebot_core::platforms::{Catalog, CatalogEntry, CatalogResolver, LoopbackTransport};
use tunebot_core::services::spawn_transport_event_task;
use tunebot_core::tasks::idle_sweep::spawn_idle_sweep_task;
use tunebot_core::{BotConfig, PlaybackController, SessionStore};

struct Rig {
    controller: Arc<PlaybackController>,
    transport: Arc<LoopbackTransport>,
    store: Arc<SessionStore>,
    event_bus: Arc<EventBus>,
}

fn rig(config: BotConfig) -> Rig {
    let catalog = Catalog::new(vec![
        CatalogEntry::new("Short One", "Loop", 1, "loopback://one"),
        CatalogEntry::new("Short Two", "Loop", 1, "loopback://two"),
        CatalogEntry::new("Long", "Loop", 600, "loopback://long"),
    ]);
    let (events_tx, events_rx) = mpsc::channel(64);
    let transport = Arc::new(LoopbackTransport::new(catalog.clone(), events_tx).with_speed(20.0));
    let store = Arc::new(SessionStore::from_config(&config));
    let event_bus = Arc::new(EventBus::new());
    let controller = Arc::new(PlaybackController::new(
        store.clone(),
        Arc::new(CatalogResolver::new(catalog)),
        transport.clone(),
        event_bus.clone(),
        config,
    ));
    spawn_transport_event_task(controller.clone(), events_rx, &event_bus);
    Rig {
        controller,
        transport,
        store,
        event_bus,
    }
}

async fn wait_for<F>(mut rx: mpsc::Receiver<PlaybackEvent>, pred: F) -> PlaybackEvent
where
    F: Fn(&PlaybackEvent) -> bool,
{
    timeout(Duration::from_secs(3), async move {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn queue_plays_through_to_idle() {
    let r = rig(BotConfig::default());
    let rx = r.event_bus.subscribe(Some(64)).await;
    let chat = ChatId(10);

    r.controller.play(chat, Some("short one"), None).await.unwrap();
    r.controller.enqueue(chat, "short two", None).await.unwrap();

    wait_for(rx, |e| matches!(e, PlaybackEvent::QueueFinished { .. })).await;

    assert_eq!(r.controller.get_state(chat), PlayerState::Idle);
    assert!(r.controller.get_queue(chat).is_empty());
    let history: Vec<String> = r.controller.get_history(chat).into_iter().map(|t| t.title).collect();
    assert_eq!(history, vec!["Short One", "Short Two"]);
    assert_eq!(r.transport.active_count(), 0);
    r.event_bus.shutdown();
}

#[tokio::test]
async fn kick_tears_the_session_down() {
    let r = rig(BotConfig::default());
    let rx = r.event_bus.subscribe(Some(64)).await;
    let chat = ChatId(11);

    r.controller.play(chat, Some("long"), None).await.unwrap();
    r.transport.disconnect(chat, "kicked").await;

    let closed = wait_for(rx, |e| matches!(e, PlaybackEvent::SessionClosed { .. })).await;
    assert!(matches!(
        closed,
        PlaybackEvent::SessionClosed { reason: CloseReason::Disconnected, .. }
    ));
    assert!(!r.store.contains(chat));
    assert_eq!(r.transport.active_count(), 0);
    r.event_bus.shutdown();
}

#[tokio::test]
async fn idle_sweep_only_takes_sessions_with_nothing_to_play() {
    let config = BotConfig {
        idle_timeout: Duration::from_millis(50),
        sweep_interval: Duration::from_millis(20),
        ..BotConfig::default()
    };
    let r = rig(config.clone());
    let sweeper = spawn_idle_sweep_task(
        r.store.clone(),
        r.event_bus.clone(),
        config.sweep_interval,
        config.idle_timeout,
    );

    let paused = ChatId(20);
    let idle = ChatId(21);
    let pending = ChatId(22);
    r.controller.play(paused, Some("long"), None).await.unwrap();
    r.controller.pause(paused).await.unwrap();
    r.controller.enqueue(idle, "long", None).await.unwrap();
    r.controller.remove(idle, 1).await.unwrap();
    r.controller.enqueue(pending, "long", None).await.unwrap();

    sleep(Duration::from_millis(250)).await;

    assert!(r.store.contains(paused));
    assert_eq!(r.controller.get_state(paused), PlayerState::Paused);
    assert!(!r.store.contains(idle));
    // Queued but never started: kept until someone plays or stops it.
    assert!(r.store.contains(pending));
    assert_eq!(r.controller.get_queue(pending).len(), 1);

    r.event_bus.shutdown();
    sweeper.await.unwrap();
}
