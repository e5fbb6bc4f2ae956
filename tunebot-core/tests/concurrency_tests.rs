// tests/concurrency_tests.rs

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use tunebot_core::BotConfig;
use tunebot_core::models::{ChatId, PlayerState, TransportEvent};
use tunebot_core::services::spawn_transport_event_task;
use tunebot_core::test_utils::helpers::{RecordingTransport, StaticResolver, TestHarness};

fn slow_harness(delay: Duration) -> TestHarness {
    TestHarness::with_parts(
        BotConfig::default(),
        StaticResolver::new(),
        RecordingTransport::new().with_delay(delay),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_chats_progress_in_parallel() {
    let h = slow_harness(Duration::from_millis(200));
    let c1 = h.controller.clone();
    let c2 = h.controller.clone();

    let started = Instant::now();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { c1.play(ChatId(1), Some("A"), None).await }),
        tokio::spawn(async move { c2.play(ChatId(2), Some("B"), None).await }),
    );
    let elapsed = started.elapsed();

    assert!(a.unwrap().is_ok());
    assert!(b.unwrap().is_ok());
    assert_eq!(h.transport.max_in_flight(), 2);
    assert!(elapsed < Duration::from_millis(390), "chats were serialized: {:?}", elapsed);
}

#[tokio::test]
async fn same_chat_commands_apply_in_arrival_order() {
    let h = slow_harness(Duration::from_millis(20));
    h.controller.play(ChatId(1), Some("A"), None).await.unwrap();
    h.controller.enqueue(ChatId(1), "B", None).await.unwrap();

    // pause is issued first and must land on A; skip then moves to B.
    let (paused, skipped) = tokio::join!(
        h.controller.pause(ChatId(1)),
        h.controller.skip(ChatId(1)),
    );
    assert!(paused.is_ok());
    assert_eq!(skipped.unwrap().map(|t| t.title).as_deref(), Some("B"));
    assert_eq!(h.controller.get_state(ChatId(1)), PlayerState::Playing);
    assert_eq!(h.transport.max_in_flight(), 1);
}

#[tokio::test]
async fn enqueue_burst_keeps_call_order() {
    let h = slow_harness(Duration::from_millis(5));
    let names = ["a", "b", "c", "d", "e"];
    let futures: Vec<_> = names
        .iter()
        .map(|n| h.controller.enqueue(ChatId(9), n, None))
        .collect();
    let results = futures_util::future::join_all(futures).await;

    let positions: Vec<usize> = results.into_iter().map(|r| r.unwrap().0).collect();
    assert_eq!(positions, vec![1, 2, 3, 4, 5]);
    assert_eq!(h.queue_titles(ChatId(9)), names.to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reads_are_not_blocked_by_inflight_commands() {
    let h = slow_harness(Duration::from_millis(300));
    h.controller.enqueue(ChatId(5), "A", None).await.unwrap();

    let controller = h.controller.clone();
    let play = tokio::spawn(async move { controller.play(ChatId(5), None, None).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let queue = h.controller.get_queue(ChatId(5));
    let state = h.controller.get_state(ChatId(5));
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(queue.len(), 1);
    assert_eq!(state, PlayerState::Idle);

    assert!(play.await.unwrap().is_ok());
    assert_eq!(h.controller.get_state(ChatId(5)), PlayerState::Playing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_stop_and_skip_detach_once() {
    let h = slow_harness(Duration::from_millis(10));
    h.controller.play(ChatId(3), Some("A"), None).await.unwrap();
    h.controller.enqueue(ChatId(3), "B", None).await.unwrap();

    let c1 = h.controller.clone();
    let c2 = h.controller.clone();
    let (stop, skip) = tokio::join!(
        tokio::spawn(async move { c1.stop(ChatId(3)).await }),
        tokio::spawn(async move { c2.skip(ChatId(3)).await }),
    );
    let _ = (stop.unwrap(), skip.unwrap());

    // Either order ends with the session gone and every handle released once.
    assert!(!h.store.contains(ChatId(3)));
    for handle in h.transport.attached_handles() {
        assert_eq!(h.transport.detach_count(handle), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn busy_chat_does_not_hold_up_other_chats_transport_events() {
    let h = TestHarness::new();
    let (busy, other) = (ChatId(1), ChatId(2));
    h.controller.play(busy, Some("A"), None).await.unwrap();
    h.controller.enqueue(busy, "B", None).await.unwrap();
    h.controller.play(other, Some("X"), None).await.unwrap();
    h.controller.enqueue(other, "Y", None).await.unwrap();
    let busy_handle = h.active_handle(busy).unwrap();
    let other_handle = h.active_handle(other).unwrap();

    let (tx, rx) = mpsc::channel(8);
    let task = spawn_transport_event_task(h.controller.clone(), rx, &h.event_bus);

    // A long-running command holds the busy chat's gate.
    let gate = h.store.get(busy).unwrap().lock().await;
    tx.send(TransportEvent::StreamEnded { chat_id: busy, handle: busy_handle })
        .await
        .unwrap();
    tx.send(TransportEvent::StreamEnded { chat_id: other, handle: other_handle })
        .await
        .unwrap();

    timeout(Duration::from_secs(2), async {
        while h.current_title(other).as_deref() != Some("Y") {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("other chat's stream end waited behind the busy chat");
    assert_eq!(h.current_title(busy).as_deref(), Some("A"));

    drop(gate);
    timeout(Duration::from_secs(2), async {
        while h.current_title(busy).as_deref() != Some("B") {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("busy chat's stream end was lost");

    h.event_bus.shutdown();
    assert_eq!(task.await.unwrap(), 2);
}
