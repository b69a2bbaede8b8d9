//! End-to-end publisher/loader behavior over the in-memory store

mod common;

use common::*;
use futures::StreamExt;
use modelcast_core::{decode_record, ArtifactStore, Error, InMemoryStore, StoreOp};
use modelcast_protocol::{LoaderConfig, LoaderState, NotifyOutcome};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_announced_version_is_always_behind_pointer() {
    let store = Arc::new(InMemoryStore::new());
    let publisher = publisher(&store);
    let mut updates = store.subscribe(CHANNEL).await.unwrap();

    let observer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut checked = 0;
            while let Some(announced) = updates.next().await {
                let announced = version(&announced);

                let current = store.get("model:current").await.unwrap();
                let current = decode_record(&current.expect("pointer missing after notify")).unwrap();
                assert!(
                    !current.version_id.precedes(&announced),
                    "pointer {} behind announced {}",
                    current.version_id,
                    announced
                );

                let by_id = store.get(&format!("model:{}", current.version_id)).await.unwrap();
                assert!(by_id.is_some(), "pointer references unwritten {}", current.version_id);
                let announced_record = store.get(&format!("model:{}", announced)).await.unwrap();
                assert!(announced_record.is_some(), "announced unwritten {}", announced);

                checked += 1;
                if announced.as_str() == "v20" {
                    return checked;
                }
            }
            checked
        })
    };

    for i in 1..=20 {
        publisher
            .publish(version(&format!("v{}", i)), vec![i as u8; 32], i)
            .await
            .unwrap();
        tokio::task::yield_now().await;
    }

    assert_eq!(within(observer).await.unwrap(), 20);
}

#[tokio::test]
async fn test_each_publish_writes_before_pointing_before_announcing() {
    let store = Arc::new(InMemoryStore::new());
    let publisher = publisher(&store);

    for id in ["v1", "v2", "v3"] {
        publisher.publish(version(id), id.as_bytes(), 0).await.unwrap();
    }

    let ops = store.operations();
    for (step, id) in ["v1", "v2", "v3"].iter().enumerate() {
        let base = step * 3;
        assert_eq!(ops[base], StoreOp::Put(format!("model:{}", id)));
        assert_eq!(ops[base + 1], StoreOp::Put("model:current".into()));
        assert_eq!(
            ops[base + 2],
            StoreOp::Publish {
                channel: CHANNEL.into(),
                payload: id.to_string(),
            }
        );
    }
}

#[tokio::test]
async fn test_pointer_matches_latest_artifact() {
    let store = Arc::new(InMemoryStore::new());
    let publisher = publisher(&store);

    for i in 1..=5 {
        publisher
            .publish(version(&format!("v{}", i)), format!("model-{}", i), i)
            .await
            .unwrap();
    }

    let current = store.raw("model:current").unwrap();
    let latest = store.raw("model:v5").unwrap();
    assert_eq!(current, latest);
    assert_eq!(decode_record(&current).unwrap().payload, b"model-5");
}

#[tokio::test]
async fn test_late_loader_sees_v2_and_v1_stays_intact() {
    let store = Arc::new(InMemoryStore::new());
    let publisher = publisher(&store);

    publisher.publish(version("v1"), b"AAA=".to_vec(), 1000).await.unwrap();
    publisher.publish(version("v2"), b"BBB=".to_vec(), 2000).await.unwrap();

    let loader = spawn_loader(&store, fast_config(), RecordingHandler::new());
    loader.wait_for("v2").await;

    let active = loader.handle.active().unwrap();
    assert_eq!(active.payload, b"BBB=");
    assert_eq!(active.created_at, 2000);
    assert_eq!(loader.handler.activated_ids(), vec!["v2"]);

    let first = decode_record(&store.get("model:v1").await.unwrap().unwrap()).unwrap();
    assert_eq!(first.payload, b"AAA=");
    assert_eq!(first.created_at, 1000);
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_finds_version_whose_notification_failed() {
    let store = Arc::new(InMemoryStore::new());
    store.fail_publishes(true);

    let receipt = publisher(&store)
        .publish(version("v1"), b"one".to_vec(), 1)
        .await
        .unwrap();
    assert!(!receipt.notification.is_delivered());

    let loader = spawn_loader(&store, fast_config(), RecordingHandler::new());
    loader.wait_for("v1").await;
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_subscriber_connected_before_first_publish_ends_on_latest() {
    let store = Arc::new(InMemoryStore::new());
    let loader = spawn_listening_loader(&store, fast_config(), RecordingHandler::new()).await;
    assert_eq!(loader.handle.state(), LoaderState::Bootstrapping);

    let publisher = publisher(&store);
    publisher.publish(version("v1"), b"AAA=".to_vec(), 1).await.unwrap();
    publisher.publish(version("v2"), b"BBB=".to_vec(), 2).await.unwrap();

    loader.wait_for("v2").await;
    assert_eq!(loader.handle.active().unwrap().payload, b"BBB=");

    // Give the second notification time to drain; nothing may move the loader back
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(loader.handle.active_version().unwrap().as_str(), "v2");
    assert_eq!(loader.handler.activated_ids().last().unwrap(), "v2");
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_late_loader_bootstraps_latest_only() {
    let store = Arc::new(InMemoryStore::new());
    let publisher = publisher(&store);
    for i in 1..=5 {
        publisher
            .publish(version(&format!("v{}", i)), vec![i as u8], i)
            .await
            .unwrap();
    }

    let loader = spawn_loader(&store, fast_config(), RecordingHandler::new());
    loader.wait_for("v5").await;

    assert_eq!(loader.handler.activated_ids(), vec!["v5"]);
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_republishing_active_version_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let publisher = publisher(&store);
    publisher.publish(version("v1"), b"weights".to_vec(), 1).await.unwrap();

    let loader = spawn_listening_loader(&store, fast_config(), RecordingHandler::new()).await;
    loader.wait_for("v1").await;

    publisher.publish(version("v1"), b"weights".to_vec(), 1).await.unwrap();
    eventually(|| loader.metrics.snapshot().duplicates_ignored == 1).await;

    assert_eq!(loader.handler.call_count(), 1);
    assert_eq!(loader.metrics.snapshot().activations, 1);
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_pointer_write_is_survivable() {
    let store = Arc::new(InMemoryStore::new());
    let publisher = publisher(&store);
    publisher.publish(version("v1"), b"one".to_vec(), 1).await.unwrap();

    let loader = spawn_listening_loader(&store, fast_config(), RecordingHandler::new()).await;
    loader.wait_for("v1").await;

    store.fail_writes_to("model:current");
    let result = publisher.publish(version("v2"), b"two".to_vec(), 2).await;
    assert!(matches!(result, Err(Error::StoreWrite(_))));

    // Orphaned by id, invisible through the pointer
    assert!(store.raw("model:v2").is_some());
    let current = decode_record(&store.raw("model:current").unwrap()).unwrap();
    assert_eq!(current.version_id.as_str(), "v1");
    assert_eq!(loader.handle.active_version().unwrap().as_str(), "v1");

    store.clear_write_failures();
    publisher.publish(version("v3"), b"three".to_vec(), 3).await.unwrap();
    loader.wait_for("v3").await;

    assert_eq!(loader.handler.activated_ids(), vec!["v1", "v3"]);
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_lost_notification_converges_on_next_one() {
    let store = Arc::new(InMemoryStore::new());
    let loader = spawn_listening_loader(&store, fast_config(), RecordingHandler::new()).await;
    let publisher = publisher(&store);

    store.fail_publishes(true);
    let receipt = publisher.publish(version("v1"), b"one".to_vec(), 1).await.unwrap();
    assert!(matches!(receipt.notification, NotifyOutcome::Failed(_)));
    assert_eq!(loader.handle.state(), LoaderState::Bootstrapping);

    store.fail_publishes(false);
    publisher.publish(version("v2"), b"two".to_vec(), 2).await.unwrap();
    loader.wait_for("v2").await;

    assert_eq!(loader.handler.activated_ids(), vec!["v2"]);
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_polling_catches_silent_publish() {
    let store = Arc::new(InMemoryStore::new());
    let mut config = fast_config();
    config.poll_interval_ms = Some(10);
    let loader = spawn_listening_loader(&store, config, RecordingHandler::new()).await;

    store.fail_publishes(true);
    publisher(&store)
        .publish(version("v1"), b"one".to_vec(), 1)
        .await
        .unwrap();

    loader.wait_for("v1").await;
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_record_keeps_previous_version() {
    let store = Arc::new(InMemoryStore::new());
    let publisher = publisher(&store);
    publisher.publish(version("v1"), b"one".to_vec(), 1).await.unwrap();

    let loader = spawn_listening_loader(&store, fast_config(), RecordingHandler::new()).await;
    loader.wait_for("v1").await;

    store.insert_raw("model:current", "{\"model_id\": \"v2\", \"buffer\": 42}");
    store.publish_message(CHANNEL, "v2").await.unwrap();
    eventually(|| loader.metrics.snapshot().decode_failures == 1).await;

    assert_eq!(loader.handle.active_version().unwrap().as_str(), "v1");
    assert_eq!(loader.handle.active().unwrap().payload, b"one");

    publisher.publish(version("v3"), b"three".to_vec(), 3).await.unwrap();
    loader.wait_for("v3").await;
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_rejected_artifact_keeps_previous_version() {
    let store = Arc::new(InMemoryStore::new());
    let publisher = publisher(&store);
    publisher.publish(version("v1"), b"good".to_vec(), 1).await.unwrap();

    let handler = RecordingHandler::new().rejecting(b"corrupt");
    let loader = spawn_listening_loader(&store, fast_config(), handler).await;
    loader.wait_for("v1").await;

    publisher.publish(version("v2"), b"corrupt".to_vec(), 2).await.unwrap();
    eventually(|| loader.metrics.snapshot().handler_rejections == 1).await;

    assert_eq!(loader.handle.active_version().unwrap().as_str(), "v1");
    assert_eq!(loader.handler.activated_ids(), vec!["v1"]);
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_resubscribes_and_catches_up_after_disconnect() {
    let store = Arc::new(InMemoryStore::new());
    let publisher = publisher(&store);
    publisher.publish(version("v1"), b"one".to_vec(), 1).await.unwrap();

    let loader = spawn_listening_loader(&store, fast_config(), RecordingHandler::new()).await;
    loader.wait_for("v1").await;

    // Published while the connection is down, so never announced
    store.disconnect_subscribers();
    publisher.publish(version("v2"), b"two".to_vec(), 2).await.unwrap();

    loader.wait_for("v2").await;
    eventually(|| store.subscriber_count(CHANNEL) == 1).await;
    assert_eq!(loader.metrics.snapshot().resubscriptions, 1);

    publisher.publish(version("v3"), b"three".to_vec(), 3).await.unwrap();
    loader.wait_for("v3").await;
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_retries_transient_reads() {
    let store = Arc::new(InMemoryStore::new());
    publisher(&store)
        .publish(version("v1"), b"one".to_vec(), 1)
        .await
        .unwrap();

    store.fail_next_reads(3);
    let loader = spawn_loader(&store, fast_config(), RecordingHandler::new());
    loader.wait_for("v1").await;

    assert_eq!(loader.metrics.snapshot().read_retries, 3);
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_stalled_bootstrap_read_times_out_and_retries() {
    let store = Arc::new(InMemoryStore::new());
    publisher(&store)
        .publish(version("v1"), b"one".to_vec(), 1)
        .await
        .unwrap();

    store.stall_next_reads(1);
    let config = LoaderConfig {
        read_timeout_ms: 50,
        ..fast_config()
    };
    let loader = spawn_loader(&store, config, RecordingHandler::new());
    loader.wait_for("v1").await;

    assert_eq!(loader.metrics.snapshot().read_retries, 1);
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_gives_up_after_retry_budget() {
    let store = Arc::new(InMemoryStore::new());
    store.fail_next_reads(100);

    let loader = spawn_loader(&store, fast_config(), RecordingHandler::new());
    let result = within(loader.task).await.unwrap();

    assert!(matches!(result, Err(Error::StoreRead(_))));
    assert_eq!(loader.handle.state(), LoaderState::Bootstrapping);
}

#[tokio::test]
async fn test_subscribe_failures_are_retried() {
    let store = Arc::new(InMemoryStore::new());
    store.fail_next_subscribes(2);

    let loader = spawn_listening_loader(&store, fast_config(), RecordingHandler::new()).await;
    publisher(&store)
        .publish(version("v1"), b"one".to_vec(), 1)
        .await
        .unwrap();

    loader.wait_for("v1").await;
    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_empty_store_waits_for_first_publish() {
    let store = Arc::new(InMemoryStore::new());
    let loader = spawn_listening_loader(&store, fast_config(), RecordingHandler::new()).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(loader.handle.state(), LoaderState::Bootstrapping);
    assert!(loader.handle.active().is_none());
    assert!(!loader.task.is_finished());

    loader.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancellation_releases_subscription() {
    let store = Arc::new(InMemoryStore::new());
    publisher(&store)
        .publish(version("v1"), b"one".to_vec(), 1)
        .await
        .unwrap();

    let loader = spawn_listening_loader(&store, fast_config(), RecordingHandler::new()).await;
    loader.wait_for("v1").await;
    let handle = loader.handle.clone();

    loader.stop().await.unwrap();
    assert_eq!(store.subscriber_count(CHANNEL), 0);
    // The last activated version stays readable after shutdown
    assert_eq!(handle.active_version().unwrap().as_str(), "v1");
}

#[tokio::test]
async fn test_cancel_during_activation_lets_handler_finish() {
    let store = Arc::new(InMemoryStore::new());
    publisher(&store)
        .publish(version("v1"), b"one".to_vec(), 1)
        .await
        .unwrap();

    let handler = RecordingHandler::new().with_latency(Duration::from_millis(200));
    let loader = spawn_loader(&store, fast_config(), handler);
    eventually(|| loader.handler.call_count() == 1).await;

    let handler = Arc::clone(&loader.handler);
    let handle = loader.handle.clone();
    loader.stop().await.unwrap();

    // The handler was allowed to finish and its version was recorded
    assert_eq!(handler.activated_ids(), vec!["v1"]);
    assert_eq!(handle.active_version().unwrap().as_str(), "v1");
}
