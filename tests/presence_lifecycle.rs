//! Foreground-presence lifecycle: the execution context is promoted exactly
//! while at least one notice-requiring watcher is registered.

use geowatch::testing::{
    MockContextBinder, MockNotificationFactory, MockPermissionAuthority, MockPositionSource,
};
use geowatch::{
    GeolocationManager, PermissionState, Position, PositionSink, PresenceState, WatcherEvent,
    WatcherId, WatcherOptions,
    manager::PlatformServices,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

struct Rig {
    source: Arc<MockPositionSource>,
    binder: Arc<MockContextBinder>,
    manager: Arc<GeolocationManager>,
}

fn rig() -> Rig {
    init_logging();
    let source = Arc::new(MockPositionSource::new());
    let binder = Arc::new(MockContextBinder::new());
    let manager = GeolocationManager::new(PlatformServices {
        source: Arc::clone(&source) as _,
        notifications: Arc::new(MockNotificationFactory::new()) as _,
        authority: Arc::new(MockPermissionAuthority::new(PermissionState::Granted)) as _,
        binder: Arc::clone(&binder) as _,
    });
    Rig {
        source,
        binder,
        manager,
    }
}

fn sink() -> (PositionSink, mpsc::UnboundedReceiver<WatcherEvent>) {
    mpsc::unbounded_channel()
}

/// `RUST_LOG`-filtered output for debugging test runs.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn background() -> WatcherOptions {
    WatcherOptions {
        background_message: Some("Tracking your run".to_owned()),
        ..Default::default()
    }
}

#[tokio::test]
async fn presence_follows_notice_watchers_through_the_walk() {
    let rig = rig();

    // Add A, no notice: stays Idle.
    let (tx_a, _rx_a) = sink();
    rig.manager
        .add_watcher_as(WatcherId::from("a"), WatcherOptions::default(), tx_a)
        .await
        .unwrap();
    assert_eq!(rig.manager.registry().len(), 1);
    assert_eq!(rig.manager.presence(), PresenceState::Idle);
    assert_eq!(rig.binder.context().promote_count(), 0);

    // Add B with notice: promoted.
    let (tx_b, _rx_b) = sink();
    rig.manager
        .add_watcher_as(WatcherId::from("b"), background(), tx_b)
        .await
        .unwrap();
    assert_eq!(rig.manager.presence(), PresenceState::Foreground);
    assert!(rig.binder.context().promote_count() >= 1);

    // Remove A: B still requires the notice.
    rig.manager.remove_watcher(&WatcherId::from("a")).unwrap();
    assert_eq!(rig.manager.presence(), PresenceState::Foreground);

    // Remove B: demoted.
    rig.manager.remove_watcher(&WatcherId::from("b")).unwrap();
    assert_eq!(rig.manager.presence(), PresenceState::Idle);
    assert!(rig.binder.context().demote_count() >= 1);
}

#[tokio::test]
async fn one_notice_lifecycle_for_many_notice_watchers() {
    let rig = rig();

    let (tx_a, _rx_a) = sink();
    let (tx_b, _rx_b) = sink();
    rig.manager
        .add_watcher_as(WatcherId::from("a"), background(), tx_a)
        .await
        .unwrap();
    rig.manager
        .add_watcher_as(WatcherId::from("b"), background(), tx_b)
        .await
        .unwrap();
    assert_eq!(rig.manager.presence(), PresenceState::Foreground);

    // Dropping one of two notice watchers keeps the context promoted; the
    // promotion call repeats because there is no "already promoted" query.
    let before = rig.binder.context().promote_count();
    rig.manager.remove_watcher(&WatcherId::from("a")).unwrap();
    assert_eq!(rig.manager.presence(), PresenceState::Foreground);
    assert!(rig.binder.context().promote_count() > before);

    rig.manager.remove_watcher(&WatcherId::from("b")).unwrap();
    assert_eq!(rig.manager.presence(), PresenceState::Idle);
}

#[tokio::test]
async fn promotion_failure_never_stops_delivery() {
    let rig = rig();
    rig.binder.context().fail_promotions(true);

    let (tx, mut rx) = sink();
    rig.manager
        .add_watcher_as(WatcherId::from("a"), background(), tx)
        .await
        .unwrap();
    // Promotion failed, requirement still tracked.
    assert_eq!(rig.manager.presence(), PresenceState::Foreground);

    rig.source.push(Position::at(59.9139, 10.7522));
    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.position.latitude, 59.9139);
}

#[tokio::test]
async fn teardown_demotes_and_stops_the_context() {
    let rig = rig();
    let (tx, _rx) = sink();
    rig.manager
        .add_watcher_as(WatcherId::from("a"), background(), tx)
        .await
        .unwrap();
    assert_eq!(rig.manager.presence(), PresenceState::Foreground);

    rig.manager.teardown().await;
    assert_eq!(rig.manager.presence(), PresenceState::Idle);
    assert!(rig.manager.registry().is_empty());
    assert!(rig.binder.context().stopped());
    assert_eq!(rig.source.active_subscriptions(), 0);
}
