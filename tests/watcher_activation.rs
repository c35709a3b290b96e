//! End-to-end activation workflow tests: permission gating, prompt
//! coalescing, stale fixes, and graceful degradation, all against the mock
//! platform collaborators.

use geowatch::testing::{
    MockContextBinder, MockNotificationFactory, MockPermissionAuthority, MockPositionSource,
};
use geowatch::{
    GeoError, GeolocationManager, PermissionState, Position, PositionSink, PromptOutcome,
    WatcherEvent, WatcherId, WatcherOptions,
    manager::PlatformServices,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

struct Rig {
    source: Arc<MockPositionSource>,
    notifications: Arc<MockNotificationFactory>,
    authority: Arc<MockPermissionAuthority>,
    binder: Arc<MockContextBinder>,
    manager: Arc<GeolocationManager>,
}

fn rig(permission: PermissionState) -> Rig {
    init_logging();
    let source = Arc::new(MockPositionSource::new());
    let notifications = Arc::new(MockNotificationFactory::new());
    let authority = Arc::new(MockPermissionAuthority::new(permission));
    let binder = Arc::new(MockContextBinder::new());
    let manager = GeolocationManager::new(PlatformServices {
        source: Arc::clone(&source) as _,
        notifications: Arc::clone(&notifications) as _,
        authority: Arc::clone(&authority) as _,
        binder: Arc::clone(&binder) as _,
    });
    Rig {
        source,
        notifications,
        authority,
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

#[tokio::test]
async fn granted_permission_activates_and_delivers() {
    let rig = rig(PermissionState::Granted);
    let (tx, mut rx) = sink();

    let id = rig
        .manager
        .add_watcher(WatcherOptions::default(), tx)
        .await
        .unwrap();
    assert_eq!(rig.manager.registry().len(), 1);
    assert_eq!(rig.authority.prompt_count(), 0);
    assert_eq!(rig.binder.bind_count(), 1);

    rig.source.push(Position::at(55.9533, -3.1883));
    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.watcher_id, id);
    assert_eq!(event.position.longitude, -3.1883);
}

#[tokio::test]
async fn prompting_disallowed_rejects_without_prompt() {
    let rig = rig(PermissionState::Unknown);
    let (tx, _rx) = sink();

    let err = rig
        .manager
        .add_watcher(
            WatcherOptions {
                request_permissions: false,
                ..Default::default()
            },
            tx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GeoError::NotAuthorized(_)));
    assert_eq!(rig.authority.prompt_count(), 0);
    assert!(rig.manager.registry().is_empty());
}

#[tokio::test]
async fn concurrent_activations_coalesce_into_one_prompt() {
    let rig = rig(PermissionState::Unknown);
    let (tx_a, _rx_a) = sink();
    let (tx_b, _rx_b) = sink();

    let a = tokio::spawn({
        let manager = Arc::clone(&rig.manager);
        async move {
            manager
                .add_watcher_as(WatcherId::from("a"), WatcherOptions::default(), tx_a)
                .await
        }
    });
    let b = tokio::spawn({
        let manager = Arc::clone(&rig.manager);
        async move {
            manager
                .add_watcher_as(WatcherId::from("b"), WatcherOptions::default(), tx_b)
                .await
        }
    });

    rig.authority.wait_for_prompts(1).await;
    tokio::task::yield_now().await;
    rig.authority.resolve(PromptOutcome::Granted);

    let a = timeout(Duration::from_secs(5), a).await.unwrap().unwrap();
    let b = timeout(Duration::from_secs(5), b).await.unwrap().unwrap();
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(rig.authority.prompt_count(), 1, "prompts must coalesce");
    assert_eq!(rig.manager.registry().len(), 2);
}

#[tokio::test]
async fn denied_prompt_rejects_all_waiters() {
    let rig = rig(PermissionState::Unknown);
    let (tx_a, _rx_a) = sink();
    let (tx_b, _rx_b) = sink();

    let a = tokio::spawn({
        let manager = Arc::clone(&rig.manager);
        async move { manager.add_watcher(WatcherOptions::default(), tx_a).await }
    });
    let b = tokio::spawn({
        let manager = Arc::clone(&rig.manager);
        async move { manager.add_watcher(WatcherOptions::default(), tx_b).await }
    });

    rig.authority.wait_for_prompts(1).await;
    tokio::task::yield_now().await;
    rig.authority.resolve(PromptOutcome::Denied);

    for handle in [a, b] {
        let err = timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, GeoError::NotAuthorized(_)));
    }
    assert!(rig.manager.registry().is_empty());
    assert_eq!(rig.authority.prompt_count(), 1);
}

#[tokio::test]
async fn teardown_during_prompt_yields_cancelled_not_denied() {
    let rig = rig(PermissionState::Unknown);
    let (tx, _rx) = sink();

    let pending = tokio::spawn({
        let manager = Arc::clone(&rig.manager);
        async move { manager.add_watcher(WatcherOptions::default(), tx).await }
    });
    rig.authority.wait_for_prompts(1).await;

    rig.manager.teardown().await;

    let err = timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(
        matches!(err, GeoError::Cancelled(_)),
        "teardown must cancel, not deny: {err}"
    );
}

#[tokio::test]
async fn disabled_location_services_reject_after_permission() {
    let rig = rig(PermissionState::Granted);
    rig.source.set_services_enabled(false);
    let (tx, _rx) = sink();

    let err = rig
        .manager
        .add_watcher(WatcherOptions::default(), tx)
        .await
        .unwrap_err();
    match err {
        GeoError::NotAuthorized(message) => {
            // Same kind as a denial, distinguishable message.
            assert!(message.contains("services"), "unexpected message: {message}");
        }
        other => panic!("expected NotAuthorized, got {other}"),
    }
    // Never got far enough to bind the execution context.
    assert_eq!(rig.binder.bind_count(), 0);
}

#[tokio::test]
async fn stale_fix_is_delivered_best_effort() {
    let rig = rig(PermissionState::Granted);
    rig.source.set_last_known(Some(Position::at(51.5074, -0.1278)));
    let (tx, mut rx) = sink();

    let id = rig
        .manager
        .add_watcher(
            WatcherOptions {
                stale: true,
                ..Default::default()
            },
            tx,
        )
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.watcher_id, id);
    assert_eq!(event.position.latitude, 51.5074);
}

#[tokio::test]
async fn missing_stale_fix_is_silently_ignored() {
    let rig = rig(PermissionState::Granted);
    let (tx, mut rx) = sink();

    rig.manager
        .add_watcher(
            WatcherOptions {
                stale: true,
                ..Default::default()
            },
            tx,
        )
        .await
        .unwrap();
    // Activation succeeded; nothing arrives until a real sample does.
    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err());

    rig.source.push(Position::at(48.8566, 2.3522));
    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.position.latitude, 48.8566);
}

#[tokio::test]
async fn failed_notice_build_degrades_to_no_notice() {
    let rig = rig(PermissionState::Granted);
    rig.notifications.fail_builds(true);
    let (tx, mut rx) = sink();

    rig.manager
        .add_watcher(
            WatcherOptions {
                background_message: Some("tracking".to_owned()),
                ..Default::default()
            },
            tx,
        )
        .await
        .unwrap();
    assert_eq!(rig.notifications.build_count(), 1);
    // No notice means no requirement to foreground, but samples still flow.
    assert!(!rig.manager.registry().any_requires_notice());
    rig.source.push(Position::at(40.4168, -3.7038));
    assert!(
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn duplicate_caller_supplied_id_is_rejected() {
    let rig = rig(PermissionState::Granted);
    let (tx, _rx) = sink();
    let (tx2, _rx2) = sink();

    rig.manager
        .add_watcher_as(WatcherId::from("dup"), WatcherOptions::default(), tx)
        .await
        .unwrap();
    let err = rig
        .manager
        .add_watcher_as(WatcherId::from("dup"), WatcherOptions::default(), tx2)
        .await
        .unwrap_err();
    assert!(matches!(err, GeoError::DuplicateId(_)));
    assert_eq!(rig.manager.registry().len(), 1);
}

#[tokio::test]
async fn remove_watcher_with_unknown_id_is_an_error() {
    let rig = rig(PermissionState::Granted);
    let err = rig
        .manager
        .remove_watcher(&WatcherId::from("never-added"))
        .unwrap_err();
    assert!(matches!(err, GeoError::NotFound(_)));
}
