//! Watcher activation workflow and the facade the outer bridge calls.
//!
//! Each `add_watcher` call is an independent activation attempt:
//!
//! ```text
//! CheckingPermission → (PromptingPermission)? → (FetchingStaleFix)?
//!     → Subscribing → Done | Rejected
//! ```
//!
//! A prompt can suspend an attempt for as long as the user dawdles; other
//! attempts are never blocked by it, and concurrent prompts for the same
//! capability collapse into one via [`PermissionBroker`].

use crate::error::{GeoError, Result};
use crate::location::{PositionSink, WatcherEvent, WatcherId, WatcherOptions};
use crate::permission::PermissionBroker;
use crate::platform::{
    Capability, ContextBinder, NotificationFactory, PermissionAuthority, PermissionState,
    PositionSource, PromptOutcome,
};
use crate::presence::ForegroundPresenceController;
use crate::registry::WatcherRegistry;
use crate::supervisor::ConnectionSupervisor;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

/// The set of platform collaborators an embedder supplies.
pub struct PlatformServices {
    pub source: Arc<dyn PositionSource>,
    pub notifications: Arc<dyn NotificationFactory>,
    pub authority: Arc<dyn PermissionAuthority>,
    pub binder: Arc<dyn ContextBinder>,
}

/// Coordinates watchers, permissions, the execution context, and the
/// foreground-notice lifecycle.
pub struct GeolocationManager {
    source: Arc<dyn PositionSource>,
    notifications: Arc<dyn NotificationFactory>,
    broker: PermissionBroker,
    supervisor: ConnectionSupervisor,
    registry: Arc<WatcherRegistry>,
    presence: Arc<ForegroundPresenceController>,
    stale_fetches: TaskTracker,
}

impl GeolocationManager {
    pub fn new(services: PlatformServices) -> Arc<Self> {
        let supervisor = ConnectionSupervisor::new(services.binder);
        let presence = Arc::new(ForegroundPresenceController::new(supervisor.clone()));
        let registry = Arc::new(WatcherRegistry::new(
            Arc::clone(&services.source),
            Arc::clone(&presence),
        ));

        // A foreground context must never outlive the app. If the platform
        // reports a disconnect, drop every watcher immediately; the registry
        // is rebuilt from scratch by subsequent activations.
        supervisor.set_on_disconnect({
            let registry = Arc::clone(&registry);
            Arc::new(move || registry.teardown_all())
        });

        Arc::new(Self {
            source: services.source,
            notifications: services.notifications,
            broker: PermissionBroker::new(services.authority),
            supervisor,
            registry,
            presence,
            stale_fetches: TaskTracker::new(),
        })
    }

    /// Activate a watcher with a generated id.
    pub async fn add_watcher(&self, options: WatcherOptions, sink: PositionSink) -> Result<WatcherId> {
        self.add_watcher_as(WatcherId::generate(), options, sink)
            .await
    }

    /// Activate a watcher under a caller-supplied id.
    ///
    /// Runs the full activation workflow; authorization failures are
    /// terminal for this attempt and reported to the caller, while notice
    /// construction failures degrade to "no notice" and are only logged.
    pub async fn add_watcher_as(
        &self,
        id: WatcherId,
        options: WatcherOptions,
        sink: PositionSink,
    ) -> Result<WatcherId> {
        if self.broker.state(Capability::Location) != PermissionState::Granted {
            if !options.request_permissions {
                return Err(GeoError::NotAuthorized("permission denied".to_owned()));
            }
            match self.broker.request(Capability::Location).await {
                PromptOutcome::Granted => {
                    // Permission may have been missing while other watchers
                    // were already subscribed; their providers went quiet
                    // when it was revoked. One corrective restart, not a
                    // retry loop.
                    if self.supervisor.current().is_some() {
                        self.registry.restart_all();
                    }
                }
                PromptOutcome::Denied => {
                    return Err(GeoError::NotAuthorized(
                        "user denied location permission".to_owned(),
                    ));
                }
                PromptOutcome::Cancelled => {
                    return Err(GeoError::Cancelled(
                        "teardown interrupted the permission prompt".to_owned(),
                    ));
                }
            }
        }

        if options.stale {
            self.spawn_stale_fetch(id.clone(), sink.clone());
        }

        // Checked only after permission is confirmed: a prompt should not be
        // shown to a user who cannot act on it anyway.
        if !self.source.services_enabled() {
            return Err(GeoError::NotAuthorized(
                "location services disabled".to_owned(),
            ));
        }

        self.supervisor.get().await?;

        let notice = options.notice().and_then(|config| {
            match self.notifications.build(&config) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    // The watcher still runs, just without the persistent
                    // notice and its durability guarantee.
                    tracing::error!(watcher = %id, "failed to build notice: {err}");
                    None
                }
            }
        });

        self.registry
            .add(id.clone(), options.filter(), notice, sink)?;
        Ok(id)
    }

    /// Remove a watcher and close its subscription.
    pub fn remove_watcher(&self, id: &WatcherId) -> Result<()> {
        self.registry.remove(id)
    }

    /// Out-of-band grant notification (e.g. the user flipped the toggle in
    /// the system settings screen). Restarts every subscription once so
    /// providers that went quiet on revoke resume delivering.
    pub fn on_permission_granted(&self) {
        if self.supervisor.current().is_some() {
            self.registry.restart_all();
        }
    }

    /// App came back to the foreground. Whether watchers were degraded while
    /// paused is derived from current permission state, not from a stored
    /// flag: if permission is granted now and watchers exist, restart them.
    pub fn on_app_resumed(&self) {
        if self.broker.state(Capability::Location) == PermissionState::Granted
            && !self.registry.is_empty()
        {
            self.on_permission_granted();
        }
    }

    /// Presence state, for observability.
    #[must_use]
    pub fn presence(&self) -> crate::presence::PresenceState {
        self.presence.state()
    }

    #[must_use]
    pub fn registry(&self) -> &WatcherRegistry {
        &self.registry
    }

    /// Whole-system teardown: cancel pending prompts (`Cancelled`, not
    /// `NotAuthorized`), destroy all watchers atomically, then stop the
    /// execution context.
    pub async fn teardown(&self) {
        self.broker.cancel_all();
        self.registry.teardown_all();
        self.supervisor.teardown();
        self.stale_fetches.close();
        self.stale_fetches.wait().await;
    }

    /// Opportunistic last-known fix, delivered without blocking activation.
    /// No fix and fetch failures are silently ignored.
    fn spawn_stale_fetch(&self, id: WatcherId, sink: PositionSink) {
        let source = Arc::clone(&self.source);
        self.stale_fetches.spawn(async move {
            if let Some(position) = source.fetch_once().await {
                let _ = sink.send(WatcherEvent {
                    watcher_id: id,
                    position,
                });
            }
        });
    }
}
