//! The live watcher set.
//!
//! Mutations are serialized by a single lock, and the foreground-presence
//! transition triggered by a mutation runs before that lock is released, so
//! presence can never be observed out of step with the watcher set.
//!
//! Samples are delivered through a per-watcher sink captured at `add` time;
//! there is no shared dispatch bus to filter.

use crate::error::{GeoError, Result};
use crate::location::{FilterConfig, PositionSink, WatcherEvent, WatcherId};
use crate::platform::{NoticeHandle, PositionDelivery, PositionSource, SubscriptionHandle};
use crate::presence::ForegroundPresenceController;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct Watcher {
    filter: FilterConfig,
    notice: Option<NoticeHandle>,
    /// Live from insertion until removal; replaced (never cleared) on
    /// restart.
    subscription: SubscriptionHandle,
    sink: PositionSink,
}

/// Thread-safe registry of live watchers.
pub struct WatcherRegistry {
    source: Arc<dyn PositionSource>,
    presence: Arc<ForegroundPresenceController>,
    watchers: Mutex<HashMap<WatcherId, Watcher>>,
}

impl WatcherRegistry {
    pub fn new(
        source: Arc<dyn PositionSource>,
        presence: Arc<ForegroundPresenceController>,
    ) -> Self {
        Self {
            source,
            presence,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Open a subscription and register the watcher.
    ///
    /// Fails with [`GeoError::DuplicateId`] if `id` is already present,
    /// leaving the registry unchanged.
    pub fn add(
        &self,
        id: WatcherId,
        filter: FilterConfig,
        notice: Option<NoticeHandle>,
        sink: PositionSink,
    ) -> Result<()> {
        let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
        if watchers.contains_key(&id) {
            return Err(GeoError::DuplicateId(id));
        }
        let subscription = self.source.subscribe(&filter, delivery(&id, &sink))?;
        tracing::debug!(watcher = %id, "watcher registered");
        watchers.insert(
            id,
            Watcher {
                filter,
                notice,
                subscription,
                sink,
            },
        );
        self.presence.sync(first_notice(&watchers).as_ref());
        Ok(())
    }

    /// Close the watcher's subscription and drop it from the set.
    ///
    /// Fails with [`GeoError::NotFound`] for unknown ids: the caller's
    /// bookkeeping is authoritative, so a stray remove is a caller error
    /// rather than a silent no-op.
    pub fn remove(&self, id: &WatcherId) -> Result<()> {
        let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
        let Some(watcher) = watchers.remove(id) else {
            return Err(GeoError::NotFound(id.clone()));
        };
        self.source.unsubscribe(&watcher.subscription);
        tracing::debug!(watcher = %id, "watcher removed");
        self.presence.sync(first_notice(&watchers).as_ref());
        Ok(())
    }

    /// Close and reopen every subscription with its original configuration.
    ///
    /// Used once after an out-of-band permission grant: providers silently
    /// stop delivering when permission is revoked and do not auto-resume. A
    /// reopen failure is logged and the watcher keeps its previous handle.
    pub fn restart_all(&self) {
        let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
        for (id, watcher) in watchers.iter_mut() {
            self.source.unsubscribe(&watcher.subscription);
            match self.source.subscribe(&watcher.filter, delivery(id, &watcher.sink)) {
                Ok(subscription) => watcher.subscription = subscription,
                Err(err) => {
                    tracing::warn!(watcher = %id, "failed to reopen subscription: {err}");
                }
            }
        }
        tracing::info!(count = watchers.len(), "restarted all watcher subscriptions");
    }

    /// Whether any registered watcher requires a persistent notice.
    #[must_use]
    pub fn any_requires_notice(&self) -> bool {
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .any(|w| w.notice.is_some())
    }

    /// The notice to show while promoted: any registered watcher's notice.
    #[must_use]
    pub fn first_notice(&self) -> Option<NoticeHandle> {
        first_notice(&self.watchers.lock().unwrap_or_else(|e| e.into_inner()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.watchers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The watcher's current subscription handle. Changes identity when the
    /// subscription is reopened by [`restart_all`](Self::restart_all).
    #[must_use]
    pub fn subscription_handle(&self, id: &WatcherId) -> Option<SubscriptionHandle> {
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|w| w.subscription.clone())
    }

    /// Close every subscription and empty the set. Used once, at shutdown.
    pub fn teardown_all(&self) {
        let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, watcher) in watchers.drain() {
            self.source.unsubscribe(&watcher.subscription);
        }
        self.presence.sync(None);
    }
}

fn first_notice(watchers: &HashMap<WatcherId, Watcher>) -> Option<NoticeHandle> {
    watchers.values().find_map(|w| w.notice.clone())
}

fn delivery(id: &WatcherId, sink: &PositionSink) -> PositionDelivery {
    let id = id.clone();
    let sink = sink.clone();
    Arc::new(move |position| {
        // A closed sink means the caller went away; samples are dropped
        // until the watcher is removed.
        let _ = sink.send(WatcherEvent {
            watcher_id: id.clone(),
            position,
        });
    })
}
