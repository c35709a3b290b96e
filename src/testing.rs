//! Mock platform collaborators.
//!
//! Shared by the in-crate unit tests and the integration tests under
//! `tests/`; also useful to embedders wiring the core up in a simulator.
//! Every mock records enough of its call history for tests to assert on
//! subscription identity, prompt counts, and promotion behaviour.

use crate::error::{GeoError, Result};
use crate::location::{FilterConfig, NoticeConfig, Position};
use crate::platform::{
    BoundContext, Capability, ContextBinder, ExecutionContext, NoticeHandle, NotificationFactory,
    PermissionAuthority, PermissionState, PositionDelivery, PositionSource, PromptOutcome,
    SubscriptionHandle,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch};

/// In-memory location provider. Samples are injected with
/// [`push`](MockPositionSource::push) and fan out to every live
/// subscription's delivery callback.
pub struct MockPositionSource {
    subscriptions: Mutex<HashMap<u64, PositionDelivery>>,
    next_token: AtomicU64,
    total: AtomicUsize,
    services_enabled: AtomicBool,
    last_known: Mutex<Option<Position>>,
}

impl MockPositionSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            total: AtomicUsize::new(0),
            services_enabled: AtomicBool::new(true),
            last_known: Mutex::new(None),
        }
    }

    /// Deliver a sample to every live subscription.
    pub fn push(&self, position: Position) {
        let subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for delivery in subscriptions.values() {
            delivery(position.clone());
        }
    }

    pub fn set_services_enabled(&self, enabled: bool) {
        self.services_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_last_known(&self, position: Option<Position>) {
        *self.last_known.lock().unwrap_or_else(|e| e.into_inner()) = position;
    }

    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Subscriptions ever opened, including reopened ones.
    #[must_use]
    pub fn total_subscriptions(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl Default for MockPositionSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PositionSource for MockPositionSource {
    fn subscribe(
        &self,
        _filter: &FilterConfig,
        delivery: PositionDelivery,
    ) -> Result<SubscriptionHandle> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token, delivery);
        Ok(SubscriptionHandle::new(token))
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.token());
    }

    async fn fetch_once(&self) -> Option<Position> {
        self.last_known
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn services_enabled(&self) -> bool {
        self.services_enabled.load(Ordering::SeqCst)
    }
}

/// Notification renderer that mints sequential notice handles, or fails on
/// demand.
pub struct MockNotificationFactory {
    next_token: AtomicU64,
    builds: AtomicUsize,
    fail: AtomicBool,
}

impl MockNotificationFactory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            builds: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail_builds(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl Default for MockNotificationFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationFactory for MockNotificationFactory {
    fn build(&self, _config: &NoticeConfig) -> Result<NoticeHandle> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(GeoError::TransientPlatform(
                "notice construction refused".to_owned(),
            ));
        }
        Ok(NoticeHandle::new(
            self.next_token.fetch_add(1, Ordering::SeqCst),
        ))
    }
}

/// Permission authority with a scriptable prompt.
///
/// [`prompt`](PermissionAuthority::prompt) suspends until
/// [`resolve`](MockPermissionAuthority::resolve) supplies the outcome, which
/// mirrors the user-paced dialog of a real platform. Resolving with
/// `Granted`/`Denied` also updates the reported grant state.
pub struct MockPermissionAuthority {
    state: Mutex<PermissionState>,
    decision: watch::Sender<Option<PromptOutcome>>,
    prompts: AtomicUsize,
}

impl MockPermissionAuthority {
    #[must_use]
    pub fn new(initial: PermissionState) -> Self {
        let (decision, _) = watch::channel(None);
        Self {
            state: Mutex::new(initial),
            decision,
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn set_state(&self, state: PermissionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Complete the outstanding prompt (and any future one) with `outcome`.
    pub fn resolve(&self, outcome: PromptOutcome) {
        match outcome {
            PromptOutcome::Granted => self.set_state(PermissionState::Granted),
            PromptOutcome::Denied => self.set_state(PermissionState::Denied),
            PromptOutcome::Cancelled => {}
        }
        let _ = self.decision.send(Some(outcome));
    }

    #[must_use]
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Busy-yield until at least `n` prompts have been issued.
    pub async fn wait_for_prompts(&self, n: usize) {
        while self.prompt_count() < n {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl PermissionAuthority for MockPermissionAuthority {
    fn state(&self, _capability: Capability) -> PermissionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn prompt(&self, _capability: Capability) -> PromptOutcome {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.decision.subscribe();
        loop {
            if let Some(outcome) = *rx.borrow_and_update() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return PromptOutcome::Cancelled;
            }
        }
    }
}

/// Execution context that records promotions/demotions.
pub struct MockExecutionContext {
    promotions: Mutex<Vec<NoticeHandle>>,
    demotions: AtomicUsize,
    fail_promotions: AtomicBool,
    stopped: AtomicBool,
}

impl MockExecutionContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            promotions: Mutex::new(Vec::new()),
            demotions: AtomicUsize::new(0),
            fail_promotions: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn fail_promotions(&self, fail: bool) {
        self.fail_promotions.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn promote_count(&self) -> usize {
        self.promotions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    #[must_use]
    pub fn last_promoted(&self) -> Option<NoticeHandle> {
        self.promotions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    #[must_use]
    pub fn demote_count(&self) -> usize {
        self.demotions.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for MockExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext for MockExecutionContext {
    fn promote(&self, notice: &NoticeHandle) -> Result<()> {
        self.promotions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notice.clone());
        if self.fail_promotions.load(Ordering::SeqCst) {
            return Err(GeoError::TransientPlatform(
                "foreground promotion refused".to_owned(),
            ));
        }
        Ok(())
    }

    fn demote(&self) {
        self.demotions.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Context binder with a controllable bind gate and a disconnect trigger.
pub struct MockContextBinder {
    context: Arc<MockExecutionContext>,
    binds: AtomicUsize,
    fail_next: AtomicBool,
    hold: watch::Sender<bool>,
    disconnect: Mutex<Option<oneshot::Sender<()>>>,
}

impl MockContextBinder {
    #[must_use]
    pub fn new() -> Self {
        let (hold, _) = watch::channel(false);
        Self {
            context: Arc::new(MockExecutionContext::new()),
            binds: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            hold,
            disconnect: Mutex::new(None),
        }
    }

    /// The execution context every bind hands out.
    #[must_use]
    pub fn context(&self) -> Arc<MockExecutionContext> {
        Arc::clone(&self.context)
    }

    /// Bind attempts issued so far.
    #[must_use]
    pub fn bind_count(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn fail_next_bind(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Park bind attempts until [`release_binds`](Self::release_binds).
    pub fn hold_binds(&self) {
        let _ = self.hold.send(true);
    }

    pub fn release_binds(&self) {
        let _ = self.hold.send(false);
    }

    /// Busy-yield until at least `n` bind attempts have started.
    pub async fn wait_for_bind_attempts(&self, n: usize) {
        while self.bind_count() < n {
            tokio::task::yield_now().await;
        }
    }

    /// Fire the platform's unsolicited-disconnect signal for the most recent
    /// bind.
    pub fn trigger_disconnect(&self) {
        if let Some(tx) = self
            .disconnect
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = tx.send(());
        }
    }
}

impl Default for MockContextBinder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextBinder for MockContextBinder {
    async fn bind(&self) -> Result<BoundContext> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        let mut held = self.hold.subscribe();
        while *held.borrow_and_update() {
            if held.changed().await.is_err() {
                break;
            }
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GeoError::TransientPlatform("bind refused".to_owned()));
        }
        let (tx, rx) = oneshot::channel();
        *self.disconnect.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        Ok(BoundContext {
            context: Arc::clone(&self.context) as Arc<dyn ExecutionContext>,
            disconnected: rx,
        })
    }
}
