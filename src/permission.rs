//! Coalesced interactive permission prompts.
//!
//! An interactive prompt is user-paced and may stay open indefinitely. The
//! broker guarantees at most one outstanding prompt per capability: the first
//! request spawns a driver task that runs the prompt, and every concurrent
//! request for the same capability attaches to that driver's shared
//! completion instead of issuing a duplicate.
//!
//! Teardown cancels the drivers; pending waiters resolve to
//! [`PromptOutcome::Cancelled`], never to a denial.

use crate::platform::{Capability, PermissionAuthority, PermissionState, PromptOutcome};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

struct Inner {
    authority: Arc<dyn PermissionAuthority>,
    /// One shared completion per capability with an outstanding prompt.
    pending: Mutex<HashMap<Capability, broadcast::Sender<PromptOutcome>>>,
    cancel: CancellationToken,
}

/// Gatekeeper for capability state checks and coalesced prompts.
#[derive(Clone)]
pub struct PermissionBroker {
    inner: Arc<Inner>,
}

impl PermissionBroker {
    pub fn new(authority: Arc<dyn PermissionAuthority>) -> Self {
        Self {
            inner: Arc::new(Inner {
                authority,
                pending: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Current grant state, straight from the authority.
    #[must_use]
    pub fn state(&self, capability: Capability) -> PermissionState {
        self.inner.authority.state(capability)
    }

    /// Resolve the capability through an interactive prompt, joining the
    /// outstanding prompt for this capability if there is one.
    pub async fn request(&self, capability: Capability) -> PromptOutcome {
        let mut rx = {
            let mut pending = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(tx) = pending.get(&capability) {
                tx.subscribe()
            } else {
                let (tx, rx) = broadcast::channel(1);
                pending.insert(capability, tx.clone());
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move { drive_prompt(inner, capability, tx).await });
                rx
            }
        };
        match rx.recv().await {
            Ok(outcome) => outcome,
            // Sender dropped without a result: broker shut down.
            Err(_) => PromptOutcome::Cancelled,
        }
    }

    /// Cancel every outstanding prompt. Waiters receive `Cancelled`.
    pub fn cancel_all(&self) {
        self.inner.cancel.cancel();
    }
}

async fn drive_prompt(
    inner: Arc<Inner>,
    capability: Capability,
    tx: broadcast::Sender<PromptOutcome>,
) {
    tracing::info!(%capability, "requesting permission from user");
    let outcome = tokio::select! {
        outcome = inner.authority.prompt(capability) => outcome,
        () = inner.cancel.cancelled() => PromptOutcome::Cancelled,
    };
    inner
        .pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&capability);
    tracing::info!(%capability, ?outcome, "permission prompt resolved");
    let _ = tx.send(outcome);
}
