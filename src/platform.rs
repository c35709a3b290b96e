//! Trait seams for the platform collaborators.
//!
//! The core never talks to a concrete platform API. Embedders supply these
//! four collaborators; the [`testing`](crate::testing) module provides mock
//! implementations.
//!
//! All entry points may be called from arbitrary concurrent contexts:
//! callbacks from the location provider, the permission authority, and the
//! connection layer arrive asynchronously and outside the core's control.

use crate::error::Result;
use crate::location::{FilterConfig, NoticeConfig, Position};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::oneshot;

/// A system capability the core can require and prompt for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Device location access (fine and coarse together; platforms that
    /// split them prompt for both under this one capability).
    Location,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Location => f.write_str("location"),
        }
    }
}

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "location" => Ok(Capability::Location),
            _ => Err(UnknownCapability(s.to_owned())),
        }
    }
}

/// Error returned when parsing an unknown capability string.
#[derive(Debug, Clone)]
pub struct UnknownCapability(pub String);

impl fmt::Display for UnknownCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown capability: {:?}", self.0)
    }
}

impl std::error::Error for UnknownCapability {}

/// Current grant state reported by the permission authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// Never asked, or the platform cannot tell.
    Unknown,
}

/// Resolution of an interactive permission prompt.
///
/// Resolved exactly once per prompt. `Cancelled` means teardown interrupted
/// the prompt, not that the user declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    Granted,
    Denied,
    Cancelled,
}

/// Opaque handle to a live position subscription.
///
/// The token is unique per subscription, so reopening a subscription (e.g.
/// after an out-of-band permission grant) observably changes the handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    token: u64,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn new(token: u64) -> Self {
        Self { token }
    }

    #[must_use]
    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Opaque handle to a constructed persistent notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeHandle {
    token: u64,
}

impl NoticeHandle {
    #[must_use]
    pub fn new(token: u64) -> Self {
        Self { token }
    }

    #[must_use]
    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Callback through which a subscription pushes samples to its watcher.
pub type PositionDelivery = Arc<dyn Fn(Position) + Send + Sync>;

/// Platform location provider.
///
/// `subscribe` starts a lazy, unbounded sequence of samples delivered through
/// `delivery` until `unsubscribe`. The sequence does not restart on its own;
/// resuming after a permission revoke requires a fresh subscription.
#[async_trait]
pub trait PositionSource: Send + Sync {
    fn subscribe(&self, filter: &FilterConfig, delivery: PositionDelivery)
    -> Result<SubscriptionHandle>;

    fn unsubscribe(&self, handle: &SubscriptionHandle);

    /// Best-effort last-known position. `None` when no fix is cached; never
    /// an error.
    async fn fetch_once(&self) -> Option<Position>;

    /// Whether device-wide location services are enabled, independent of
    /// per-app permission.
    fn services_enabled(&self) -> bool;
}

/// Builds persistent-notice handles. May fail; never crashes the caller.
pub trait NotificationFactory: Send + Sync {
    fn build(&self, config: &NoticeConfig) -> Result<NoticeHandle>;
}

/// Reports and prompts for capability grants.
#[async_trait]
pub trait PermissionAuthority: Send + Sync {
    fn state(&self, capability: Capability) -> PermissionState;

    /// Run the interactive prompt. Completes exactly once, after an
    /// unbounded user-paced delay. Callers go through
    /// [`PermissionBroker`](crate::PermissionBroker), which guarantees at
    /// most one outstanding prompt per capability.
    async fn prompt(&self, capability: Capability) -> PromptOutcome;
}

/// The bound background execution context, plus the channel on which the
/// platform announces an unsolicited disconnect.
pub struct BoundContext {
    pub context: Arc<dyn ExecutionContext>,
    pub disconnected: oneshot::Receiver<()>,
}

/// Binds the background execution context. Called lazily, on first watcher
/// activation and again after a disconnect.
#[async_trait]
pub trait ContextBinder: Send + Sync {
    async fn bind(&self) -> Result<BoundContext>;
}

/// The live background execution context.
///
/// `promote` and `demote` are idempotent by contract: some platforms provide
/// no reliable query for "are we already promoted", so the core calls them
/// redundantly.
pub trait ExecutionContext: Send + Sync {
    fn promote(&self, notice: &NoticeHandle) -> Result<()>;

    fn demote(&self);

    /// Stop the context entirely. A later bind creates a fresh one.
    fn stop(&self);
}

impl fmt::Debug for dyn ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExecutionContext")
    }
}
