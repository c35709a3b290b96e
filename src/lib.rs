//! Geowatch: background geolocation watcher core.
//!
//! Applications subscribe to independent streams of device position updates
//! ("watchers") that keep running while the application is backgrounded. The
//! crate owns the watcher registry, the permission-gated activation workflow,
//! the foreground-presence state machine, and the supervisor for the single
//! background execution context.
//!
//! # Architecture
//!
//! The core is built from independent components wired together by
//! [`GeolocationManager`]:
//! - **Platform collaborators** ([`platform`]): trait seams for the location
//!   provider, notification renderer, permission authority, and the
//!   background execution context.
//! - **[`WatcherRegistry`]**: the live watcher set; serialized mutations,
//!   per-watcher delivery sinks, notice-requirement recomputation.
//! - **[`ForegroundPresenceController`]**: idempotent promotion/demotion of
//!   the background execution context.
//! - **[`PermissionBroker`]**: coalesces concurrent interactive permission
//!   prompts into a single shared completion.
//! - **[`ConnectionSupervisor`]**: lazily binds the execution context,
//!   shares in-flight binds, and recovers from disconnects.
//!
//! Registry state is in-memory only; it is rebuilt from scratch when the
//! process restarts.

pub mod error;
pub mod location;
pub mod manager;
pub mod permission;
pub mod platform;
pub mod presence;
pub mod registry;
pub mod supervisor;
pub mod testing;

pub use error::{GeoError, Result};
pub use location::{
    FilterConfig, NoticeConfig, Position, PositionSink, WatcherEvent, WatcherId, WatcherOptions,
};
pub use manager::{GeolocationManager, PlatformServices};
pub use permission::PermissionBroker;
pub use platform::{
    BoundContext, Capability, ContextBinder, ExecutionContext, NoticeHandle, NotificationFactory,
    PermissionAuthority, PermissionState, PositionDelivery, PositionSource, PromptOutcome,
    SubscriptionHandle,
};
pub use presence::{ForegroundPresenceController, PresenceState};
pub use registry::WatcherRegistry;
pub use supervisor::ConnectionSupervisor;
