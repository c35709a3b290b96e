//! Foreground-presence state machine.
//!
//! Exactly one component owns the `Idle`/`Foreground` value: this controller.
//! The registry re-evaluates the transition rule after every mutation, while
//! still holding its own lock, so no reader can observe a watcher set
//! inconsistent with the presence state.

use crate::platform::NoticeHandle;
use crate::supervisor::ConnectionSupervisor;
use std::sync::Mutex;

/// Whether the background execution context is currently promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    /// No persistent notice shown.
    Idle,
    /// Notice shown, execution context promoted.
    Foreground,
}

/// Promotes/demotes the background execution context from the registry's
/// notice-requirement signal. Idempotent by construction.
pub struct ForegroundPresenceController {
    supervisor: ConnectionSupervisor,
    state: Mutex<PresenceState>,
}

impl ForegroundPresenceController {
    pub fn new(supervisor: ConnectionSupervisor) -> Self {
        Self {
            supervisor,
            state: Mutex::new(PresenceState::Idle),
        }
    }

    #[must_use]
    pub fn state(&self) -> PresenceState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-evaluate the transition rule against the registry's current
    /// notice requirement.
    ///
    /// The promotion call is made even when already `Foreground`: platforms
    /// provide no reliable query for "already promoted", and the call is
    /// idempotent on their side. Promotion failures are logged, never fatal;
    /// the watcher keeps delivering without the durability of a foregrounded
    /// context. When no context is bound (after a disconnect) only the local
    /// state changes.
    pub fn sync(&self, notice: Option<&NoticeHandle>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match notice {
            Some(notice) => {
                if let Some(ctx) = self.supervisor.current()
                    && let Err(err) = ctx.promote(notice)
                {
                    tracing::warn!("failed to promote execution context: {err}");
                }
                *state = PresenceState::Foreground;
            }
            None => {
                if let Some(ctx) = self.supervisor.current() {
                    ctx.demote();
                }
                *state = PresenceState::Idle;
            }
        }
    }
}
