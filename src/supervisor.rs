//! Supervisor for the single background execution context.
//!
//! The context is bound lazily on first use. Concurrent callers of
//! [`ConnectionSupervisor::get`] while a bind is in flight share the same
//! pending result; no duplicate bind attempts are ever issued. An unsolicited
//! disconnect from the platform resets the supervisor to unbound so the next
//! `get` reconnects.
//!
//! An epoch counter guards against a stale bind completing after a teardown
//! or disconnect already reset the state: the late result is discarded and
//! the freshly bound context is stopped.

use crate::error::{GeoError, Result};
use crate::platform::{BoundContext, ContextBinder, ExecutionContext};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot};

type Context = Arc<dyn ExecutionContext>;
type BindResult = std::result::Result<Context, GeoError>;

/// Hook invoked after an unsolicited disconnect resets the supervisor.
pub type DisconnectHook = Arc<dyn Fn() + Send + Sync>;

enum ConnState {
    Unbound,
    /// A bind is in flight; all waiters subscribe to the same completion.
    Connecting(broadcast::Sender<BindResult>),
    Bound(Context),
}

struct StateCell {
    state: ConnState,
    /// Bumped on every teardown/disconnect; a bind task only installs its
    /// result if the epoch it started under is still current.
    epoch: u64,
}

struct Inner {
    binder: Arc<dyn ContextBinder>,
    cell: Mutex<StateCell>,
    on_disconnect: Mutex<Option<DisconnectHook>>,
}

/// Maintains the singleton handle to the background execution context.
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
}

impl ConnectionSupervisor {
    pub fn new(binder: Arc<dyn ContextBinder>) -> Self {
        Self {
            inner: Arc::new(Inner {
                binder,
                cell: Mutex::new(StateCell {
                    state: ConnState::Unbound,
                    epoch: 0,
                }),
                on_disconnect: Mutex::new(None),
            }),
        }
    }

    /// Register the hook run after an unsolicited disconnect. The supervisor
    /// has already reset to unbound when the hook fires.
    pub fn set_on_disconnect(&self, hook: DisconnectHook) {
        *self
            .inner
            .on_disconnect
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    /// The bound context, if any, without triggering a bind.
    pub fn current(&self) -> Option<Context> {
        let cell = self.inner.cell.lock().unwrap_or_else(|e| e.into_inner());
        match &cell.state {
            ConnState::Bound(ctx) => Some(Arc::clone(ctx)),
            _ => None,
        }
    }

    /// Return the execution context, binding it first if necessary.
    ///
    /// Concurrent callers during a bind all receive the same result.
    pub async fn get(&self) -> Result<Context> {
        let mut rx = {
            let mut cell = self.inner.cell.lock().unwrap_or_else(|e| e.into_inner());
            match &cell.state {
                ConnState::Bound(ctx) => return Ok(Arc::clone(ctx)),
                ConnState::Connecting(tx) => tx.subscribe(),
                ConnState::Unbound => {
                    let (tx, rx) = broadcast::channel(1);
                    cell.state = ConnState::Connecting(tx.clone());
                    let epoch = cell.epoch;
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move { drive_bind(inner, epoch, tx).await });
                    rx
                }
            }
        };
        match rx.recv().await {
            Ok(result) => result,
            Err(_) => Err(GeoError::Cancelled(
                "connection attempt abandoned by teardown".to_owned(),
            )),
        }
    }

    /// Stop the bound context. Subsequent `get` calls bind a fresh one.
    pub fn teardown(&self) {
        let previous = {
            let mut cell = self.inner.cell.lock().unwrap_or_else(|e| e.into_inner());
            cell.epoch += 1;
            std::mem::replace(&mut cell.state, ConnState::Unbound)
        };
        match previous {
            // The bind task still holds a sender clone; the bumped epoch
            // makes it resolve its waiters with `Cancelled` on completion.
            ConnState::Connecting(_) => {}
            ConnState::Bound(ctx) => ctx.stop(),
            ConnState::Unbound => {}
        }
    }
}

async fn drive_bind(inner: Arc<Inner>, epoch: u64, tx: broadcast::Sender<BindResult>) {
    let result = inner.binder.bind().await;
    let outcome: BindResult = {
        let mut cell = inner.cell.lock().unwrap_or_else(|e| e.into_inner());
        if cell.epoch != epoch {
            // Teardown raced the bind. Stop the orphaned context.
            if let Ok(bound) = result {
                bound.context.stop();
            }
            let _ = tx.send(Err(GeoError::Cancelled(
                "connection attempt abandoned by teardown".to_owned(),
            )));
            return;
        }
        match result {
            Ok(BoundContext {
                context,
                disconnected,
            }) => {
                cell.state = ConnState::Bound(Arc::clone(&context));
                let monitor_inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    monitor_disconnect(monitor_inner, epoch, disconnected).await;
                });
                Ok(context)
            }
            Err(err) => {
                cell.state = ConnState::Unbound;
                tracing::error!("failed to bind background execution context: {err}");
                Err(err)
            }
        }
    };
    let _ = tx.send(outcome);
}

/// Waits for the platform's disconnect signal. A dropped sender counts as a
/// disconnect too.
async fn monitor_disconnect(inner: Arc<Inner>, epoch: u64, disconnected: oneshot::Receiver<()>) {
    let _ = disconnected.await;
    let hook = {
        let mut cell = inner.cell.lock().unwrap_or_else(|e| e.into_inner());
        if cell.epoch != epoch {
            // Already torn down through the explicit path.
            return;
        }
        cell.epoch += 1;
        cell.state = ConnState::Unbound;
        inner
            .on_disconnect
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    };
    tracing::warn!("background execution context disconnected");
    if let Some(hook) = hook {
        hook();
    }
}
