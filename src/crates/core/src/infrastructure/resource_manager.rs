//! Scoped registry of cleanup callbacks
//!
//! Every abort signal, timer and listener created while serving a turn is
//! registered here under a scope string (for example `slot:<id>#<generation>`).
//! Releasing a scope runs each callback at most once: a handle is removed from
//! the registry before its callback runs, so a second release of the same
//! scope, or a release racing a timer that already fired, finds nothing.

use dashmap::DashMap;
use log::{debug, error};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type HandleId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    AbortController,
    Timer,
    Listener,
}

type ReleaseFn = Box<dyn FnOnce() + Send + 'static>;

struct ResourceEntry {
    scope: String,
    kind: ResourceKind,
    // The registry is shared across tasks; the lock makes a `Send`-only
    // closure storable there.
    release: Mutex<ReleaseFn>,
}

pub struct ResourceManager {
    handles: DashMap<HandleId, ResourceEntry>,
    next_id: AtomicU64,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(
        &self,
        scope: impl Into<String>,
        kind: ResourceKind,
        release: impl FnOnce() + Send + 'static,
    ) -> HandleId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(
            id,
            ResourceEntry {
                scope: scope.into(),
                kind,
                release: Mutex::new(Box::new(release)),
            },
        );
        id
    }

    /// Registers an abort signal; releasing it cancels the token.
    pub fn register_cancellation(&self, scope: impl Into<String>, token: &CancellationToken) -> HandleId {
        let token = token.clone();
        self.register(scope, ResourceKind::AbortController, move || token.cancel())
    }

    /// Registers a background task; releasing it aborts the task.
    pub fn register_task<T: Send + 'static>(
        &self,
        scope: impl Into<String>,
        kind: ResourceKind,
        task: JoinHandle<T>,
    ) -> HandleId {
        self.register(scope, kind, move || task.abort())
    }

    /// Runs `on_fire` once after `delay` unless the handle is released first.
    /// A fired timer removes its own handle.
    pub fn schedule_timeout(
        self: &Arc<Self>,
        scope: impl Into<String>,
        delay: Duration,
        on_fire: impl FnOnce() + Send + 'static,
    ) -> HandleId {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let id = self.register(scope, ResourceKind::Timer, move || cancel.cancel());

        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    // Whoever removes the handle first decides: release or fire.
                    let owned = manager
                        .upgrade()
                        .map(|manager| manager.handles.remove(&id).is_some())
                        .unwrap_or(false);
                    if owned {
                        on_fire();
                    }
                }
            }
        });
        id
    }

    /// Calls `tick` every `period` (first call after one period) until released.
    pub fn schedule_interval(
        &self,
        scope: impl Into<String>,
        period: Duration,
        mut tick: impl FnMut() + Send + 'static,
    ) -> HandleId {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let id = self.register(scope, ResourceKind::Timer, move || cancel.cancel());

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => tick(),
                }
            }
        });
        id
    }

    /// Returns false if the handle was already released.
    pub fn release_one(&self, id: HandleId) -> bool {
        match self.handles.remove(&id) {
            Some((id, entry)) => {
                run_release(id, entry);
                true
            }
            None => false,
        }
    }

    /// Releases every handle of `scope`; returns how many were released by
    /// this call.
    pub fn release_scope(&self, scope: &str) -> usize {
        let ids = self
            .handles
            .iter()
            .filter(|entry| entry.value().scope == scope)
            .map(|entry| *entry.key())
            .collect::<Vec<_>>();
        let released = ids.into_iter().filter(|id| self.release_one(*id)).count();
        if released > 0 {
            debug!("Released resource scope: scope={}, handles={}", scope, released);
        }
        released
    }

    /// Releases every handle whose scope starts with `prefix`.
    pub fn release_prefix(&self, prefix: &str) -> usize {
        let ids = self
            .handles
            .iter()
            .filter(|entry| entry.value().scope.starts_with(prefix))
            .map(|entry| *entry.key())
            .collect::<Vec<_>>();
        ids.into_iter().filter(|id| self.release_one(*id)).count()
    }

    pub fn release_all(&self) -> usize {
        let ids = self.handles.iter().map(|entry| *entry.key()).collect::<Vec<_>>();
        let released = ids.into_iter().filter(|id| self.release_one(*id)).count();
        if released > 0 {
            debug!("Released all resources: handles={}", released);
        }
        released
    }

    pub fn active_count(&self) -> usize {
        self.handles.len()
    }

    pub fn scope_count(&self, scope: &str) -> usize {
        self.handles
            .iter()
            .filter(|entry| entry.value().scope == scope)
            .count()
    }

    pub fn kind_count(&self, kind: ResourceKind) -> usize {
        self.handles
            .iter()
            .filter(|entry| entry.value().kind == kind)
            .count()
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn run_release(id: HandleId, entry: ResourceEntry) {
    let ResourceEntry { scope, kind, release } = entry;
    let release = release.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Err(panic) = catch_unwind(AssertUnwindSafe(release)) {
        error!(
            "Resource release panicked: handle_id={}, scope={}, kind={:?}, error={}",
            id,
            scope,
            kind,
            panic_message(panic.as_ref())
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic>".to_string()
    }
}
