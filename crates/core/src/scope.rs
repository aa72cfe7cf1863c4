//! The cancellation scope ties work to the lifetime of a consuming view.
//!
//! A lifetime starts with [CancellationScope::enter] and ends with
//! [CancellationScope::exit]. Modules bound to the lifetime are cancelled
//! on exit and gateway calls spawned under it are aborted. Since
//! coordinators invoke their handlers inside their own critical section,
//! and exit cancels every bound coordinator before returning, no result
//! of the lifetime reaches the presentation layer once exit returned.
//!
//! Lock order is always scope first, then coordinator or tracker.

use folio_api::*;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::{runtime::Handle, task::AbortHandle};

/// Identifies one lifetime of a [CancellationScope].
///
/// Pass it to every operation started under the lifetime. Cloning is
/// cheap, all clones observe the same cancellation.
#[derive(Debug, Clone)]
pub struct ScopeToken {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl PartialEq for ScopeToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

impl Eq for ScopeToken {}

impl ScopeToken {
    fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The id of the lifetime, unique within its scope. Tokens of
    /// different scopes may share an id but never compare equal.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Has the lifetime ended?
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct Lifetime {
    token: ScopeToken,
    coordinators: Vec<DynCoordinator>,
    trackers: Vec<DynTracker>,
    tasks: Vec<AbortHandle>,
}

impl Lifetime {
    fn new(token: ScopeToken) -> Self {
        Self {
            token,
            coordinators: Vec::new(),
            trackers: Vec::new(),
            tasks: Vec::new(),
        }
    }

    fn cancel(self) {
        self.token.cancelled.store(true, Ordering::Release);

        let pending = self.tasks.iter().filter(|t| !t.is_finished()).count();
        tracing::debug!(
            token = self.token.id,
            pending,
            coordinators = self.coordinators.len(),
            trackers = self.trackers.len(),
            "exiting scope"
        );

        for task in self.tasks {
            task.abort();
        }
        for coordinator in self.coordinators {
            coordinator.cancel_batch();
        }
        for tracker in self.trackers {
            tracker.release_all();
        }
    }
}

#[derive(Debug, Default)]
struct ScopeInner {
    next_id: u64,
    active: Option<Lifetime>,
}

impl ScopeInner {
    fn active_for(&mut self, token: &ScopeToken) -> Option<&mut Lifetime> {
        match self.active.as_mut() {
            Some(l) if l.token == *token && !token.is_cancelled() => Some(l),
            _ => None,
        }
    }
}

/// A lifetime boundary for fetch work, at most one lifetime at a time.
#[derive(Debug, Default)]
pub struct CancellationScope(Mutex<ScopeInner>);

impl CancellationScope {
    /// Construct a new scope with no active lifetime.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScopeInner> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a new lifetime.
    ///
    /// If a lifetime is still active it is exited first.
    pub fn enter(&self) -> ScopeToken {
        let mut lock = self.lock();
        if let Some(previous) = lock.active.take() {
            tracing::debug!(
                token = previous.token.id,
                "entering scope with a lifetime still active"
            );
            previous.cancel();
        }
        lock.next_id += 1;
        let token = ScopeToken::new(lock.next_id);
        lock.active = Some(Lifetime::new(token.clone()));
        tracing::debug!(token = token.id, "entered scope");
        token
    }

    /// End the lifetime of `token`.
    ///
    /// Bound coordinators are cancelled, bound trackers are cleared and
    /// every task spawned under the lifetime is aborted, all before this
    /// returns. A token that is not the active one is ignored.
    pub fn exit(&self, token: &ScopeToken) {
        let mut lock = self.lock();
        if lock.active_for(token).is_none() {
            tracing::debug!(token = token.id, "ignoring exit of inactive token");
            return;
        }
        if let Some(lifetime) = lock.active.take() {
            lifetime.cancel();
        }
    }

    /// Is `token` the active lifetime?
    pub fn is_active(&self, token: &ScopeToken) -> bool {
        self.lock().active_for(token).is_some()
    }

    /// Would [CancellationScope::spawn] accept a task for `token` right
    /// now? True if `token` is active and there is a runtime to spawn onto.
    pub fn can_spawn(&self, token: &ScopeToken) -> bool {
        self.is_active(token) && Handle::try_current().is_ok()
    }

    /// Cancel `coordinator` when the lifetime of `token` ends.
    ///
    /// Returns false, without binding, if `token` is not active.
    pub fn bind_coordinator(
        &self,
        token: &ScopeToken,
        coordinator: DynCoordinator,
    ) -> bool {
        match self.lock().active_for(token) {
            Some(lifetime) => {
                lifetime.coordinators.push(coordinator);
                true
            }
            None => false,
        }
    }

    /// Clear `tracker` when the lifetime of `token` ends.
    ///
    /// Returns false, without binding, if `token` is not active.
    pub fn bind_tracker(&self, token: &ScopeToken, tracker: DynTracker) -> bool {
        match self.lock().active_for(token) {
            Some(lifetime) => {
                lifetime.trackers.push(tracker);
                true
            }
            None => false,
        }
    }

    /// Spawn `fut` onto the current tokio runtime under the lifetime of
    /// `token`. It is aborted when the lifetime ends.
    ///
    /// Returns false, without spawning, if `token` is not active or if
    /// there is no runtime to spawn onto.
    pub fn spawn<F>(&self, token: &ScopeToken, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut lock = self.lock();
        let Some(lifetime) = lock.active_for(token) else {
            return false;
        };
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::warn!(?err, "cannot spawn scoped task");
                return false;
            }
        };
        lifetime.tasks.retain(|t| !t.is_finished());
        lifetime.tasks.push(runtime.spawn(fut).abort_handle());
        true
    }

    /// Number of tasks of the active lifetime that have not finished.
    pub fn pending_task_count(&self) -> usize {
        self.lock()
            .active
            .as_ref()
            .map(|l| l.tasks.iter().filter(|t| !t.is_finished()).count())
            .unwrap_or_default()
    }
}

impl Drop for CancellationScope {
    fn drop(&mut self) {
        if let Some(lifetime) = self.lock().active.take() {
            lifetime.cancel();
        }
    }
}

#[cfg(test)]
mod test;
