//! Coordinator is a Folio module that fans out one sub-fetch per element
//! of a parent collection and joins the results.
//!
//! ### State
//!
//! All mutable state of a coordinator lives behind a single mutex:
//! - the current [Epoch] and whether a batch was started / stabilized
//!   for it,
//! - the outstanding set, mapping each [RequestKey] of the batch to its
//!   [FetchTicket] and the abort handle of the task fetching it,
//! - the [AggregateViewModel] being filled in.
//!
//! Every merge happens inside that one critical section, and so does
//! every call into the [BatchHandler]. Once [Coordinator::cancel_batch]
//! returned, no callback for the cancelled epoch can run anymore. A
//! handler locking its own coordinator again would deadlock; debug
//! builds catch that and panic.
//!
//! ### Sub-fetch tasks
//!
//! Starting a batch spawns one task per element. A task waits for one of
//! the `parallelSubFetchCount` permits, checks that its epoch is still
//! current, calls the gateway and reports the result through
//! [Coordinator::on_sub_fetch_complete]. Results reported for a stale
//! epoch, or for a key that is no longer outstanding, are dropped.
//!
//! When the outstanding set becomes empty the batch stabilizes: the
//! handler receives a copy of the model, exactly once per epoch.
//!
//! ### Superseding
//!
//! [Coordinator::begin_epoch] and [Coordinator::cancel_batch] both move
//! the epoch forward, abort every task of the old epoch and reset the
//! model. Tasks that are already past the abort point still report
//! back, and are dropped by the stale epoch guard.
//!
//! When the epoch counter runs out, the coordinator supersedes one last
//! time and stays on the final epoch with its batch marked as started,
//! so nothing is accepted or merged from then on.

use folio_api::*;
use std::{
    cell::RefCell,
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::{runtime::Handle, sync::Semaphore, task::AbortHandle};

/// CoreCoordinator configuration types.
pub mod config {
    /// Configuration parameters for [CoreCoordinatorFactory](super::CoreCoordinatorFactory).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
    #[serde(rename_all = "camelCase", default)]
    pub struct CoreCoordinatorConfig {
        /// How many sub-fetches of a batch may run at once. Must not be 0.
        ///
        /// Default: 4.
        pub parallel_sub_fetch_count: u8,
    }

    impl Default for CoreCoordinatorConfig {
        fn default() -> Self {
            Self {
                parallel_sub_fetch_count: 4,
            }
        }
    }

    /// Module-level configuration for CoreCoordinator.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
    #[serde(rename_all = "camelCase", default)]
    pub struct CoreCoordinatorModConfig {
        /// CoreCoordinator configuration.
        pub core_coordinator: CoreCoordinatorConfig,
    }

    impl folio_api::config::ModConfig for CoreCoordinatorModConfig {}
}

pub use config::*;

/// A production-ready fan-out/join coordinator.
#[derive(Debug)]
pub struct CoreCoordinatorFactory {}

impl CoreCoordinatorFactory {
    /// Construct a new CoreCoordinatorFactory.
    pub fn create() -> DynCoordinatorFactory {
        Arc::new(Self {})
    }
}

impl CoordinatorFactory for CoreCoordinatorFactory {
    fn default_config(&self, config: &mut Config) -> FolioResult<()> {
        config.set_module_config(&CoreCoordinatorModConfig::default())
    }

    fn validate_config(&self, config: &Config) -> FolioResult<()> {
        let config: CoreCoordinatorModConfig = config.get_module_config()?;
        check_config(&config.core_coordinator)
    }

    fn create(
        &self,
        builder: Arc<Builder>,
        gateway: DynGateway,
        handler: DynBatchHandler,
    ) -> FolioResult<DynCoordinator> {
        let config: CoreCoordinatorModConfig =
            builder.config.get_module_config()?;
        check_config(&config.core_coordinator)?;
        let runtime = Handle::try_current().map_err(|err| {
            FolioError::other_src("coordinator requires a tokio runtime", err)
        })?;
        let out: DynCoordinator = Arc::new(CoreCoordinator::new(
            config.core_coordinator,
            runtime,
            gateway,
            handler,
        ));
        Ok(out)
    }
}

fn check_config(config: &CoreCoordinatorConfig) -> FolioResult<()> {
    if config.parallel_sub_fetch_count == 0 {
        return Err(FolioError::other(
            "coreCoordinator.parallelSubFetchCount must be at least 1",
        ));
    }
    Ok(())
}

thread_local! {
    // Coordinators whose handler is running on this thread.
    static IN_HANDLER: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug)]
struct Outstanding {
    ticket: FetchTicket,
    task: AbortHandle,
}

#[derive(Debug, Default)]
struct State {
    epoch: Epoch,
    started: bool,
    stable: bool,
    outstanding: HashMap<RequestKey, Outstanding>,
    model: AggregateViewModel,
}

impl State {
    /// Move to a newer epoch, abandoning everything of the current one.
    fn supersede(&mut self, epoch: Epoch) {
        for (_, mut outstanding) in self.outstanding.drain() {
            outstanding.ticket.cancel();
            outstanding.task.abort();
        }
        self.epoch = epoch;
        self.started = false;
        self.stable = false;
        self.model = AggregateViewModel::new(epoch);
    }

    /// Supersede the current epoch with the next one, or, once the
    /// counter is exhausted, with itself marked as already started.
    fn advance(&mut self) -> Epoch {
        match self.epoch.next() {
            Some(epoch) => {
                self.supersede(epoch);
                epoch
            }
            None => {
                let epoch = self.epoch;
                tracing::error!(%epoch, "epochs exhausted, refusing batches");
                self.supersede(epoch);
                self.started = true;
                epoch
            }
        }
    }

    /// Claim `epoch` for a new batch.
    fn accept(&mut self, epoch: Epoch) -> FolioResult<()> {
        if epoch < self.epoch || (epoch == self.epoch && self.started) {
            tracing::debug!(%epoch, current = %self.epoch, "rejecting batch");
            return Err(FolioError::other(format!(
                "refusing batch for {epoch}, current is {} (started: {})",
                self.epoch, self.started
            )));
        }
        if epoch > self.epoch {
            self.supersede(epoch);
        }
        self.started = true;
        Ok(())
    }

    fn stabilize(&mut self, inner: &Inner) {
        if self.stable {
            return;
        }
        self.stable = true;
        tracing::debug!(
            epoch = %self.epoch,
            elements = self.model.len(),
            "batch stable"
        );
        let (epoch, model) = (self.epoch, self.model.clone());
        inner.notify(|handler| handler.on_batch_stable(epoch, model));
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    permits: Semaphore,
    runtime: Handle,
    gateway: DynGateway,
    handler: DynBatchHandler,
}

impl Inner {
    fn id(&self) -> usize {
        self as *const Inner as usize
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        debug_assert!(
            !IN_HANDLER.with(|h| h.borrow().contains(&self.id())),
            "batch handler called back into its own coordinator"
        );
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Call into the handler. Must be called with the state locked.
    fn notify(&self, f: impl FnOnce(&DynBatchHandler)) {
        struct Pop;

        impl Drop for Pop {
            fn drop(&mut self) {
                IN_HANDLER.with(|h| h.borrow_mut().pop());
            }
        }

        IN_HANDLER.with(|h| h.borrow_mut().push(self.id()));
        let _pop = Pop;
        f(&self.handler);
    }

    async fn sub_fetch(inner: Arc<Inner>, key: RequestKey, epoch: Epoch) {
        let result = match inner.permits.acquire().await {
            Ok(_permit) => {
                // Skip the call if superseded while waiting for a permit.
                if inner.lock().epoch != epoch {
                    return;
                }
                inner.gateway.fetch_sub_resource(key.clone()).await
            }
            Err(err) => {
                Err(FolioError::other_src("sub-fetch permit unavailable", err))
            }
        };

        if let Err(err) = &result {
            tracing::debug!(%key, %epoch, ?err, "sub-fetch failed");
        }

        inner.complete(key, epoch, result);
    }

    fn complete(
        &self,
        key: RequestKey,
        epoch: Epoch,
        result: FolioResult<bytes::Bytes>,
    ) {
        let mut lock = self.lock();

        if epoch != lock.epoch {
            tracing::trace!(
                %key,
                %epoch,
                current = %lock.epoch,
                "dropping stale sub-fetch result"
            );
            return;
        }

        let Some(mut outstanding) = lock.outstanding.remove(&key) else {
            tracing::debug!(
                %key,
                %epoch,
                "dropping result for a key that is not outstanding"
            );
            return;
        };
        outstanding.ticket.complete();

        lock.model.merge(&key, result);

        if lock.outstanding.is_empty() {
            lock.stabilize(self);
        }
    }
}

#[derive(Debug)]
struct CoreCoordinator {
    inner: Arc<Inner>,
}

impl CoreCoordinator {
    fn new(
        config: CoreCoordinatorConfig,
        runtime: Handle,
        gateway: DynGateway,
        handler: DynBatchHandler,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                permits: Semaphore::new(
                    config.parallel_sub_fetch_count as usize,
                ),
                runtime,
                gateway,
                handler,
            }),
        }
    }
}

impl Coordinator for CoreCoordinator {
    fn current_epoch(&self) -> Epoch {
        self.inner.lock().epoch
    }

    fn begin_epoch(&self) -> Epoch {
        self.inner.lock().advance()
    }

    fn start_batch(&self, items: Vec<Item>, epoch: Epoch) -> FolioResult<()> {
        let mut lock = self.inner.lock();
        lock.accept(epoch)?;
        lock.model = AggregateViewModel::seed(epoch, items);

        let keys = lock.model.keys().cloned().collect::<Vec<_>>();
        if keys.is_empty() {
            lock.stabilize(&self.inner);
            return Ok(());
        }

        tracing::debug!(%epoch, count = keys.len(), "starting fan-out");

        // The lock is held until every ticket is in place, so no task can
        // report back before its own ticket exists.
        for key in keys {
            let task = self
                .inner
                .runtime
                .spawn(Inner::sub_fetch(self.inner.clone(), key.clone(), epoch))
                .abort_handle();
            lock.outstanding.insert(
                key.clone(),
                Outstanding {
                    ticket: FetchTicket::tagged(key, epoch),
                    task,
                },
            );
        }

        Ok(())
    }

    fn seed_batch(&self, items: Vec<Item>, epoch: Epoch) -> FolioResult<()> {
        let mut lock = self.inner.lock();
        lock.accept(epoch)?;
        lock.model = AggregateViewModel::seed(epoch, items);
        lock.stabilize(&self.inner);
        Ok(())
    }

    fn fail_batch(&self, epoch: Epoch, error: ErrorMarker) -> FolioResult<()> {
        let mut lock = self.inner.lock();
        lock.accept(epoch)?;
        tracing::debug!(%epoch, code = error.code, "parent fetch failed");
        lock.model = AggregateViewModel::parent_failure(epoch, error);
        lock.stabilize(&self.inner);
        Ok(())
    }

    fn on_sub_fetch_complete(
        &self,
        key: RequestKey,
        epoch: Epoch,
        result: FolioResult<bytes::Bytes>,
    ) {
        self.inner.complete(key, epoch, result);
    }

    fn merge_row(
        &self,
        key: RequestKey,
        epoch: Epoch,
        result: FolioResult<bytes::Bytes>,
    ) -> bool {
        let mut lock = self.inner.lock();
        if epoch != lock.epoch || !lock.stable {
            tracing::trace!(
                %key,
                %epoch,
                current = %lock.epoch,
                "dropping row for an epoch that is stale or not yet stable"
            );
            return false;
        }
        if !lock.model.merge(&key, result) {
            tracing::debug!(%key, %epoch, "dropping row for an unknown key");
            return false;
        }
        self.inner
            .notify(|handler| handler.on_element_updated(epoch, key));
        true
    }

    fn cancel_batch(&self) {
        let mut lock = self.inner.lock();
        tracing::debug!(
            cancelled = %lock.epoch,
            outstanding = lock.outstanding.len(),
            "cancelling batch"
        );
        lock.advance();
    }

    fn is_stable(&self) -> bool {
        self.inner.lock().stable
    }

    fn element(&self, key: &RequestKey) -> Option<AggregateElement> {
        self.inner.lock().model.get(key).cloned()
    }

    fn snapshot(&self) -> AggregateViewModel {
        self.inner.lock().model.clone()
    }

    fn outstanding_count(&self) -> usize {
        self.inner.lock().outstanding.len()
    }
}

impl Drop for CoreCoordinator {
    fn drop(&mut self) {
        for outstanding in self.inner.lock().outstanding.values() {
            outstanding.task.abort();
        }
    }
}
