//! A view session wires the Folio modules together for one consuming view.
//!
//! The session owns a gateway for one collection, a coordinator, and a
//! [CancellationScope]. The view calls [ViewSession::enter] when it is
//! displayed and [ViewSession::exit] when it is torn down. In between,
//! [ViewSession::load] fetches the collection and fans out, and
//! [ViewSession::row_visible] lazily fetches the sub-resource of a row
//! that was rendered before its data arrived.
//!
//! Every lifetime gets its own tracker, so tickets never leak from one
//! lifetime into the next. Epochs are issued by the single coordinator
//! and only ever move forward, so lifetimes never share an epoch either.

use crate::scope::{CancellationScope, ScopeToken};
use folio_api::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// ViewSession configuration types.
pub mod config {
    /// Configuration parameters for [ViewSession](super::ViewSession).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
    #[serde(rename_all = "camelCase", default)]
    pub struct ViewSessionConfig {
        /// Fetch every sub-resource as soon as the collection arrives.
        /// If false the model is only seeded, and rows are filled in
        /// as they become visible.
        ///
        /// Default: true.
        pub fan_out: bool,

        /// Report an empty collection as a failure instead of as a
        /// stable batch with no elements.
        ///
        /// Default: false.
        pub empty_collection_is_error: bool,
    }

    impl Default for ViewSessionConfig {
        fn default() -> Self {
            Self {
                fan_out: true,
                empty_collection_is_error: false,
            }
        }
    }

    /// Module-level configuration for ViewSession.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
    #[serde(rename_all = "camelCase", default)]
    pub struct ViewSessionModConfig {
        /// ViewSession configuration.
        pub view_session: ViewSessionConfig,
    }

    impl folio_api::config::ModConfig for ViewSessionModConfig {}
}

pub use config::*;

type TrackerSlot = Option<(ScopeToken, DynTracker)>;

/// Coordinates the fetches behind one consuming view.
///
/// The [BatchHandler] passed to [ViewSession::new] is called while the
/// coordinator is locked. It must not call back into the session,
/// [ViewSession::snapshot], [ViewSession::is_stable] and
/// [ViewSession::exit] included. Take the model from the callback
/// arguments instead.
#[derive(Debug)]
pub struct ViewSession {
    config: ViewSessionConfig,
    builder: Arc<Builder>,
    collection: CollectionId,
    gateway: DynGateway,
    coordinator: DynCoordinator,
    scope: CancellationScope,
    tracker: Mutex<TrackerSlot>,
}

impl ViewSession {
    /// Create the modules for a view of `collection`, reporting to
    /// `handler`.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn new(
        builder: Arc<Builder>,
        collection: CollectionId,
        handler: DynBatchHandler,
    ) -> FolioResult<Self> {
        let config: ViewSessionModConfig = builder.config.get_module_config()?;
        let gateway = builder
            .gateway
            .create(builder.clone(), collection.clone())
            .await?;
        let coordinator = builder.coordinator.create(
            builder.clone(),
            gateway.clone(),
            handler,
        )?;
        Ok(Self {
            config: config.view_session,
            builder,
            collection,
            gateway,
            coordinator,
            scope: CancellationScope::new(),
            tracker: Mutex::new(None),
        })
    }

    fn tracker_slot(&self) -> MutexGuard<'_, TrackerSlot> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tracker_for(&self, token: &ScopeToken) -> Option<DynTracker> {
        match &*self.tracker_slot() {
            Some((t, tracker)) if t == token && !token.is_cancelled() => {
                Some(tracker.clone())
            }
            _ => None,
        }
    }

    /// The collection this session views.
    pub fn collection(&self) -> &CollectionId {
        &self.collection
    }

    /// The view was displayed. Starts a new lifetime, exiting the
    /// previous one if it is still active.
    pub fn enter(&self) -> FolioResult<ScopeToken> {
        let tracker = self.builder.tracker.create(self.builder.clone())?;
        let token = self.scope.enter();
        self.scope.bind_coordinator(&token, self.coordinator.clone());
        self.scope.bind_tracker(&token, tracker.clone());
        *self.tracker_slot() = Some((token.clone(), tracker));
        Ok(token)
    }

    /// The view was torn down. Once this returns, no result of the
    /// lifetime reaches the handler anymore.
    pub fn exit(&self, token: &ScopeToken) {
        self.scope.exit(token);
        let mut slot = self.tracker_slot();
        if matches!(&*slot, Some((t, _)) if t == token) {
            *slot = None;
        }
    }

    /// Fetch the collection and build a fresh model from it.
    ///
    /// Supersedes whatever the previous load left outstanding. Returns
    /// false, doing nothing, if `token` is not the active lifetime or if
    /// called outside of a tokio runtime.
    pub fn load(&self, token: &ScopeToken) -> bool {
        // the current model must survive a load that cannot run
        if !self.scope.can_spawn(token) {
            tracing::debug!(collection = %self.collection, "load refused");
            return false;
        }

        let epoch = self.coordinator.begin_epoch();
        tracing::debug!(collection = %self.collection, %epoch, "loading");

        let config = self.config.clone();
        let gateway = self.gateway.clone();
        let coordinator = self.coordinator.clone();
        self.scope.spawn(token, async move {
            let result = gateway.fetch_collection().await;
            on_collection(&config, &coordinator, epoch, result);
        })
    }

    /// A row was rendered. If the row has no sub-resource yet, fetch it,
    /// unless a fetch for it is already in flight.
    ///
    /// Only applies once the current batch is stable. Returns true if a
    /// fetch was issued.
    pub fn row_visible(&self, token: &ScopeToken, key: RequestKey) -> bool {
        let Some(tracker) = self.tracker_for(token) else {
            return false;
        };

        let epoch = self.coordinator.current_epoch();
        if !self.coordinator.is_stable() {
            return false;
        }
        match self.coordinator.element(&key) {
            Some(element) if element.payload.is_none() => (),
            _ => return false,
        }

        if !tracker.acquire(key.clone()) {
            return false;
        }

        let gateway = self.gateway.clone();
        let coordinator = self.coordinator.clone();
        let task_tracker = tracker.clone();
        let task_key = key.clone();
        let spawned = self.scope.spawn(token, async move {
            let result = gateway.fetch_sub_resource(task_key.clone()).await;
            if let Err(err) = &result {
                tracing::debug!(key = %task_key, %epoch, ?err, "row fetch failed");
            }
            coordinator.merge_row(task_key.clone(), epoch, result);
            task_tracker.release(&task_key);
        });

        if !spawned {
            tracker.release(&key);
        }
        spawned
    }

    /// A copy of the current model.
    pub fn snapshot(&self) -> AggregateViewModel {
        self.coordinator.snapshot()
    }

    /// The current epoch.
    pub fn current_epoch(&self) -> Epoch {
        self.coordinator.current_epoch()
    }

    /// Has the current batch stabilized?
    pub fn is_stable(&self) -> bool {
        self.coordinator.is_stable()
    }

    /// Number of lazy row fetches in flight in the active lifetime.
    pub fn in_flight_rows(&self) -> usize {
        match &*self.tracker_slot() {
            Some((_, tracker)) => tracker.in_flight_count(),
            None => 0,
        }
    }
}

fn on_collection(
    config: &ViewSessionConfig,
    coordinator: &DynCoordinator,
    epoch: Epoch,
    result: FolioResult<Vec<Item>>,
) {
    let outcome = match result {
        Ok(items) if items.is_empty() && config.empty_collection_is_error => {
            coordinator.fail_batch(epoch, ErrorMarker::no_collection())
        }
        Ok(items) if config.fan_out => coordinator.start_batch(items, epoch),
        Ok(items) => coordinator.seed_batch(items, epoch),
        Err(err) => {
            tracing::debug!(%epoch, ?err, "collection fetch failed");
            coordinator.fail_batch(epoch, ErrorMarker::from(&err))
        }
    };

    if let Err(err) = outcome {
        tracing::debug!(%epoch, ?err, "collection arrived after being superseded");
    }
}

#[cfg(test)]
mod test;
