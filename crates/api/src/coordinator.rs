//! Folio fan-out/join coordinator types.

use crate::*;
use std::sync::Arc;

/// Receives the results of a coordinator on behalf of the presentation
/// layer.
///
/// Both callbacks run inside the coordinator's critical section, which is
/// what makes cancellation airtight: once a cancel returned, no callback
/// for the cancelled epoch can run. In exchange, implementations must
/// return promptly and must not call back into the coordinator, nor into
/// anything that locks it, such as a session snapshot. Debug builds of
/// the core coordinator panic on such a call instead of deadlocking.
pub trait BatchHandler: 'static + Send + Sync + std::fmt::Debug {
    /// All sub-fetches of the epoch have reported back. Called exactly
    /// once per epoch.
    fn on_batch_stable(&self, epoch: Epoch, model: AggregateViewModel) {
        drop((epoch, model));
    }

    /// A single row was refreshed by a lazy fetch after the batch had
    /// already stabilized.
    fn on_element_updated(&self, epoch: Epoch, key: RequestKey) {
        drop((epoch, key));
    }
}

/// Trait-object [BatchHandler].
pub type DynBatchHandler = Arc<dyn BatchHandler>;

/// Fans out one sub-fetch per element of a parent collection and joins
/// them into an [AggregateViewModel].
///
/// Each batch belongs to an [Epoch]. Starting a newer epoch, or
/// cancelling, makes every result of older epochs stale: such results
/// are dropped without touching the model or calling the handler.
pub trait Coordinator: 'static + Send + Sync + std::fmt::Debug {
    /// The current epoch.
    fn current_epoch(&self) -> Epoch;

    /// Supersede the current epoch and return the next one, to be passed
    /// to [Coordinator::start_batch], [Coordinator::seed_batch] or
    /// [Coordinator::fail_batch] once the parent collection is known.
    ///
    /// Once the last epoch is reached the coordinator is exhausted: the
    /// current batch is still superseded, but the last epoch is returned
    /// and no batch is accepted for it anymore.
    fn begin_epoch(&self) -> Epoch;

    /// Start a fan-out batch for the given epoch.
    ///
    /// The epoch must be newer than the current one, or equal to it if
    /// no batch was started for it yet. Anything else is rejected.
    /// An empty collection stabilizes synchronously, before this returns.
    fn start_batch(&self, items: Vec<Item>, epoch: Epoch) -> FolioResult<()>;

    /// Seed the model for the given epoch without fanning out and
    /// stabilize immediately. Rows are then expected to be filled in
    /// lazily through [Coordinator::merge_row].
    fn seed_batch(&self, items: Vec<Item>, epoch: Epoch) -> FolioResult<()>;

    /// The parent fetch failed. The epoch stabilizes with a single
    /// synthetic element carrying the error marker.
    fn fail_batch(&self, epoch: Epoch, error: ErrorMarker) -> FolioResult<()>;

    /// A sub-fetch of a batch reported back.
    ///
    /// Stale epochs and keys that are not outstanding are ignored.
    /// Otherwise the result is merged, the ticket is dropped and, if it
    /// was the last outstanding one, the batch stabilizes.
    fn on_sub_fetch_complete(
        &self,
        key: RequestKey,
        epoch: Epoch,
        result: FolioResult<bytes::Bytes>,
    );

    /// Merge a lazily fetched row into the stabilized model of the
    /// current epoch and notify the handler. This does not interact
    /// with the outstanding set. Returns true if the row was merged.
    fn merge_row(
        &self,
        key: RequestKey,
        epoch: Epoch,
        result: FolioResult<bytes::Bytes>,
    ) -> bool;

    /// Cancel the current batch. The epoch moves forward, all in-flight
    /// sub-fetches are aborted and their results, should they still
    /// arrive, are ignored. An exhausted coordinator stays on its last
    /// epoch and keeps refusing results for it.
    fn cancel_batch(&self);

    /// Has the current epoch stabilized?
    fn is_stable(&self) -> bool;

    /// A copy of one element of the current model.
    fn element(&self, key: &RequestKey) -> Option<AggregateElement>;

    /// A copy of the current model.
    fn snapshot(&self) -> AggregateViewModel;

    /// Number of sub-fetches of the current epoch still outstanding.
    fn outstanding_count(&self) -> usize;
}

/// Trait-object [Coordinator].
pub type DynCoordinator = Arc<dyn Coordinator>;

/// A factory for creating [Coordinator] instances.
pub trait CoordinatorFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut Config) -> FolioResult<()>;

    /// Validate configuration.
    fn validate_config(&self, config: &Config) -> FolioResult<()>;

    /// Construct a coordinator fetching sub-resources through the given
    /// gateway and reporting to the given handler.
    ///
    /// Must be called from within a tokio runtime, sub-fetches are
    /// spawned onto it.
    fn create(
        &self,
        builder: Arc<Builder>,
        gateway: DynGateway,
        handler: DynBatchHandler,
    ) -> FolioResult<DynCoordinator>;
}

/// Trait-object [CoordinatorFactory].
pub type DynCoordinatorFactory = Arc<dyn CoordinatorFactory>;
