//! Folio single-flight key tracker types.

use crate::*;
use std::sync::Arc;

/// Decides whether a keyed fetch may proceed, so that at most one
/// operation per key is ever in flight.
///
/// Usage: call [Tracker::acquire] before starting a fetch for a key and
/// only issue the call if it returned true. Whoever acquired the key
/// calls [Tracker::release] once the fetch resolved, successfully or
/// not. This keeps a row that is scrolled into view several times from
/// issuing duplicate fetches.
///
/// A tracker never fails, it only decides.
pub trait Tracker: 'static + Send + Sync + std::fmt::Debug {
    /// Record the key as in flight and return true, or return false if
    /// it already was. Two concurrent callers for the same key never
    /// both get true.
    fn acquire(&self, key: RequestKey) -> bool;

    /// Remove the key's ticket. Releasing a key that is not in flight
    /// is a no-op.
    fn release(&self, key: &RequestKey);

    /// Is there an operation in flight for the key?
    fn is_in_flight(&self, key: &RequestKey) -> bool;

    /// Drop every ticket. Called when the owning scope exits.
    fn release_all(&self);

    /// Number of keys currently in flight.
    fn in_flight_count(&self) -> usize;
}

/// Trait-object [Tracker].
pub type DynTracker = Arc<dyn Tracker>;

/// A factory for creating [Tracker] instances.
pub trait TrackerFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut Config) -> FolioResult<()>;

    /// Validate configuration.
    fn validate_config(&self, config: &Config) -> FolioResult<()>;

    /// Construct a tracker instance.
    fn create(&self, builder: Arc<Builder>) -> FolioResult<DynTracker>;
}

/// Trait-object [TrackerFactory].
pub type DynTrackerFactory = Arc<dyn TrackerFactory>;
