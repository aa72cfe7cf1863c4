//! The core single-flight key tracker implementation provided by Folio.

use folio_api::*;
use std::collections::{hash_map::Entry, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

/// The core single-flight key tracker implementation provided by Folio.
///
/// One tracker is created per view lifetime, so tickets are never shared
/// between lifetimes.
#[derive(Debug)]
pub struct CoreTrackerFactory {}

impl CoreTrackerFactory {
    /// Construct a new CoreTrackerFactory.
    pub fn create() -> DynTrackerFactory {
        let out: DynTrackerFactory = Arc::new(CoreTrackerFactory {});
        out
    }
}

impl TrackerFactory for CoreTrackerFactory {
    fn default_config(&self, _config: &mut Config) -> FolioResult<()> {
        Ok(())
    }

    fn validate_config(&self, _config: &Config) -> FolioResult<()> {
        Ok(())
    }

    fn create(&self, _builder: Arc<Builder>) -> FolioResult<DynTracker> {
        let out: DynTracker = Arc::new(CoreTracker::default());
        Ok(out)
    }
}

type Inner = HashMap<RequestKey, FetchTicket>;

#[derive(Debug, Default)]
struct CoreTracker(Mutex<Inner>);

impl CoreTracker {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Tracker for CoreTracker {
    fn acquire(&self, key: RequestKey) -> bool {
        match self.lock().entry(key) {
            Entry::Occupied(o) => {
                tracing::trace!(key = %o.key(), "fetch already in flight");
                false
            }
            Entry::Vacant(v) => {
                let ticket = FetchTicket::new(Some(v.key().clone()));
                v.insert(ticket);
                true
            }
        }
    }

    fn release(&self, key: &RequestKey) {
        if let Some(mut ticket) = self.lock().remove(key) {
            ticket.complete();
        }
    }

    fn is_in_flight(&self, key: &RequestKey) -> bool {
        self.lock().contains_key(key)
    }

    fn release_all(&self) {
        let mut lock = self.lock();
        for ticket in lock.values_mut() {
            ticket.cancel();
        }
        if !lock.is_empty() {
            tracing::debug!(count = lock.len(), "dropping in-flight tickets");
        }
        lock.clear();
    }

    fn in_flight_count(&self) -> usize {
        self.lock().len()
    }
}
