//! A batch handler that records every callback.

use folio_api::*;
use std::sync::{Arc, Mutex};

/// Records every [BatchHandler] callback for later inspection.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    stable: Mutex<Vec<(Epoch, AggregateViewModel)>>,
    updated: Mutex<Vec<(Epoch, RequestKey)>>,
}

impl RecordingHandler {
    /// Construct a new recording handler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every `on_batch_stable` call so far, oldest first.
    pub fn stable(&self) -> Vec<(Epoch, AggregateViewModel)> {
        self.stable.lock().unwrap().clone()
    }

    /// Number of `on_batch_stable` calls so far.
    pub fn stable_count(&self) -> usize {
        self.stable.lock().unwrap().len()
    }

    /// The model passed to the latest `on_batch_stable` call.
    pub fn last_stable(&self) -> Option<AggregateViewModel> {
        self.stable.lock().unwrap().last().map(|(_, m)| m.clone())
    }

    /// Every `on_element_updated` call so far, oldest first.
    pub fn updated(&self) -> Vec<(Epoch, RequestKey)> {
        self.updated.lock().unwrap().clone()
    }
}

impl BatchHandler for RecordingHandler {
    fn on_batch_stable(&self, epoch: Epoch, model: AggregateViewModel) {
        self.stable.lock().unwrap().push((epoch, model));
    }

    fn on_element_updated(&self, epoch: Epoch, key: RequestKey) {
        self.updated.lock().unwrap().push((epoch, key));
    }
}
