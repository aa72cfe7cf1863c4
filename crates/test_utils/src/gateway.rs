//! Test gateways whose calls resolve only when the test says so.

use bytes::Bytes;
use folio_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

type Pending = oneshot::Sender<FolioResult<Bytes>>;

#[derive(Debug, Default)]
struct Inner {
    pending: HashMap<RequestKey, Vec<Pending>>,
    sub_fetch_count: usize,
}

/// A gateway whose sub-resource fetches stay pending until released by
/// the test, so completion order can be chosen freely.
///
/// The collection is answered immediately with whatever was configured.
/// Fetches whose pending call is dropped unanswered resolve with an
/// error.
#[derive(Debug)]
pub struct GatedGateway {
    collection: Mutex<FolioResult<Vec<Item>>>,
    inner: Mutex<Inner>,
}

impl GatedGateway {
    /// Construct a gated gateway answering the collection with `items`.
    pub fn new(items: Vec<Item>) -> Arc<Self> {
        Arc::new(Self {
            collection: Mutex::new(Ok(items)),
            inner: Mutex::new(Inner::default()),
        })
    }

    /// A gateway factory handing out this very gateway, for any
    /// collection.
    pub fn factory(self: &Arc<Self>) -> DynGatewayFactory {
        let out: DynGatewayFactory =
            Arc::new(GatedGatewayFactory(self.clone()));
        out
    }

    /// Replace the answer to collection fetches.
    pub fn set_collection(&self, collection: FolioResult<Vec<Item>>) {
        *self.collection.lock().unwrap() = collection;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        let mut lock = self.inner.lock().unwrap();
        // forget calls whose caller was dropped, e.g. aborted tasks
        lock.pending.retain(|_, p| {
            p.retain(|s| !s.is_closed());
            !p.is_empty()
        });
        lock
    }

    /// Keys with at least one pending sub-fetch.
    pub fn pending_keys(&self) -> Vec<RequestKey> {
        let mut out = self.lock().pending.keys().cloned().collect::<Vec<_>>();
        out.sort();
        out
    }

    /// Number of pending sub-fetches across all keys.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.values().map(Vec::len).sum()
    }

    /// Total number of sub-fetches ever issued.
    pub fn sub_fetch_count(&self) -> usize {
        self.inner.lock().unwrap().sub_fetch_count
    }

    /// Resolve the oldest pending sub-fetch for a key.
    ///
    /// Returns false if there was none, or if its caller just went away.
    pub fn release(&self, key: &RequestKey, result: FolioResult<Bytes>) -> bool {
        let sender = {
            let mut lock = self.lock();
            match lock.pending.get_mut(key) {
                Some(p) => p.remove(0),
                None => return false,
            }
        };
        sender.send(result).is_ok()
    }

    /// Wait until at least `count` sub-fetches are pending.
    pub async fn wait_pending(&self, count: usize) {
        crate::iter_check!(5000, {
            if self.pending_count() >= count {
                break;
            }
        });
    }
}

impl Gateway for GatedGateway {
    fn fetch_collection(&self) -> BoxFut<'_, FolioResult<Vec<Item>>> {
        let out = self.collection.lock().unwrap().clone();
        Box::pin(async move { out })
    }

    fn fetch_sub_resource(
        &self,
        key: RequestKey,
    ) -> BoxFut<'_, FolioResult<Bytes>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut lock = self.inner.lock().unwrap();
            lock.sub_fetch_count += 1;
            lock.pending.entry(key).or_default().push(tx);
        }
        Box::pin(async move {
            rx.await.unwrap_or_else(|_| {
                Err(FolioError::other("gated call dropped unanswered"))
            })
        })
    }
}

#[derive(Debug)]
struct GatedGatewayFactory(Arc<GatedGateway>);

impl GatewayFactory for GatedGatewayFactory {
    fn default_config(&self, _config: &mut Config) -> FolioResult<()> {
        Ok(())
    }

    fn validate_config(&self, _config: &Config) -> FolioResult<()> {
        Ok(())
    }

    fn create(
        &self,
        _builder: Arc<Builder>,
        _collection: CollectionId,
    ) -> BoxFut<'static, FolioResult<DynGateway>> {
        let out: DynGateway = self.0.clone();
        Box::pin(async move { Ok(out) })
    }
}
