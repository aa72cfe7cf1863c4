//! The mem gateway implementation provided by Folio.
//!
//! Serves collections and sub-resources out of a shared [MemRemote],
//! which plays the part of the remote service. Useful for testing and
//! for hosts that already hold their data locally.

use folio_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// MemGateway configuration types.
mod config {
    /// Configuration parameters for [MemGatewayFactory](super::MemGatewayFactory).
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
    #[serde(rename_all = "camelCase", default)]
    pub struct MemGatewayConfig {
        /// Simulated latency of every call, in milliseconds.
        ///
        /// Default: 0.
        pub response_delay_ms: u32,
    }

    impl MemGatewayConfig {
        /// Get the response delay as a [std::time::Duration].
        pub fn response_delay(&self) -> std::time::Duration {
            std::time::Duration::from_millis(self.response_delay_ms as u64)
        }
    }

    /// Module-level configuration for MemGateway.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
    #[serde(rename_all = "camelCase", default)]
    pub struct MemGatewayModConfig {
        /// MemGateway configuration.
        pub mem_gateway: MemGatewayConfig,
    }

    impl folio_api::config::ModConfig for MemGatewayModConfig {}
}

pub use config::*;

type SubKey = (CollectionId, RequestKey);

#[derive(Debug, Default)]
struct RemoteInner {
    collections: HashMap<CollectionId, FolioResult<Vec<Item>>>,
    sub_resources: HashMap<SubKey, FolioResult<bytes::Bytes>>,
    collection_fetches: HashMap<CollectionId, usize>,
    sub_fetches: HashMap<SubKey, usize>,
}

/// In-memory stand-in for the remote service.
///
/// Holds the answer to every call and counts the calls made, so tests
/// can assert how many requests actually reached the "network".
#[derive(Debug, Default)]
pub struct MemRemote(Mutex<RemoteInner>);

impl MemRemote {
    /// Construct a new, empty, shared remote.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, RemoteInner> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the items a collection answers with.
    pub fn set_collection(&self, collection: CollectionId, items: Vec<Item>) {
        self.lock().collections.insert(collection, Ok(items));
    }

    /// Make fetching a collection fail.
    pub fn fail_collection(&self, collection: CollectionId, err: FolioError) {
        self.lock().collections.insert(collection, Err(err));
    }

    /// Set the sub-resource of one collection element.
    pub fn set_sub_resource(
        &self,
        collection: CollectionId,
        key: RequestKey,
        payload: bytes::Bytes,
    ) {
        self.lock()
            .sub_resources
            .insert((collection, key), Ok(payload));
    }

    /// Make fetching the sub-resource of one collection element fail.
    pub fn fail_sub_resource(
        &self,
        collection: CollectionId,
        key: RequestKey,
        err: FolioError,
    ) {
        self.lock().sub_resources.insert((collection, key), Err(err));
    }

    /// How many times the collection was fetched.
    pub fn collection_fetch_count(&self, collection: &CollectionId) -> usize {
        self.lock()
            .collection_fetches
            .get(collection)
            .copied()
            .unwrap_or_default()
    }

    /// How many times the sub-resource for a key was fetched.
    pub fn sub_fetch_count(
        &self,
        collection: &CollectionId,
        key: &RequestKey,
    ) -> usize {
        self.lock()
            .sub_fetches
            .get(&(collection.clone(), key.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// How many sub-resource fetches were made for a collection overall.
    pub fn total_sub_fetch_count(&self, collection: &CollectionId) -> usize {
        self.lock()
            .sub_fetches
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|(_, count)| *count)
            .sum()
    }

    fn fetch_collection(
        &self,
        collection: &CollectionId,
    ) -> FolioResult<Vec<Item>> {
        let mut lock = self.lock();
        *lock
            .collection_fetches
            .entry(collection.clone())
            .or_default() += 1;
        lock.collections
            .get(collection)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn fetch_sub_resource(
        &self,
        collection: &CollectionId,
        key: RequestKey,
    ) -> FolioResult<bytes::Bytes> {
        let sub_key = (collection.clone(), key);
        let mut lock = self.lock();
        *lock.sub_fetches.entry(sub_key.clone()).or_default() += 1;
        lock.sub_resources.get(&sub_key).cloned().unwrap_or_else(|| {
            Err(FolioError::remote(
                404,
                format!("no such resource: {}", sub_key.1),
            ))
        })
    }
}

/// The mem gateway implementation provided by Folio.
#[derive(Debug)]
pub struct MemGatewayFactory {
    remote: Arc<MemRemote>,
}

impl MemGatewayFactory {
    /// Construct a new MemGatewayFactory serving from the given remote.
    pub fn create(remote: Arc<MemRemote>) -> DynGatewayFactory {
        let out: DynGatewayFactory = Arc::new(MemGatewayFactory { remote });
        out
    }
}

impl GatewayFactory for MemGatewayFactory {
    fn default_config(&self, config: &mut Config) -> FolioResult<()> {
        config.set_module_config(&MemGatewayModConfig::default())
    }

    fn validate_config(&self, _config: &Config) -> FolioResult<()> {
        Ok(())
    }

    fn create(
        &self,
        builder: Arc<Builder>,
        collection: CollectionId,
    ) -> BoxFut<'static, FolioResult<DynGateway>> {
        let remote = self.remote.clone();
        Box::pin(async move {
            let config: MemGatewayModConfig =
                builder.config.get_module_config()?;
            let out: DynGateway = Arc::new(MemGateway {
                config: config.mem_gateway,
                collection,
                remote,
            });
            Ok(out)
        })
    }
}

#[derive(Debug)]
struct MemGateway {
    config: MemGatewayConfig,
    collection: CollectionId,
    remote: Arc<MemRemote>,
}

impl MemGateway {
    async fn delay(&self) {
        let delay = self.config.response_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Gateway for MemGateway {
    fn fetch_collection(&self) -> BoxFut<'_, FolioResult<Vec<Item>>> {
        Box::pin(async move {
            self.delay().await;
            self.remote.fetch_collection(&self.collection)
        })
    }

    fn fetch_sub_resource(
        &self,
        key: RequestKey,
    ) -> BoxFut<'_, FolioResult<bytes::Bytes>> {
        Box::pin(async move {
            self.delay().await;
            self.remote.fetch_sub_resource(&self.collection, key)
        })
    }
}
