//! Folio remote service gateway types.
//!
//! The gateway performs single request/response calls against the remote
//! service. Transport, auth and serialization are all its business, the
//! coordination modules only ever see the two call shapes defined here.

use crate::*;
use std::sync::Arc;

/// One element of a parent collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// The key used to fetch this element's sub-resource.
    pub key: RequestKey,

    /// The element as returned by the remote service.
    pub data: bytes::Bytes,
}

impl Item {
    /// Construct a new collection item.
    pub fn new<K: Into<RequestKey>>(key: K, data: bytes::Bytes) -> Self {
        Self {
            key: key.into(),
            data,
        }
    }
}

/// Single-shot access to the remote service for one collection.
///
/// Implementations have no concurrency of their own. A call either
/// resolves with the typed result or with a typed failure, ideally a
/// [FolioError::Remote] carrying the code the service reported.
#[cfg_attr(any(test, feature = "mockall"), mockall::automock)]
pub trait Gateway: 'static + Send + Sync + std::fmt::Debug {
    /// Fetch the parent collection.
    fn fetch_collection(&self) -> BoxFut<'_, FolioResult<Vec<Item>>>;

    /// Fetch the sub-resource belonging to one collection element.
    fn fetch_sub_resource(
        &self,
        key: RequestKey,
    ) -> BoxFut<'_, FolioResult<bytes::Bytes>>;
}

/// Trait-object [Gateway].
pub type DynGateway = Arc<dyn Gateway>;

/// A factory for creating [Gateway] instances.
pub trait GatewayFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut Config) -> FolioResult<()>;

    /// Validate configuration.
    fn validate_config(&self, config: &Config) -> FolioResult<()>;

    /// Construct a gateway serving one collection.
    fn create(
        &self,
        builder: Arc<Builder>,
        collection: CollectionId,
    ) -> BoxFut<'static, FolioResult<DynGateway>>;
}

/// Trait-object [GatewayFactory].
pub type DynGatewayFactory = Arc<dyn GatewayFactory>;
