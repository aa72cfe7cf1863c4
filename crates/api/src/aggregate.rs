//! The aggregate view model: a parent collection merged with the
//! sub-resources fetched for each of its elements.
//!
//! Failures never cross into the presentation layer as errors. They are
//! recorded as an [ErrorMarker] on the element they concern, or on a
//! single synthetic element when the parent collection itself could not
//! be fetched.

use crate::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Error codes exposed on an [ErrorMarker].
///
/// Failures reported by the remote service keep whatever code the
/// service used (e.g. an http status), the codes here are the ones
/// assigned locally.
pub mod error_code {
    /// Sentinel meaning "no error".
    pub const NO_ERROR: i32 = -1;

    /// A failure with no more specific code.
    pub const API_ERROR: i32 = 1;

    /// Description used for [API_ERROR] when nothing better is known.
    pub const API_ERROR_DESCRIPTION: &str = "There was an error";

    /// The parent collection came back empty and the view treats that
    /// as a failure.
    pub const NO_COLLECTION: i32 = 3;

    /// Description used for [NO_COLLECTION].
    pub const NO_COLLECTION_DESCRIPTION: &str = "There are no portfolios";
}

/// The error channel of the presentation boundary.
///
/// `code` is [error_code::NO_ERROR] when there is no error, in which case
/// there is no description. Any other code always carries a description.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ErrorMarker {
    /// The error code, [error_code::NO_ERROR] if not an error.
    #[serde(rename = "errorCode")]
    pub code: i32,

    /// Description of the error, required whenever `code` is an error.
    #[serde(rename = "errorDescription")]
    pub description: Option<Arc<str>>,
}

impl Default for ErrorMarker {
    fn default() -> Self {
        Self::NONE
    }
}

impl ErrorMarker {
    /// The "no error" marker.
    pub const NONE: ErrorMarker = ErrorMarker {
        code: error_code::NO_ERROR,
        description: None,
    };

    /// Construct an error marker.
    ///
    /// Passing [error_code::NO_ERROR] is treated as [error_code::API_ERROR]
    /// so that a marker built through this constructor is always an error.
    pub fn new<D: std::fmt::Display>(code: i32, description: D) -> Self {
        let code = if code == error_code::NO_ERROR {
            error_code::API_ERROR
        } else {
            code
        };
        Self {
            code,
            description: Some(description.to_string().into_boxed_str().into()),
        }
    }

    /// The marker reported for an empty parent collection, when the
    /// view is configured to treat that as a failure.
    pub fn no_collection() -> Self {
        Self::new(
            error_code::NO_COLLECTION,
            error_code::NO_COLLECTION_DESCRIPTION,
        )
    }

    /// Does this marker denote an error?
    pub fn is_error(&self) -> bool {
        self.code != error_code::NO_ERROR
    }
}

impl From<&FolioError> for ErrorMarker {
    fn from(err: &FolioError) -> Self {
        match err {
            FolioError::Remote { code, description } => {
                ErrorMarker::new(*code, description)
            }
            err => ErrorMarker::new(error_code::API_ERROR, err),
        }
    }
}

impl From<FolioError> for ErrorMarker {
    fn from(err: FolioError) -> Self {
        (&err).into()
    }
}

/// One element of the aggregate view model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateElement {
    /// The key of the collection element.
    /// `None` only for the synthetic parent failure element.
    pub key: Option<RequestKey>,

    /// The collection element as returned by the gateway.
    pub data: bytes::Bytes,

    /// The sub-resource, once fetched successfully.
    pub payload: Option<bytes::Bytes>,

    /// Error marker, [ErrorMarker::NONE] unless the fetch failed.
    pub error: ErrorMarker,
}

impl AggregateElement {
    fn seeded(item: Item) -> Self {
        Self {
            key: Some(item.key),
            data: item.data,
            payload: None,
            error: ErrorMarker::NONE,
        }
    }

    /// Has a sub-fetch for this element reported back, either way?
    pub fn is_settled(&self) -> bool {
        self.payload.is_some() || self.error.is_error()
    }
}

/// The merged in-memory result of a parent fetch plus all of its
/// completed sub-fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateViewModel {
    epoch: Epoch,
    elements: Vec<AggregateElement>,
    index: HashMap<RequestKey, usize>,
}

impl AggregateViewModel {
    /// An empty model for an epoch.
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            ..Default::default()
        }
    }

    /// Seed a model from a parent collection. Elements keep the order of
    /// the collection. If a key appears more than once, only the first
    /// element with that key is kept.
    pub fn seed(epoch: Epoch, items: Vec<Item>) -> Self {
        let mut out = Self::new(epoch);
        out.elements.reserve(items.len());
        for item in items {
            if out.index.contains_key(&item.key) {
                tracing::warn!(
                    %epoch,
                    key = %item.key,
                    "dropping duplicate collection element"
                );
                continue;
            }
            out.index.insert(item.key.clone(), out.elements.len());
            out.elements.push(AggregateElement::seeded(item));
        }
        out
    }

    /// A model representing a failed parent fetch: a single synthetic
    /// element carrying the error marker and nothing else.
    pub fn parent_failure(epoch: Epoch, error: ErrorMarker) -> Self {
        let mut out = Self::new(epoch);
        out.elements.push(AggregateElement {
            key: None,
            data: bytes::Bytes::new(),
            payload: None,
            error,
        });
        out
    }

    /// Merge the result of a sub-resource fetch into the element with
    /// the given key.
    ///
    /// A success attaches the payload and clears any previous error, a
    /// failure records the error and clears any previous payload.
    /// Returns false if no element has that key.
    pub fn merge(
        &mut self,
        key: &RequestKey,
        result: FolioResult<bytes::Bytes>,
    ) -> bool {
        let Some(idx) = self.index.get(key) else {
            return false;
        };
        let element = &mut self.elements[*idx];
        match result {
            Ok(payload) => {
                element.payload = Some(payload);
                element.error = ErrorMarker::NONE;
            }
            Err(err) => {
                element.payload = None;
                element.error = ErrorMarker::from(&err);
            }
        }
        true
    }

    /// The epoch this model belongs to.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// All elements in collection order.
    pub fn elements(&self) -> &[AggregateElement] {
        &self.elements
    }

    /// Get the element with a key.
    pub fn get(&self, key: &RequestKey) -> Option<&AggregateElement> {
        self.index.get(key).map(|idx| &self.elements[*idx])
    }

    /// Keys of all keyed elements in collection order.
    pub fn keys(&self) -> impl Iterator<Item = &RequestKey> {
        self.elements.iter().filter_map(|e| e.key.as_ref())
    }

    /// Number of elements, including a synthetic failure element.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Is this the model of a failed parent fetch?
    pub fn is_parent_failure(&self) -> bool {
        self.elements.len() == 1 && self.elements[0].key.is_none()
    }

    /// Has every keyed element been settled by a sub-fetch?
    pub fn is_complete(&self) -> bool {
        self.elements
            .iter()
            .filter(|e| e.key.is_some())
            .all(AggregateElement::is_settled)
    }
}
