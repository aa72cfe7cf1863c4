#![deny(missing_docs)]
//! Folio API contains the module traits and the basic types required
//! to define the api of those traits.
//!
//! The modules coordinate asynchronous fetches against a remote service
//! on behalf of a consuming view: a parent collection is fetched, a
//! dependent sub-resource is fetched for every element, and the merged
//! result is handed to the view exactly once per generation.
//!
//! If you want working implementations, please see the folio_core crate.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub mod aggregate;
pub use aggregate::*;

pub mod builder;
pub use builder::*;

pub mod config;
pub use config::*;

pub mod coordinator;
pub use coordinator::*;

mod error;
pub use error::*;

pub mod gateway;
pub use gateway::*;

pub mod id;
pub use id::{CollectionId, Epoch, RequestKey};

pub mod ticket;
pub use ticket::*;

pub mod tracker;
pub use tracker::*;
