#![deny(missing_docs)]
//! Folio fetch-and-aggregate coordination core.
//!
//! Provides the production module implementations behind the traits of
//! [folio_api], plus the [scope::CancellationScope] tying work to the
//! lifetime of a consuming view and the [session::ViewSession] that wires
//! everything together for one view.

use folio_api::{builder::Builder, config::Config, *};

/// Construct a production-ready default builder.
///
/// - `gateway` - The gateway to the remote service, supplied by the host.
/// - `coordinator` - The default coordinator is
///   [factories::CoreCoordinatorFactory].
/// - `tracker` - The default tracker is [factories::CoreTrackerFactory].
pub fn default_builder(gateway: DynGatewayFactory) -> Builder {
    Builder {
        config: Config::default(),
        gateway,
        coordinator: factories::CoreCoordinatorFactory::create(),
        tracker: factories::CoreTrackerFactory::create(),
    }
}

/// Construct a default builder for testing, serving from a fresh,
/// empty [factories::MemRemote].
pub fn default_test_builder() -> Builder {
    default_builder(factories::MemGatewayFactory::create(
        factories::MemRemote::new(),
    ))
}

pub mod factories;
pub mod scope;
pub mod session;
