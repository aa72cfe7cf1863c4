//! Factories for generating instances of Folio modules.

pub mod core_coordinator;
pub use core_coordinator::CoreCoordinatorFactory;

mod core_tracker;
pub use core_tracker::*;

pub mod mem_gateway;
pub use mem_gateway::{MemGatewayFactory, MemRemote};
