//! Builder-related types.

use crate::*;
use std::sync::Arc;

/// The general folio builder.
/// This contains both configuration and factory instances,
/// allowing construction of runtime module instances.
#[derive(Debug)]
pub struct Builder {
    /// The module configuration to be used when building modules.
    /// This can be loaded from disk or modified before freezing the builder.
    pub config: Config,

    /// The [gateway::GatewayFactory] to be used for creating
    /// [gateway::Gateway] instances.
    pub gateway: DynGatewayFactory,

    /// The [coordinator::CoordinatorFactory] to be used for creating
    /// [coordinator::Coordinator] instances.
    pub coordinator: DynCoordinatorFactory,

    /// The [tracker::TrackerFactory] to be used for creating
    /// [tracker::Tracker] instances.
    pub tracker: DynTrackerFactory,
}

impl Builder {
    /// Construct a default config given the configured module factories.
    /// Note, this should be called before freezing the Builder instance
    /// in an Arc<>.
    pub fn with_default_config(mut self) -> FolioResult<Self> {
        {
            let Self {
                config,
                gateway,
                coordinator,
                tracker,
            } = &mut self;

            gateway.default_config(config)?;
            coordinator.default_config(config)?;
            tracker.default_config(config)?;
        }

        Ok(self)
    }

    /// Ask every module factory to validate the current config.
    pub fn validate_config(&self) -> FolioResult<()> {
        self.gateway.validate_config(&self.config)?;
        self.coordinator.validate_config(&self.config)?;
        self.tracker.validate_config(&self.config)?;
        Ok(())
    }

    /// Validate the config and freeze the builder, ready to create
    /// module instances.
    pub fn build(self) -> FolioResult<Arc<Self>> {
        self.validate_config()?;
        Ok(Arc::new(self))
    }
}
