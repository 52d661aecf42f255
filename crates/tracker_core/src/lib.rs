use std::sync::Arc;

use chat_gateway::ChatGateway;
use shared::domain::ChannelId;
use storage::Storage;

pub mod error;
pub mod flows;
pub mod ledger;
pub mod panels;
pub mod reference;
pub mod runs;

#[cfg(test)]
mod test_support;

pub use error::TrackerError;
pub use flows::handle_interaction;
pub use reference::{Location, ReferenceData, StaticLocations};

#[derive(Debug, Clone, Default)]
pub struct TrackerSettings {
    /// Channel moved under the first run's category when no earlier run has a general channel.
    pub initial_general_channel: Option<ChannelId>,
}

/// Everything a tracker operation needs: the ledger, the chat platform and the location names.
#[derive(Clone)]
pub struct TrackerContext {
    pub storage: Storage,
    pub gateway: Arc<dyn ChatGateway>,
    pub locations: Arc<dyn ReferenceData>,
    pub settings: TrackerSettings,
}
