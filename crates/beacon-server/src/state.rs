//! Application state.

use beacon_config::ConsoleConfig;
use beacon_hub::{BridgeState, DistributionHub};
use std::sync::Arc;
use tokio::sync::watch;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<DistributionHub>,
    pub console: Arc<ConsoleConfig>,
    pub bridges: Arc<Vec<(String, watch::Receiver<BridgeState>)>>,
}

impl AppState {
    pub fn new(
        hub: Arc<DistributionHub>,
        console: ConsoleConfig,
        bridges: Vec<(String, watch::Receiver<BridgeState>)>,
    ) -> Self {
        Self {
            hub,
            console: Arc::new(console),
            bridges: Arc::new(bridges),
        }
    }
}
