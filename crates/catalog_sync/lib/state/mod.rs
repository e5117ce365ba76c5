use std::sync::Arc;

use prometheus_client::registry::Registry;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::orchestrator::SyncOrchestrator;

pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    /// Write side of the playback-activity signal the throttle watches.
    pub playback: watch::Sender<bool>,
    pub shutdown_token: CancellationToken,
    pub registry: RwLock<Registry>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        playback: watch::Sender<bool>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            playback,
            shutdown_token,
            registry: RwLock::new(<Registry>::default()),
        }
    }
}
