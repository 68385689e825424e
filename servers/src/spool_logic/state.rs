use std::sync::Arc;

use lib_spool::{ActiveSpool, ProxyGateway, SpoolmanStream, UsageAccumulator};

/// Shared handle over the engine components, cloned into every endpoint
/// handler and background task.
#[derive(Clone)]
pub struct AppState {
    pub active: Arc<ActiveSpool>,
    pub stream: Arc<SpoolmanStream>,
    pub gateway: Arc<ProxyGateway>,
    pub accumulator: Arc<UsageAccumulator>,
}
