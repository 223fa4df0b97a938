//! Shared application state passed to the connection manager and every
//! tunnel it drives across reconnects.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ResolvedConfig;
use crate::stats::Stats;

/// Everything that survives across reconnects: the resolved config, the
/// stats snapshot SIGUSR2 dumps, and the top-level cancellation token.
pub struct AppState {
    pub config: ResolvedConfig,
    pub stats: Arc<Stats>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ResolvedConfig, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            config,
            stats: Arc::new(Stats::default()),
            shutdown,
        })
    }
}
