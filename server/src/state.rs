//! Shared application state threaded through the axum router and every
//! spawned tunnel task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rustls::ServerConfig as RustlsServerConfig;
use tokio_util::sync::CancellationToken;

use tunnel_core::crypto::Identity;
use tunnel_core::session::SessionTable;
use tunnel_core::store::UserStore;

use crate::tunnel::TunnelHandle;

/// Everything a connection handler needs: identity material, the user/
/// session tables, the registry of live tunnels (for admin introspection),
/// and the top-level cancellation token every suspension point honors.
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<Identity>,
    pub users: UserStore,
    pub sessions: SessionTable,
    pub tunnels: Arc<DashMap<u64, TunnelHandle>>,
    pub tls: Option<Arc<RustlsServerConfig>>,
    pub keepalive: Duration,
    pub shutdown: CancellationToken,
    next_tunnel_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        identity: Identity,
        users: UserStore,
        session_timeout: Duration,
        tls: Option<Arc<RustlsServerConfig>>,
        keepalive: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            identity: Arc::new(identity),
            users,
            sessions: SessionTable::new(session_timeout),
            tunnels: Arc::new(DashMap::new()),
            tls,
            keepalive,
            shutdown,
            next_tunnel_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_tunnel_id(&self) -> u64 {
        self.next_tunnel_id.fetch_add(1, Ordering::Relaxed)
    }
}
