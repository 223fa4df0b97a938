//! Small pieces of configuration shared verbatim by both binaries: the
//! WebSocket subprotocol tag exchanged during the upgrade, and the
//! `CONFIG_TIMEOUT` env var governing how long either side waits for the
//! other's `ConfigRequest`/`ConfigResponse`.

use std::time::Duration;

/// Negotiated during the WebSocket upgrade so a plain HTTP client hitting
/// the front door gets a normal response rather than an upgrade.
pub const PROTOCOL_TAG: &str = "tunnel-v1";

const DEFAULT_CONFIG_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the config exchange (post-auth) may take before the waiting
/// side gives up, per `spec.md` §4.C/§6. Overridable by `CONFIG_TIMEOUT`.
pub fn config_timeout() -> Duration {
    std::env::var("CONFIG_TIMEOUT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CONFIG_TIMEOUT)
}
