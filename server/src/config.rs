//! Server CLI/config surface, matching `spec.md` §6's server flags. CLI
//! parsing itself is out of scope per spec.md §1 ("CLI argument parsing...
//! noted in §6 only"); this is the informative shape, wired up by the
//! `tunnel-cli` binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use tunnel_core::session::DEFAULT_SESSION_TIMEOUT;

/// How long the handshake (hello exchange + auth + config) may take before
/// the connection is dropped.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Args)]
pub struct ServerArgs {
    /// Address the control-plane HTTP/WebSocket front door listens on.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port the front door listens on. Defaults to 443 when TLS is
    /// configured, 8080 otherwise.
    #[arg(long, short = 'p', env = "PORT")]
    pub port: Option<u16>,

    /// Path to the JSON authfile. Omit to run without authentication
    /// (every `AuthRequest` is accepted anonymously).
    #[arg(long, env = "AUTH")]
    pub authfile: Option<PathBuf>,

    /// Path to the persisted ed25519 identity seed. Generated on first run
    /// if absent.
    #[arg(long, env = "KEY_FILE", default_value = "server.key")]
    pub keyfile: PathBuf,

    /// Keepalive ping interval sent to every connected client.
    #[arg(long, default_value = "25s", value_parser = humantime::parse_duration)]
    pub keepalive: Duration,

    /// Operator-supplied TLS certificate (PEM). Paired with `--tls-key`;
    /// mutually exclusive with `--tls-domain`.
    #[arg(long, conflicts_with = "tls_domain")]
    pub tls_key: Option<PathBuf>,

    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// Request a self-signed certificate for this name instead of supplying
    /// `--tls-key`/`--tls-cert` (repeatable in the real CLI; stored here as
    /// a single name, ACME acquisition itself is out of scope per spec.md §1).
    #[arg(long, conflicts_with = "tls_key")]
    pub tls_domain: Option<String>,

    /// CA bundle (PEM) used to verify client certificates, enabling mutual
    /// TLS. Requires TLS to already be configured via `--tls-key`/`--tls-cert`
    /// or `--tls-domain`.
    #[arg(long)]
    pub tls_ca: Option<PathBuf>,

    /// Reverse-proxy every request that isn't a tunnel upgrade or a front-door
    /// route to this base URL.
    #[arg(long)]
    pub proxy: Option<reqwest::Url>,

    /// Idle timeout before a session is evicted from the session table.
    #[arg(long, default_value_t = DEFAULT_SESSION_TIMEOUT.as_secs())]
    pub session_timeout_secs: u64,

    /// Write the process id to this path on startup, removed on clean
    /// shutdown.
    #[arg(long)]
    pub pid: Option<PathBuf>,

    /// Emit logs as JSON instead of the default human-readable format.
    #[arg(long)]
    pub log_json: bool,

    /// Verbose logging (shorthand for RUST_LOG=debug).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl ServerArgs {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn tls_requested(&self) -> bool {
        self.tls_key.is_some() || self.tls_domain.is_some()
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let port = self
            .port
            .unwrap_or(if self.tls_requested() { 443 } else { 8080 });
        format!("{}:{port}", self.host)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address {}:{port}: {e}", self.host))
    }
}
