//! Client half of the reverse tunnel: resolves CLI/profile configuration,
//! dials the server, runs the secure-channel handshake, then drives the
//! multiplexed tunnel that answers the server's `StreamOpen` requests by
//! dialing real destinations on the client's side of the network.

pub mod config;
pub mod connection;
pub mod dial;
pub mod handshake;
pub mod state;
pub mod stats;
pub mod tls;
pub mod tunnel;

pub use config::ClientArgs;

use tokio_util::sync::CancellationToken;

use state::AppState;

pub async fn run(args: ClientArgs) -> anyhow::Result<()> {
    let resolved = args.resolve().await?;
    let shutdown = CancellationToken::new();
    let state = AppState::new(resolved, shutdown);
    connection::run(state).await
}
