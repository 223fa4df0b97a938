//! `tunnel`: the single published binary. Two subcommands, `server` and
//! `client`, share the `tunnel-core` protocol/data model and the
//! `tunnel-server`/`tunnel-client` libraries that implement each half.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "tunnel", version, about = "Reverse TCP/TLS tunneling proxy")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the tunnel server: accepts client connections, exposes proxy listeners.
    Server(tunnel_server::ServerArgs),
    /// Run the tunnel client: dials a server, serves its requested remotes.
    Client(tunnel_client::ClientArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_json = match &cli.command {
        Commands::Server(a) => a.log_json,
        Commands::Client(a) => a.log_json,
    };
    init_tracing(log_json);

    let result = match cli.command {
        Commands::Server(args) => tunnel_server::run(args).await,
        Commands::Client(args) => tunnel_client::run(args).await,
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "exiting with error");
    }
    result
}

fn init_tracing(log_json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter);
    if log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
