//! Server half of the reverse tunnel: control plane (secure-channel
//! handshake, session table, user store), proxy listeners, and the stream
//! bridge that carries bytes between a listener and its tunnel.

pub mod admin;
pub mod bridge;
pub mod config;
pub mod handshake;
pub mod listener;
pub mod passthrough;
pub mod router;
pub mod state;
pub mod tls;
pub mod tunnel;
pub mod ws_handler;

pub use config::ServerArgs;

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use tunnel_core::crypto::Identity;
use tunnel_core::store::UserStore;

/// Bring up the front door, serve until a shutdown signal arrives, then
/// tear everything down: stop accepting new tunnels, cancel the ones in
/// flight, and remove the pid file if one was written.
pub async fn run(args: ServerArgs) -> anyhow::Result<()> {
    let identity = Identity::load_or_generate(&args.keyfile).await?;
    tracing::info!(fingerprint = %identity.fingerprint().as_str(), "identity loaded");

    let users = match &args.authfile {
        Some(path) => {
            let store = UserStore::load(path).await?;
            store.clone().watch(path.clone());
            store
        }
        None => UserStore::new(),
    };

    let tls = resolve_tls(&args).await?;

    let shutdown = CancellationToken::new();
    let state = state::AppState::new(
        identity,
        users,
        args.session_timeout(),
        tls,
        args.keepalive,
        shutdown.clone(),
    );

    if let Some(pid_path) = &args.pid {
        tokio::fs::write(pid_path, std::process::id().to_string()).await?;
    }

    let app = router::build(state.clone(), args.authfile.clone(), args.proxy.clone());
    let bind_addr = args.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, tls = tls_kind(&args), "front door listening");

    let serve_shutdown = shutdown.clone();
    let serve = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { serve_shutdown.cancelled().await });

    tokio::select! {
        result = serve => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server loop exited with error");
            }
        }
        _ = wait_for_shutdown_signal() => {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    }

    if let Some(pid_path) = &args.pid {
        let _ = tokio::fs::remove_file(pid_path).await;
    }

    Ok(())
}

fn tls_kind(args: &config::ServerArgs) -> &'static str {
    if args.tls_ca.is_some() {
        "mutual"
    } else if args.tls_requested() {
        "server-only"
    } else {
        "none"
    }
}

async fn resolve_tls(
    args: &ServerArgs,
) -> anyhow::Result<Option<Arc<rustls::ServerConfig>>> {
    if let Some(domain) = &args.tls_domain {
        return Ok(Some(tls::generate_self_signed(domain)?));
    }
    if let (Some(key), Some(cert)) = (&args.tls_key, &args.tls_cert) {
        return Ok(Some(
            tls::load_tls_config(cert, key, args.tls_ca.as_deref()).await?,
        ));
    }
    Ok(None)
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
