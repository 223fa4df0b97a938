//! Connection Manager: the client's top-level state machine, cycling
//! Dialing → Handshaking → Running → Closing → (Backoff|Terminated) per
//! `spec.md` §4.H. Exponential backoff is capped by `--max-retry-interval`;
//! `--max-retry-count` (`-1` means unlimited) bounds consecutive failures.
//! `SIGHUP` short-circuits a pending backoff, `SIGUSR2` logs a stats
//! snapshot, `SIGINT`/`SIGTERM` shut the loop down gracefully.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use crate::dial::dial;
use crate::handshake::run_client_handshake;
use crate::state::AppState;
use crate::tunnel;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let (kick_tx, mut kick_rx) = watch::channel(0u64);
    spawn_signal_handlers(state.clone(), kick_tx);

    let mut backoff = INITIAL_BACKOFF;
    let mut consecutive_failures: i64 = 0;

    loop {
        if state.shutdown.is_cancelled() {
            return Ok(());
        }

        state.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);
        match connect_once(&state).await {
            Ok(()) => {
                tracing::info!("tunnel session ended cleanly");
                backoff = INITIAL_BACKOFF;
                consecutive_failures = 0;
                state.stats.consecutive_failures.store(0, Ordering::Relaxed);
            }
            Err(e) => {
                consecutive_failures += 1;
                state
                    .stats
                    .consecutive_failures
                    .store(consecutive_failures as u32, Ordering::Relaxed);
                tracing::warn!(error = %e, attempt = consecutive_failures, "tunnel connection failed");
            }
        }

        if state.shutdown.is_cancelled() {
            return Ok(());
        }

        let max_retries = state.config.args.max_retry_count;
        if max_retries >= 0 && consecutive_failures > max_retries {
            anyhow::bail!(
                "giving up after {consecutive_failures} consecutive failures (--max-retry-count {max_retries})"
            );
        }

        state.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        tracing::info!(delay = ?backoff, "reconnecting after backoff");

        let baseline = *kick_rx.borrow();
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = state.shutdown.cancelled() => return Ok(()),
            _ = wait_for_kick(&mut kick_rx, baseline) => {
                tracing::info!("backoff cut short by SIGHUP");
            }
        }

        backoff = (backoff * 2).min(state.config.args.max_retry_interval);
    }
}

async fn wait_for_kick(rx: &mut watch::Receiver<u64>, baseline: u64) {
    loop {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *rx.borrow() != baseline {
            return;
        }
    }
}

async fn connect_once(state: &Arc<AppState>) -> anyhow::Result<()> {
    let mut ws = dial(&state.config).await?;
    let handshake = run_client_handshake(&mut ws, &state.config).await?;
    state.stats.successful_connects.fetch_add(1, Ordering::Relaxed);
    tracing::info!(fingerprint = %handshake.fingerprint, "tunnel established");

    let (sink, stream) = ws.split();
    tunnel::run(
        sink,
        stream,
        handshake.send_cipher,
        handshake.recv_cipher,
        state.config.args.keepalive,
        state.stats.clone(),
        state.shutdown.clone(),
    )
    .await
}

fn spawn_signal_handlers(state: Arc<AppState>, kick_tx: watch::Sender<u64>) {
    tokio::spawn(async move {
        let mut sig = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGHUP handler");
                return;
            }
        };
        loop {
            sig.recv().await;
            let next = *kick_tx.borrow() + 1;
            let _ = kick_tx.send(next);
            tracing::info!("SIGHUP received, kicking reconnect backoff");
        }
    });

    tokio::spawn({
        let state = state.clone();
        async move {
            let mut sig = match signal(SignalKind::user_defined2()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGUSR2 handler");
                    return;
                }
            };
            loop {
                sig.recv().await;
                tracing::info!(stats = %state.stats.snapshot(), "stats snapshot");
            }
        }
    });

    tokio::spawn(async move {
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
        tokio::select! { _ = ctrl_c => {} _ = terminate => {} }
        tracing::info!("shutdown signal received");
        state.shutdown.cancel();
    });
}
