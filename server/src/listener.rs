//! Proxy Listener: binds `local_host:local_port` for one remote spec,
//! accepts TCP (optionally TLS) connections, and opens a fresh multiplexed
//! stream through the owning tunnel for each. Grounded on the
//! cancel-channel accept-loop pattern used for reverse listeners elsewhere
//! in the corpus: bind once, spawn an accept loop racing `accept()` against
//! a cancellation signal so a closed tunnel unblocks a pending `accept`.

use std::sync::Arc;

use rustls::ServerConfig as RustlsServerConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use tunnel_core::error::Error;
use tunnel_core::remote::RemoteSpec;

use crate::bridge::bridge_stream;
use crate::tunnel::TunnelHandle;

pub struct ProxyListener {
    remote: RemoteSpec,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl ProxyListener {
    pub async fn bind(remote: RemoteSpec, tls: Option<Arc<RustlsServerConfig>>) -> Result<Self, Error> {
        let addr = format!("{}:{}", remote.local_host, remote.local_port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::BindFailed(format!("{addr}: {e}")))?;
        Ok(Self {
            remote,
            listener,
            tls: tls.map(TlsAcceptor::from),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until `cancel` fires. Each accepted connection is
    /// handed to its own Stream Bridge task; a per-listener sequence number
    /// labels its log lines.
    pub async fn run(self, tunnel: TunnelHandle, cancel: CancellationToken) {
        let remote = self.remote;
        let mut sequence: u64 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(remote = %remote.pretty(), "proxy listener shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(remote = %remote.pretty(), error = %e, "accept failed");
                            continue;
                        }
                    };
                    sequence += 1;
                    let seq = sequence;
                    let remote = remote.clone();
                    let tunnel = tunnel.clone();
                    let tls = self.tls.clone();
                    tokio::spawn(async move {
                        tracing::debug!(remote = %remote.pretty(), seq, %peer, "accepted connection");
                        let result = match tls {
                            Some(acceptor) => match acceptor.accept(socket).await {
                                Ok(tls_stream) => bridge_stream(tls_stream, &remote, &tunnel).await,
                                Err(e) => Err(Error::TlsError(e.to_string())),
                            },
                            None => bridge_stream(socket, &remote, &tunnel).await,
                        };
                        if let Err(e) = result {
                            tracing::warn!(remote = %remote.pretty(), seq, error = %e, "stream bridge failed");
                        }
                    });
                }
            }
        }
    }
}
