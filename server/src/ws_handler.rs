//! WebSocket upgrade branch of the front door: negotiates the protocol
//! subprotocol, runs the inner handshake, binds a Proxy Listener per
//! accepted remote, and hands the connection off to the Tunnel dispatcher.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;

use tunnel_core::protocol::{ConfigResponse, Frame, MsgType, RemoteAck};
use tunnel_core::remote::RemoteSpec;

use crate::config::HANDSHAKE_TIMEOUT;
use crate::handshake::{run_server_handshake, send_record};
use crate::listener::ProxyListener;
use crate::state::AppState;
use crate::tunnel::run_tunnel;

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.protocols([tunnel_core::config::PROTOCOL_TAG])
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let handshake = match tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        run_server_handshake(&mut socket, &state.identity, &state.users, &state.sessions).await
    })
    .await
    {
        Ok(Ok(h)) => h,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "handshake rejected");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        Err(_) => {
            tracing::warn!("handshake timed out");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let acks = resolve_remotes(&handshake.config_request.remotes, handshake.user.as_ref()).await;

    let response = ConfigResponse {
        version: SERVER_VERSION.to_string(),
        remotes: acks.iter().map(|(_, ack)| ack.clone()).collect(),
    };
    let payload = match serde_json::to_vec(&response) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "encoding ConfigResponse failed");
            return;
        }
    };
    if let Err(e) = send_record(
        &mut socket,
        &handshake.send_cipher,
        &Frame::control(MsgType::ConfigResponse, payload.into()),
    )
    .await
    {
        tracing::warn!(error = %e, "sending ConfigResponse failed");
        return;
    }

    let accepted: Vec<RemoteSpec> = acks
        .into_iter()
        .filter(|(_, ack)| ack.ok)
        .filter_map(|(spec, _)| spec)
        .collect();

    let tunnel_id = state.next_tunnel_id();
    let (handle, task) = run_tunnel(
        tunnel_id,
        socket,
        handshake.send_cipher,
        handshake.recv_cipher,
        accepted.clone(),
        state.keepalive,
        state.shutdown.clone(),
    )
    .await;

    state.tunnels.insert(tunnel_id, handle.clone());

    for remote in accepted {
        match ProxyListener::bind(remote.clone(), state.tls.clone()).await {
            Ok(listener) => {
                let cancel = handle.cancel_token();
                let tunnel_handle = handle.clone();
                tokio::spawn(async move {
                    listener.run(tunnel_handle, cancel).await;
                });
            }
            Err(e) => {
                tracing::warn!(remote = %remote.pretty(), error = %e, "failed to bind proxy listener");
            }
        }
    }

    tracing::info!(tunnel_id, "tunnel established");
    let _ = task.await;
    state.tunnels.remove(&tunnel_id);
    tracing::info!(tunnel_id, "tunnel closed");
}

/// Parse and ACL-check every requested remote, pairing each with the ack the
/// client will see. Parse failures and access denials are per-remote acks,
/// never a hard handshake rejection — only the remote in question is
/// refused. A remote that parses and passes the ACL is also probed for
/// bindability (bind, then immediately drop) per §4.C step 4: a port that's
/// already taken is reported back as an access error rather than silently
/// ACKed and then never actually listening.
async fn resolve_remotes(
    raw: &[String],
    user: Option<&tunnel_core::user::User>,
) -> Vec<(Option<RemoteSpec>, RemoteAck)> {
    let mut out = Vec::with_capacity(raw.len());
    for text in raw {
        let result = match RemoteSpec::parse(text) {
            Ok(spec) => {
                if let Some(user) = user {
                    if !user.has_access(spec.original()) {
                        out.push((
                            None,
                            RemoteAck {
                                remote: text.clone(),
                                ok: false,
                                error: Some(format!("access to '{text}' denied")),
                            },
                        ));
                        continue;
                    }
                }
                match probe_bind(&spec).await {
                    Ok(()) => (
                        Some(spec),
                        RemoteAck {
                            remote: text.clone(),
                            ok: true,
                            error: None,
                        },
                    ),
                    Err(e) => (
                        None,
                        RemoteAck {
                            remote: text.clone(),
                            ok: false,
                            error: Some(e.to_string()),
                        },
                    ),
                }
            }
            Err(e) => (
                None,
                RemoteAck {
                    remote: text.clone(),
                    ok: false,
                    error: Some(e.to_string()),
                },
            ),
        };
        out.push(result);
    }
    out
}

/// Bind `local_host:local_port` and immediately drop the listener, the way
/// §4.C step 4 specifies checking a remote is bindable before accepting it.
/// The actual long-lived listener is bound again once the tunnel is
/// established; a port stolen in between is the same unavoidable
/// check-then-act race the spec's probe-by-bind-and-close approach accepts.
async fn probe_bind(spec: &RemoteSpec) -> Result<(), tunnel_core::error::Error> {
    let addr = format!("{}:{}", spec.local_host, spec.local_port);
    tokio::net::TcpListener::bind(&addr)
        .await
        .map(|_| ())
        .map_err(|e| tunnel_core::error::Error::BindFailed(format!("{addr}: {e}")))
}
