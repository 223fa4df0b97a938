//! The server-side Tunnel: owns one secure-channel connection, serves
//! inbound Proxies by opening outbound `StreamOpen` requests, and demuxes
//! `StreamData`/`StreamClose`/`StreamError` frames coming back from the
//! client. Structured as a dedicated writer task plus a dispatcher loop,
//! the same split the teacher uses for its own multiplexed connection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;

use tunnel_core::crypto::RecordCipher;
use tunnel_core::error::Error;
use tunnel_core::protocol::{Frame, MsgType, StreamOpenRequest};
use tunnel_core::remote::RemoteSpec;

/// Three missed keepalives before the tunnel is declared dead, matching the
/// teacher's stale-connection multiplier.
const STALE_TIMEOUT_MULTIPLIER: u32 = 3;
const WRITER_QUEUE_DEPTH: usize = 256;
const STREAM_QUEUE_DEPTH: usize = 64;

/// A lightweight, cloneable reference to a running tunnel, kept in
/// `AppState::tunnels` for admin introspection and used by Proxy Listeners
/// to request outbound streams.
#[derive(Clone)]
pub struct TunnelHandle {
    pub id: u64,
    pub remotes: Vec<RemoteSpec>,
    write_tx: mpsc::Sender<Frame>,
    streams: Arc<DashMap<u32, mpsc::Sender<Bytes>>>,
    next_stream_id: Arc<AtomicU32>,
    cancel: CancellationToken,
}

impl TunnelHandle {
    /// Allocate a stream id, register the channel the Stream Bridge will
    /// read client-originated bytes from, and ask the client to dial
    /// `remote`. Control flow is inverted relative to a forward proxy: the
    /// server initiates the `StreamOpen`.
    pub async fn open_stream(
        &self,
        remote: &RemoteSpec,
    ) -> Result<(u32, mpsc::Receiver<Bytes>), Error> {
        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed).max(1);
        let (tx, rx) = mpsc::channel(STREAM_QUEUE_DEPTH);
        self.streams.insert(stream_id, tx);

        let payload = serde_json::to_vec(&StreamOpenRequest {
            remote: remote.remote_identifier(),
        })
        .map_err(|e| Error::ConfigDecode(format!("encoding StreamOpenRequest: {e}")))?;

        self.write_tx
            .send(Frame::data(stream_id, MsgType::StreamOpen, payload.into()))
            .await
            .map_err(|_| Error::TransportClosed)?;
        Ok((stream_id, rx))
    }

    pub async fn send_data(&self, stream_id: u32, data: Bytes) -> Result<(), Error> {
        self.write_tx
            .send(Frame::data(stream_id, MsgType::StreamData, data))
            .await
            .map_err(|_| Error::TransportClosed)
    }

    pub async fn close_stream(&self, stream_id: u32) {
        self.streams.remove(&stream_id);
        let _ = self
            .write_tx
            .send(Frame::data(stream_id, MsgType::StreamClose, Bytes::new()))
            .await;
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Drive one tunnel to completion: spawns the writer task, runs the
/// dispatcher loop until the connection closes, errors, or the shutdown
/// token fires, then tears down every registered stream channel so any
/// blocked Stream Bridge notices and exits.
pub async fn run_tunnel(
    id: u64,
    ws: WebSocket,
    send_cipher: RecordCipher,
    recv_cipher: RecordCipher,
    remotes: Vec<RemoteSpec>,
    keepalive_interval: Duration,
    parent_shutdown: CancellationToken,
) -> (TunnelHandle, tokio::task::JoinHandle<()>) {
    let (write_tx, write_rx) = mpsc::channel(WRITER_QUEUE_DEPTH);
    let cancel = parent_shutdown.child_token();
    let streams: Arc<DashMap<u32, mpsc::Sender<Bytes>>> = Arc::new(DashMap::new());
    let stale_timeout = keepalive_interval * STALE_TIMEOUT_MULTIPLIER;

    let handle = TunnelHandle {
        id,
        remotes,
        write_tx: write_tx.clone(),
        streams: streams.clone(),
        next_stream_id: Arc::new(AtomicU32::new(1)),
        cancel: cancel.clone(),
    };

    let (sink, mut stream) = ws.split();

    let writer = tokio::spawn(writer_task(write_rx, send_cipher, sink));
    let keepalive = spawn_keepalive(write_tx.clone(), keepalive_interval, cancel.clone());

    let task = tokio::spawn(async move {
        let mut last_seen = Instant::now();
        loop {
            let deadline = last_seen + stale_timeout;
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(tunnel_id = id, "tunnel cancelled");
                    break;
                }
                _ = sleep_until(deadline.into()) => {
                    tracing::warn!(tunnel_id = id, "tunnel went stale, closing");
                    break;
                }
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        tracing::debug!(tunnel_id = id, "websocket closed");
                        break;
                    };
                    let msg = match msg {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::warn!(tunnel_id = id, error = %e, "websocket error");
                            break;
                        }
                    };
                    let ciphertext = match msg {
                        Message::Binary(b) => b,
                        Message::Close(_) => break,
                        Message::Ping(_) | Message::Pong(_) | Message::Text(_) => continue,
                    };
                    let plaintext = match recv_cipher.open_next(&ciphertext) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(tunnel_id = id, error = %e, "record decryption failed");
                            break;
                        }
                    };
                    let mut buf = bytes::BytesMut::from(&plaintext[..]);
                    let frame = match Frame::try_decode(&mut buf) {
                        Ok(Some(f)) => f,
                        Ok(None) => {
                            tracing::warn!(tunnel_id = id, "truncated frame on control channel");
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!(tunnel_id = id, error = %e, "frame decode failed");
                            continue;
                        }
                    };
                    last_seen = Instant::now();
                    dispatch(&streams, &write_tx, frame).await;
                }
            }
        }

        streams.clear();
        cancel.cancel();
        writer.abort();
        keepalive.abort();
    });

    (handle, task)
}

async fn dispatch(
    streams: &DashMap<u32, mpsc::Sender<Bytes>>,
    write_tx: &mpsc::Sender<Frame>,
    frame: Frame,
) {
    match frame.msg_type {
        MsgType::StreamData => {
            if let Some(tx) = streams.get(&frame.stream_id) {
                let _ = tx.send(frame.payload).await;
            }
        }
        MsgType::StreamClose | MsgType::StreamError => {
            streams.remove(&frame.stream_id);
        }
        MsgType::Ping => {
            let _ = write_tx
                .send(Frame::control(MsgType::Pong, Bytes::new()))
                .await;
        }
        MsgType::Pong => {}
        other => {
            tracing::debug!(?other, "ignoring unexpected control frame on active tunnel");
        }
    }
}

async fn writer_task(
    mut rx: mpsc::Receiver<Frame>,
    cipher: RecordCipher,
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
) {
    while let Some(frame) = rx.recv().await {
        let sealed = cipher.seal(&frame.encode());
        if sink.send(Message::Binary(sealed.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Keepalive ticker: periodically enqueues a `Ping` frame onto the writer
/// queue. Spawned alongside the dispatcher so it shares the same
/// cancellation token.
pub fn spawn_keepalive(
    write_tx: mpsc::Sender<Frame>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if write_tx.send(Frame::control(MsgType::Ping, Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}
