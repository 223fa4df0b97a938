//! Client-side Tunnel: the mirror of `tunnel-server`'s dispatcher from the
//! other end. The server opens streams; the client dials the real
//! destination for each one and bridges bytes until the stream closes.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep_until;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use tunnel_core::crypto::RecordCipher;
use tunnel_core::protocol::{Frame, MsgType, StreamError, StreamOpenRequest};

use crate::stats::Stats;

const STALE_TIMEOUT_MULTIPLIER: u32 = 3;
const WRITER_QUEUE_DEPTH: usize = 256;
const STREAM_QUEUE_DEPTH: usize = 64;
const READ_CHUNK: usize = 16 * 1024;

/// Drive one connected, handshaken tunnel until the server closes it, it
/// goes stale, an error occurs, or `shutdown` fires.
pub async fn run<Si, St>(
    sink: Si,
    mut stream: St,
    send_cipher: RecordCipher,
    recv_cipher: RecordCipher,
    keepalive_interval: Duration,
    stats: Arc<Stats>,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    Si: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin + Send + 'static,
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let (write_tx, write_rx) = mpsc::channel::<Frame>(WRITER_QUEUE_DEPTH);
    let stale_timeout = keepalive_interval * STALE_TIMEOUT_MULTIPLIER;

    let writer = tokio::spawn(writer_task(write_rx, send_cipher, sink));

    let mut streams: HashMap<u32, mpsc::Sender<Bytes>> = HashMap::new();
    let mut last_seen = Instant::now();

    let result = loop {
        let deadline = last_seen + stale_timeout;
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            _ = sleep_until(deadline.into()) => {
                break Err(anyhow::anyhow!("tunnel went stale, no keepalive from server"));
            }
            msg = stream.next() => {
                let Some(msg) = msg else { break Ok(()); };
                let msg = match msg {
                    Ok(m) => m,
                    Err(e) => break Err(anyhow::anyhow!("websocket error: {e}")),
                };
                let ciphertext = match msg {
                    Message::Binary(b) => b,
                    Message::Close(_) => break Ok(()),
                    _ => continue,
                };
                let plaintext = match recv_cipher.open_next(&ciphertext) {
                    Ok(p) => p,
                    Err(e) => break Err(anyhow::anyhow!("record decryption failed: {e}")),
                };
                let mut buf = BytesMut::from(&plaintext[..]);
                let frame = match Frame::try_decode(&mut buf) {
                    Ok(Some(f)) => f,
                    Ok(None) => {
                        tracing::warn!("truncated frame on tunnel");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "frame decode failed");
                        continue;
                    }
                };
                last_seen = Instant::now();
                handle_frame(frame, &mut streams, &write_tx, &stats).await;
            }
        }
    };

    streams.clear();
    writer.abort();
    result
}

async fn handle_frame(
    frame: Frame,
    streams: &mut HashMap<u32, mpsc::Sender<Bytes>>,
    write_tx: &mpsc::Sender<Frame>,
    stats: &Arc<Stats>,
) {
    match frame.msg_type {
        MsgType::StreamOpen => {
            let request: StreamOpenRequest = match serde_json::from_slice(&frame.payload) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(stream_id = frame.stream_id, error = %e, "invalid StreamOpenRequest");
                    return;
                }
            };
            let (tx, rx) = mpsc::channel(STREAM_QUEUE_DEPTH);
            streams.insert(frame.stream_id, tx);
            stats.streams_opened.fetch_add(1, Ordering::Relaxed);

            let stream_id = frame.stream_id;
            let write_tx = write_tx.clone();
            let stats = stats.clone();
            tokio::spawn(async move {
                if let Err(e) = dial_and_bridge(stream_id, &request.remote, &write_tx, rx, &stats).await
                {
                    tracing::warn!(stream_id, remote = %request.remote, error = %e, "stream failed");
                    let payload = serde_json::to_vec(&StreamError { message: e.to_string() })
                        .unwrap_or_default();
                    let _ = write_tx
                        .send(Frame::data(stream_id, MsgType::StreamError, payload.into()))
                        .await;
                }
            });
        }
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

/// Dial the real destination named by a `StreamOpen` and bridge it against
/// the multiplexed stream, symmetric to `tunnel-server`'s `bridge_stream`
/// but dialing instead of accepting, since the client never listens.
async fn dial_and_bridge(
    stream_id: u32,
    remote: &str,
    write_tx: &mpsc::Sender<Frame>,
    mut from_server: mpsc::Receiver<Bytes>,
    stats: &Arc<Stats>,
) -> anyhow::Result<()> {
    let socket = TcpStream::connect(remote)
        .await
        .map_err(|e| anyhow::anyhow!("dialing {remote}: {e}"))?;
    let (mut read_half, mut write_half) = tokio::io::split(socket);

    let upload_tx = write_tx.clone();
    let upload_stats = stats.clone();
    let upload = tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    upload_stats
                        .bytes_uploaded
                        .fetch_add(n as u64, Ordering::Relaxed);
                    if upload_tx
                        .send(Frame::data(stream_id, MsgType::StreamData, chunk))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = upload_tx
            .send(Frame::data(stream_id, MsgType::StreamClose, Bytes::new()))
            .await;
    });

    let download_stats = stats.clone();
    let download = tokio::spawn(async move {
        while let Some(data) = from_server.recv().await {
            download_stats
                .bytes_downloaded
                .fetch_add(data.len() as u64, Ordering::Relaxed);
            if write_half.write_all(&data).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let _ = tokio::join!(upload, download);
    Ok(())
}

async fn writer_task<Si>(mut rx: mpsc::Receiver<Frame>, cipher: RecordCipher, mut sink: Si)
where
    Si: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let sealed = cipher.seal(&frame.encode());
        if sink.send(Message::Binary(sealed.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
