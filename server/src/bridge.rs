//! Stream Bridge: full-duplex copy between an accepted listener socket and
//! the multiplexed stream opened through the tunnel for it. Protocol-
//! agnostic after any TLS termination, grounded on the same "dial, then
//! bidirectional-copy until either half errors or hits EOF, then close
//! both" shape as a CONNECT-tunnel handler built on
//! `tokio::io::copy_bidirectional` — adapted here because the multiplexed
//! stream's two halves (an outgoing sender and an incoming channel) aren't
//! a single `AsyncRead + AsyncWrite` type.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use tunnel_core::error::Error;
use tunnel_core::remote::RemoteSpec;

use crate::tunnel::TunnelHandle;

const READ_CHUNK: usize = 16 * 1024;

/// Open a multiplexed stream for `remote` and bridge it against `socket`
/// until either side closes. The first direction to hit EOF/error cancels
/// the other via `done`, so a half-close on one side always tears down both
/// halves instead of leaving the opposite direction blocked forever.
pub async fn bridge_stream<S>(socket: S, remote: &RemoteSpec, tunnel: &TunnelHandle) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (stream_id, mut from_client) = tunnel.open_stream(remote).await?;
    let (mut read_half, mut write_half) = tokio::io::split(socket);
    let done = CancellationToken::new();

    let to_tunnel = tunnel.clone();
    let upload_done = done.clone();
    let upload = tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        loop {
            buf.clear();
            buf.resize(READ_CHUNK, 0);
            tokio::select! {
                _ = upload_done.cancelled() => break,
                result = read_half.read(&mut buf) => match result {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        if to_tunnel.send_data(stream_id, chunk).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
            }
        }
        to_tunnel.close_stream(stream_id).await;
        upload_done.cancel();
    });

    let download_done = done.clone();
    let download = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = download_done.cancelled() => break,
                data = from_client.recv() => match data {
                    Some(data) => {
                        if write_half.write_all(&data).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        let _ = write_half.shutdown().await;
        download_done.cancel();
    });

    let _ = tokio::join!(upload, download);
    Ok(())
}
