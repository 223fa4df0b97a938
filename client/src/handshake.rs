//! Client side of the secure-channel handshake: hello exchange, key
//! agreement, fingerprint verification, then the encrypted auth/config
//! exchange that follows it. Mirrors `tunnel-server`'s
//! `handshake::run_server_handshake` frame-for-frame from the other end.

use bytes::BytesMut;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use tunnel_core::config::config_timeout;
use tunnel_core::crypto::{
    derive_session_keys, random_nonce, verify_signature, EphemeralKeyPair, Fingerprint,
    RecordCipher,
};
use tunnel_core::protocol::{
    AuthRequest, AuthResponse, ClientHello, ConfigRequest, ConfigResponse, Frame, MsgType,
    ServerHello,
};

use crate::config::ResolvedConfig;

pub struct ClientHandshake {
    pub send_cipher: RecordCipher,
    pub recv_cipher: RecordCipher,
    pub fingerprint: Fingerprint,
    pub config_response: ConfigResponse,
}

fn ws_err(e: tokio_tungstenite::tungstenite::Error) -> anyhow::Error {
    anyhow::anyhow!("websocket error: {e}")
}

async fn recv_binary<S>(ws: &mut S) -> anyhow::Result<Vec<u8>>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(bytes))) => return Ok(bytes.to_vec()),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                anyhow::bail!("server closed the connection during handshake")
            }
            Some(Ok(_other)) => anyhow::bail!("expected a binary handshake frame"),
            Some(Err(e)) => return Err(ws_err(e)),
        }
    }
}

async fn send_record<S>(ws: &mut S, cipher: &RecordCipher, frame: &Frame) -> anyhow::Result<()>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let ciphertext = cipher.seal(&frame.encode());
    ws.send(Message::Binary(ciphertext.into()))
        .await
        .map_err(ws_err)
}

async fn recv_record<S>(ws: &mut S, cipher: &RecordCipher) -> anyhow::Result<Frame>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let ciphertext = recv_binary(ws).await?;
    let plaintext = cipher.open_next(&ciphertext)?;
    let mut buf = BytesMut::from(&plaintext[..]);
    Frame::try_decode(&mut buf)?.ok_or_else(|| anyhow::anyhow!("control frame payload truncated"))
}

/// Run the full handshake over a freshly-upgraded WebSocket: hello
/// exchange, key agreement, fingerprint check, encrypted auth, encrypted
/// config request/response.
pub async fn run_client_handshake<S>(
    ws: &mut S,
    config: &ResolvedConfig,
) -> anyhow::Result<ClientHandshake>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let server_hello_bytes = recv_binary(ws).await?;
    let server_hello = ServerHello::decode(&server_hello_bytes)?;

    let signed_message =
        ServerHello::signed_message(&server_hello.ephemeral_pub, &server_hello.nonce);
    verify_signature(
        &server_hello.identity_pub,
        &signed_message,
        &server_hello.signature,
    )
    .map_err(|e| anyhow::anyhow!("server hello failed signature verification: {e}"))?;

    let fingerprint = Fingerprint::of_identity_pub(&server_hello.identity_pub);
    match &config.fingerprint {
        Some(expected) if expected != fingerprint.as_str() => {
            anyhow::bail!(
                "server fingerprint mismatch: expected {expected}, got {}",
                fingerprint.as_str()
            );
        }
        Some(_) => tracing::debug!(fingerprint = %fingerprint, "server fingerprint verified"),
        None => tracing::warn!(
            fingerprint = %fingerprint,
            "no --fingerprint configured, trusting server on first use"
        ),
    }

    let ephemeral = EphemeralKeyPair::generate();
    let client_nonce = random_nonce();
    let client_hello = ClientHello {
        ephemeral_pub: ephemeral.public_bytes(),
        nonce: client_nonce,
    };
    ws.send(Message::Binary(client_hello.encode().into()))
        .await
        .map_err(ws_err)?;

    let shared = ephemeral.diffie_hellman(&server_hello.ephemeral_pub);
    let keys = derive_session_keys(&shared, &server_hello.nonce, &client_nonce)?;
    let send_cipher = RecordCipher::new(keys.client_to_server);
    let recv_cipher = RecordCipher::new(keys.server_to_client);

    let auth_request = AuthRequest {
        username: config.username.clone(),
        password: config.password.clone(),
    };
    let auth_payload = serde_json::to_vec(&auth_request)?;
    send_record(
        ws,
        &send_cipher,
        &Frame::control(MsgType::AuthRequest, auth_payload.into()),
    )
    .await?;

    let auth_frame = recv_record(ws, &recv_cipher).await?;
    if auth_frame.msg_type != MsgType::AuthResponse {
        anyhow::bail!("expected AuthResponse, got {:?}", auth_frame.msg_type);
    }
    let auth_response: AuthResponse = serde_json::from_slice(&auth_frame.payload)?;
    if !auth_response.ok {
        anyhow::bail!(
            "authentication denied: {}",
            auth_response.error.unwrap_or_else(|| "denied".to_string())
        );
    }

    let config_request = ConfigRequest::new(env!("CARGO_PKG_VERSION"), &config.remotes);
    let config_payload = serde_json::to_vec(&config_request)?;
    send_record(
        ws,
        &send_cipher,
        &Frame::control(MsgType::ConfigRequest, config_payload.into()),
    )
    .await?;

    let config_frame = tokio::time::timeout(config_timeout(), recv_record(ws, &recv_cipher))
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for ConfigResponse"))??;
    if config_frame.msg_type != MsgType::ConfigResponse {
        anyhow::bail!("expected ConfigResponse, got {:?}", config_frame.msg_type);
    }
    let config_response: ConfigResponse = serde_json::from_slice(&config_frame.payload)?;
    if config_response.version != env!("CARGO_PKG_VERSION") {
        tracing::info!(
            server_version = %config_response.version,
            client_version = env!("CARGO_PKG_VERSION"),
            "server version differs"
        );
    }
    for ack in &config_response.remotes {
        if ack.ok {
            tracing::info!(remote = %ack.remote, "remote accepted");
        } else {
            tracing::warn!(remote = %ack.remote, error = ?ack.error, "remote rejected");
        }
    }

    Ok(ClientHandshake {
        send_cipher,
        recv_cipher,
        fingerprint,
        config_response,
    })
}
