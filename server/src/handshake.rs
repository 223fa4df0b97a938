//! Server side of the secure-channel handshake: hello exchange, key
//! agreement, then the encrypted auth/config exchange that follows it.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use tunnel_core::crypto::{
    derive_session_keys, random_nonce, EphemeralKeyPair, Identity, RecordCipher,
};
use tunnel_core::error::Error;
use tunnel_core::protocol::{
    AuthRequest, AuthResponse, ClientHello, ConfigRequest, Frame, MsgType, ServerHello,
};
use tunnel_core::session::SessionTable;
use tunnel_core::store::UserStore;
use tunnel_core::user::User;

/// Result of a completed handshake: the two directional ciphers, the
/// authenticated identity (if any), and the client's requested remotes.
pub struct Handshake {
    pub send_cipher: RecordCipher,
    pub recv_cipher: RecordCipher,
    pub user: Option<User>,
    pub config_request: ConfigRequest,
}

fn ws_err(e: axum::Error) -> Error {
    Error::HandshakeRejected(format!("websocket error: {e}"))
}

async fn recv_binary(ws: &mut WebSocket) -> Result<Vec<u8>, Error> {
    match ws.next().await {
        Some(Ok(Message::Binary(bytes))) => Ok(bytes.to_vec()),
        Some(Ok(Message::Close(_))) | None => Err(Error::TransportClosed),
        Some(Ok(_other)) => Err(Error::HandshakeRejected(
            "expected a binary handshake frame".to_string(),
        )),
        Some(Err(e)) => Err(ws_err(e)),
    }
}

pub async fn send_record(ws: &mut WebSocket, cipher: &RecordCipher, frame: &Frame) -> Result<(), Error> {
    let plaintext = frame.encode();
    let ciphertext = cipher.seal(&plaintext);
    ws.send(Message::Binary(ciphertext.into()))
        .await
        .map_err(ws_err)
}

async fn recv_record(ws: &mut WebSocket, cipher: &RecordCipher) -> Result<Frame, Error> {
    let ciphertext = recv_binary(ws).await?;
    let plaintext = cipher.open_next(&ciphertext)?;
    let mut buf = bytes::BytesMut::from(&plaintext[..]);
    Frame::try_decode(&mut buf)?.ok_or_else(|| {
        Error::HandshakeRejected("control frame payload truncated".to_string())
    })
}

/// Run the full handshake over a freshly-upgraded WebSocket: hello exchange,
/// key agreement, encrypted auth, encrypted config request. Callers wrap
/// this in a timeout (see `config::HANDSHAKE_TIMEOUT`).
pub async fn run_server_handshake(
    ws: &mut WebSocket,
    identity: &Identity,
    users: &UserStore,
    sessions: &SessionTable,
) -> Result<Handshake, Error> {
    let ephemeral = EphemeralKeyPair::generate();
    let server_nonce = random_nonce();
    let ephemeral_pub = ephemeral.public_bytes();
    let signature =
        identity.sign(&ServerHello::signed_message(&ephemeral_pub, &server_nonce));
    let hello = ServerHello {
        identity_pub: identity.public_bytes(),
        ephemeral_pub,
        nonce: server_nonce,
        signature,
    };
    ws.send(Message::Binary(hello.encode().into()))
        .await
        .map_err(ws_err)?;

    let client_hello_bytes = recv_binary(ws).await?;
    let client_hello = ClientHello::decode(&client_hello_bytes)?;

    let shared = ephemeral.diffie_hellman(&client_hello.ephemeral_pub);
    let keys = derive_session_keys(&shared, &server_nonce, &client_hello.nonce)?;
    let send_cipher = RecordCipher::new(keys.server_to_client);
    let recv_cipher = RecordCipher::new(keys.client_to_server);

    let auth_frame = recv_record(ws, &recv_cipher).await?;
    if auth_frame.msg_type != MsgType::AuthRequest {
        return Err(Error::HandshakeRejected(format!(
            "expected AuthRequest, got {:?}",
            auth_frame.msg_type
        )));
    }
    let auth_request: AuthRequest = serde_json::from_slice(&auth_frame.payload)
        .map_err(|e| Error::ConfigDecode(format!("decoding AuthRequest: {e}")))?;

    let (user, auth_response) = authenticate(users, sessions, &auth_request).await;
    let response_payload = serde_json::to_vec(&auth_response)
        .map_err(|e| Error::ConfigDecode(format!("encoding AuthResponse: {e}")))?;
    send_record(
        ws,
        &send_cipher,
        &Frame::control(MsgType::AuthResponse, response_payload.into()),
    )
    .await?;

    if !auth_response.ok {
        return Err(Error::AuthDenied(
            auth_response.error.unwrap_or_else(|| "denied".to_string()),
        ));
    }

    let config_frame = recv_record(ws, &recv_cipher).await?;
    if config_frame.msg_type != MsgType::ConfigRequest {
        return Err(Error::HandshakeRejected(format!(
            "expected ConfigRequest, got {:?}",
            config_frame.msg_type
        )));
    }
    let config_request: ConfigRequest = serde_json::from_slice(&config_frame.payload)
        .map_err(|e| Error::ConfigDecode(format!("decoding ConfigRequest: {e}")))?;

    Ok(Handshake {
        send_cipher,
        recv_cipher,
        user,
        config_request,
    })
}

/// If no authfile is configured (`users` is empty), every request succeeds
/// anonymously with no session id, per the handshake's documented fallback.
async fn authenticate(
    users: &UserStore,
    sessions: &SessionTable,
    request: &AuthRequest,
) -> (Option<User>, AuthResponse) {
    if users.is_empty().await {
        return (
            None,
            AuthResponse {
                ok: true,
                session_id: None,
                error: None,
            },
        );
    }

    let Some(username) = &request.username else {
        return (
            None,
            AuthResponse {
                ok: false,
                session_id: None,
                error: Some("authentication required".to_string()),
            },
        );
    };
    let Some(user) = users.get(username).await else {
        return (
            None,
            AuthResponse {
                ok: false,
                session_id: None,
                error: Some("authentication denied".to_string()),
            },
        );
    };
    if request.password.as_deref() != Some(user.pass.as_str()) {
        return (
            None,
            AuthResponse {
                ok: false,
                session_id: None,
                error: Some("authentication denied".to_string()),
            },
        );
    }

    let session_id = sessions.insert(user.clone()).await;
    (
        Some(user),
        AuthResponse {
            ok: true,
            session_id: Some(session_id.to_hex()),
            error: None,
        },
    )
}
