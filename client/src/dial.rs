//! Dials the server per `spec.md` §4.H step 1: resolve host/port from the
//! server URL, optionally tunnel the TCP connection through an HTTP CONNECT
//! or SOCKS5 proxy, optionally wrap it in TLS, then perform the WebSocket
//! upgrade with the `tunnel-v1` subprotocol.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use tunnel_core::config::PROTOCOL_TAG;

use crate::config::ResolvedConfig;
use crate::tls::{build_tls_config, server_name_for};

/// Anything that can carry bytes to the server: a plain TCP socket or one
/// relayed through a proxy. Boxed so TLS can wrap either uniformly.
pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> RawStream for T {}

pub type WsStream = WebSocketStream<MaybeTlsStream<Box<dyn RawStream>>>;

pub async fn dial(config: &ResolvedConfig) -> anyhow::Result<WsStream> {
    let host = config
        .server_url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("server URL has no host"))?
        .to_string();
    let uses_tls = matches!(config.server_url.scheme(), "https" | "wss");
    let default_port = if uses_tls { 443 } else { 80 };
    let port = config.server_url.port().unwrap_or(default_port);

    let raw: Box<dyn RawStream> = match &config.args.proxy {
        Some(proxy_url) => dial_via_proxy(proxy_url, &host, port).await?,
        None => Box::new(TcpStream::connect((host.as_str(), port)).await?),
    };

    let stream = if uses_tls {
        let tls_config = build_tls_config(&config.args).await?;
        let connector = tokio_rustls::TlsConnector::from(tls_config);
        let sni_host = config.args.sni.clone().unwrap_or_else(|| host.clone());
        let server_name = server_name_for(&sni_host)?;
        let tls_stream = connector.connect(server_name, raw).await?;
        MaybeTlsStream::Rustls(tls_stream)
    } else {
        MaybeTlsStream::Plain(raw)
    };

    let mut request = websocket_url(&config.server_url)?.into_client_request()?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(PROTOCOL_TAG));
    if let Some(hostname) = &config.args.hostname {
        request
            .headers_mut()
            .insert("Host", HeaderValue::from_str(hostname)?);
    }

    let (ws, response) = tokio_tungstenite::client_async(request, stream).await?;
    match response
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|v| v.to_str().ok())
    {
        Some(tag) if tag == PROTOCOL_TAG => {}
        other => tracing::warn!(?other, "server did not echo the expected subprotocol"),
    }
    Ok(ws)
}

fn websocket_url(server_url: &url::Url) -> anyhow::Result<url::Url> {
    let mut ws_url = server_url.clone();
    let scheme = match server_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => anyhow::bail!("unsupported server URL scheme '{other}'"),
    };
    ws_url
        .set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("failed to rewrite server URL scheme"))?;
    Ok(ws_url)
}

async fn dial_via_proxy(
    proxy_url: &url::Url,
    target_host: &str,
    target_port: u16,
) -> anyhow::Result<Box<dyn RawStream>> {
    let proxy_host = proxy_url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("proxy URL has no host"))?;
    let proxy_port = proxy_url
        .port_or_known_default()
        .ok_or_else(|| anyhow::anyhow!("proxy URL has no resolvable port"))?;

    match proxy_url.scheme() {
        "socks5" | "socks5h" => {
            let creds = match (proxy_url.username(), proxy_url.password()) {
                ("", _) => None,
                (user, pass) => Some((user.to_string(), pass.unwrap_or("").to_string())),
            };
            let proxy_addr = format!("{proxy_host}:{proxy_port}");
            let target_addr = format!("{target_host}:{target_port}");
            let stream = match creds {
                Some((user, pass)) => tokio_socks::tcp::Socks5Stream::connect_with_password(
                    proxy_addr.as_str(),
                    target_addr.as_str(),
                    &user,
                    &pass,
                )
                .await
                .map_err(|e| anyhow::anyhow!("SOCKS5 proxy connect failed: {e}"))?,
                None => tokio_socks::tcp::Socks5Stream::connect(proxy_addr.as_str(), target_addr.as_str())
                    .await
                    .map_err(|e| anyhow::anyhow!("SOCKS5 proxy connect failed: {e}"))?,
            };
            Ok(Box::new(stream.into_inner()))
        }
        "http" | "https" => {
            let mut stream = TcpStream::connect((proxy_host, proxy_port)).await?;
            http_connect(&mut stream, target_host, target_port).await?;
            Ok(Box::new(stream))
        }
        other => anyhow::bail!("unsupported proxy scheme '{other}', expected http or socks5"),
    }
}

async fn http_connect(
    stream: &mut TcpStream,
    target_host: &str,
    target_port: u16,
) -> anyhow::Result<()> {
    let request = format!(
        "CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            anyhow::bail!("proxy closed the connection during CONNECT");
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
        if buf.len() > 8192 {
            anyhow::bail!("proxy CONNECT response too large");
        }
    }
    let response = String::from_utf8_lossy(&buf);
    let status_line = response
        .lines()
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty proxy CONNECT response"))?;
    if !status_line.contains(" 200 ") {
        anyhow::bail!("proxy CONNECT rejected: {status_line}");
    }
    Ok(())
}
