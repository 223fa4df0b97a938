//! Client CLI/config surface, matching `spec.md` §6's client flags, plus
//! the `--profile` YAML file the original implementation supports as an
//! alternative to repeating flags on every invocation.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use tunnel_core::remote::RemoteSpec;

#[derive(Debug, Clone, Args)]
pub struct ClientArgs {
    /// `http(s)://` or `ws(s)://` URL of the server's front door.
    #[arg(default_value = "")]
    pub server_url: String,

    /// One or more `L[:LH]->R[:RH]` remote specs to request.
    pub remotes: Vec<String>,

    /// Expected base64 SHA-256 digest of the server's identity public key.
    /// Omit to trust-on-first-use (logged, never rejected).
    #[arg(long)]
    pub fingerprint: Option<String>,

    /// `username:password` sent as the `AuthRequest`.
    #[arg(long, env = "AUTH")]
    pub auth: Option<String>,

    /// Expected keepalive ping interval; used only to size the stale-
    /// connection detector, since the server drives the actual pings.
    #[arg(long, default_value = "25s", value_parser = humantime::parse_duration)]
    pub keepalive: Duration,

    /// Give up reconnecting after this many consecutive failures. `-1`
    /// (default) means retry forever.
    #[arg(long, default_value_t = -1)]
    pub max_retry_count: i64,

    /// Upper bound on the exponential reconnect backoff.
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    pub max_retry_interval: Duration,

    /// HTTP CONNECT or SOCKS5 proxy to dial the server through.
    #[arg(long)]
    pub proxy: Option<url::Url>,

    /// Override the `Host` header sent during the WebSocket upgrade.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Override the TLS SNI server name (defaults to the server URL's host).
    #[arg(long)]
    pub sni: Option<String>,

    /// CA bundle (PEM) used to verify the server's TLS certificate, for
    /// deployments in front of a non-public CA.
    #[arg(long)]
    pub tls_ca: Option<PathBuf>,

    /// Disable TLS certificate verification entirely. Dangerous; for
    /// development against self-signed front doors only.
    #[arg(long)]
    pub tls_skip_verify: bool,

    /// Client certificate key (PEM), for mutual TLS.
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Client certificate (PEM), for mutual TLS.
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// Load `server_url`/`remotes`/`auth` from a YAML file instead of (or
    /// in addition to) the positional arguments; explicit flags win.
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Emit logs as JSON instead of the default human-readable format.
    #[arg(long)]
    pub log_json: bool,

    /// Verbose logging (shorthand for RUST_LOG=debug).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// On-disk shape of `--profile`: the same fields as the CLI, all optional
/// so a profile can supply just the parts an operator wants to stop typing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    pub server_url: Option<String>,
    #[serde(default)]
    pub remotes: Vec<String>,
    pub auth: Option<String>,
    pub fingerprint: Option<String>,
}

impl Profile {
    pub async fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading profile {}: {e}", path.display()))?;
        serde_yaml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing profile {}: {e}", path.display()))
    }
}

/// Merged, validated configuration the connection manager actually runs
/// with: CLI flags win over the profile file, and every remote is parsed
/// up front so a typo is caught before the first dial rather than only
/// discovered as a rejected `RemoteAck`.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub server_url: url::Url,
    pub remotes: Vec<RemoteSpec>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub fingerprint: Option<String>,
    pub args: ClientArgs,
}

impl ClientArgs {
    /// Merge in `--profile` (if given) and validate everything eagerly,
    /// mirroring the original implementation's pre-flight config validation
    /// that fails fast on a bad remote instead of waiting for the server to
    /// reject the `ConfigRequest`.
    pub async fn resolve(&self) -> anyhow::Result<ResolvedConfig> {
        let profile = match &self.profile {
            Some(path) => Profile::load(path).await?,
            None => Profile::default(),
        };

        let server_url_text = if !self.server_url.is_empty() {
            self.server_url.clone()
        } else {
            profile
                .server_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no server URL given on the command line or in --profile"))?
        };
        let server_url = url::Url::parse(&server_url_text)
            .map_err(|e| anyhow::anyhow!("invalid server URL '{server_url_text}': {e}"))?;
        match server_url.scheme() {
            "http" | "https" | "ws" | "wss" => {}
            other => anyhow::bail!("unsupported server URL scheme '{other}'"),
        }

        let raw_remotes: Vec<String> = if !self.remotes.is_empty() {
            self.remotes.clone()
        } else {
            profile.remotes.clone()
        };
        if raw_remotes.is_empty() {
            anyhow::bail!("no remotes given on the command line or in --profile");
        }
        let mut remotes = Vec::with_capacity(raw_remotes.len());
        for raw in &raw_remotes {
            let spec = RemoteSpec::parse(raw)
                .map_err(|e| anyhow::anyhow!("invalid remote '{raw}': {e}"))?
                .with_ephemeral_local_port();
            remotes.push(spec);
        }

        let auth = self.auth.clone().or(profile.auth.clone());
        let (username, password) = match auth {
            Some(creds) => match creds.split_once(':') {
                Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
                None => anyhow::bail!("--auth must be 'username:password'"),
            },
            None => (None, None),
        };

        let fingerprint = self.fingerprint.clone().or(profile.fingerprint.clone());

        Ok(ResolvedConfig {
            server_url,
            remotes,
            username,
            password,
            fingerprint,
            args: self.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(server_url: &str, remotes: &[&str]) -> ClientArgs {
        ClientArgs {
            server_url: server_url.to_string(),
            remotes: remotes.iter().map(|s| s.to_string()).collect(),
            fingerprint: None,
            auth: None,
            keepalive: Duration::from_secs(25),
            max_retry_count: -1,
            max_retry_interval: Duration::from_secs(300),
            proxy: None,
            hostname: None,
            sni: None,
            tls_ca: None,
            tls_skip_verify: false,
            tls_key: None,
            tls_cert: None,
            profile: None,
            log_json: false,
            verbose: 0,
        }
    }

    #[tokio::test]
    async fn resolves_valid_config() {
        let resolved = args("wss://example.com", &["9001->80"]).resolve().await.unwrap();
        assert_eq!(resolved.remotes.len(), 1);
        assert_eq!(resolved.remotes[0].local_port, 0);
    }

    #[tokio::test]
    async fn rejects_bad_remote_before_dialing() {
        let err = args("wss://example.com", &["not-a-remote"])
            .resolve()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid remote"));
    }

    #[tokio::test]
    async fn rejects_unsupported_scheme() {
        let err = args("ftp://example.com", &["9001->80"])
            .resolve()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported server URL scheme"));
    }

    #[tokio::test]
    async fn rejects_malformed_auth() {
        let mut a = args("wss://example.com", &["9001->80"]);
        a.auth = Some("no-colon-here".to_string());
        let err = a.resolve().await.unwrap_err();
        assert!(err.to_string().contains("username:password"));
    }
}
