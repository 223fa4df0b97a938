//! JSON-encoded control-plane payloads, carried as the `payload` of control
//! `Frame`s (see [`super::frame`]) once the secure record layer is live.

use serde::{Deserialize, Serialize};

use crate::remote::RemoteSpec;

/// Sent by the client immediately after the handshake completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub ok: bool,
    /// Hex-encoded session id, present only when `ok`.
    pub session_id: Option<String>,
    pub error: Option<String>,
}

/// Sent by the client after authentication: the set of remotes it wants the
/// server to open listeners for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRequest {
    pub version: String,
    pub remotes: Vec<String>,
}

impl ConfigRequest {
    pub fn new(version: impl Into<String>, remotes: &[RemoteSpec]) -> Self {
        Self {
            version: version.into(),
            remotes: remotes.iter().map(|r| r.encode()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAck {
    pub remote: String,
    pub ok: bool,
    pub error: Option<String>,
}

/// Reply to `ConfigRequest`: per-remote accept/reject (bind failure, ACL
/// denial) plus the server's own version string, logged by the client on
/// mismatch but never treated as a hard failure (per the protocol's
/// version-mismatch-is-a-log-not-a-reject invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub version: String,
    pub remotes: Vec<RemoteAck>,
}

/// Carried as the payload of a `StreamOpen` frame: which remote the new
/// stream is for, addressed by its canonical encoding so either side can
/// look up the matching `RemoteSpec`/listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOpenRequest {
    pub remote: String,
}

/// Carried as the payload of a `StreamError` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamError {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_request_encodes_remotes_canonically() {
        let remotes = vec![crate::remote::RemoteSpec::parse("9001->80").unwrap()];
        let req = ConfigRequest::new("0.3.0", &remotes);
        assert_eq!(req.remotes, vec!["0.0.0.0:9001->127.0.0.1:80".to_string()]);
    }

    #[test]
    fn auth_request_round_trips_json() {
        let req = AuthRequest {
            username: Some("alice".into()),
            password: Some("secret123".into()),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: AuthRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.username, req.username);
    }
}
