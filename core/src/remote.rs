//! Remote spec: `LPORT[:LHOST]->RPORT[:RHOST]`, the textual description of
//! one forwarding rule exchanged in the config payload and used for ACL
//! matching.

use crate::error::Error;

const DEFAULT_LOCAL_HOST: &str = "0.0.0.0";
const DEFAULT_REMOTE_HOST: &str = "127.0.0.1";

/// Characters that are never allowed in a host component, matching the
/// original implementation's rejected punctuation set.
const REJECTED_HOST_CHARS: &[char] = &[
    ' ', '!', '@', '#', '$', '%', '^', '&', '*', '(', ')', '=', '+', '[', ']', '{', '}', '|', ';',
    ':', '\'', '"', ',', '<', '>', '/', '?', '\\',
];

/// An immutable, validated tunnel endpoint description.
///
/// `reverse` is always `true` in this implementation (see the Open Question
/// in the design notes: the flag is reserved and never branched on).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    pub local_host: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    pub reverse: bool,
    /// The exact text the user supplied, used for ACL matching against
    /// `User::has_access`.
    original: String,
}

impl RemoteSpec {
    /// Parse `L[:LH]->R[:RH]`, trimming surrounding whitespace.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let original = input.trim().to_string();
        let (left, right) = original
            .split_once("->")
            .ok_or_else(|| Error::InvalidRemote(format!("missing '->' in '{original}'")))?;

        let (local_port, local_host) = split_port_host(left, DEFAULT_LOCAL_HOST)
            .map_err(|e| Error::InvalidRemote(format!("local side of '{original}': {e}")))?;
        let (remote_port, remote_host) = split_port_host(right, DEFAULT_REMOTE_HOST)
            .map_err(|e| Error::InvalidRemote(format!("remote side of '{original}': {e}")))?;

        validate_host(&local_host)
            .map_err(|e| Error::InvalidRemote(format!("local host in '{original}': {e}")))?;
        validate_host(&remote_host)
            .map_err(|e| Error::InvalidRemote(format!("remote host in '{original}': {e}")))?;

        Ok(Self {
            local_host,
            local_port,
            remote_host,
            remote_port,
            reverse: true,
            original,
        })
    }

    /// The original user-supplied text, used as the ACL match subject
    /// (`User::has_access`).
    pub fn original(&self) -> &str {
        &self.original
    }

    /// The `RHOST:RPORT` form carried as extra-data on stream opens.
    pub fn remote_identifier(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }

    /// Deterministic canonical encoding:
    /// `local_host:local_port->remote_host:remote_port`.
    pub fn encode(&self) -> String {
        format!(
            "{}:{}->{}:{}",
            self.local_host, self.local_port, self.remote_host, self.remote_port
        )
    }

    /// Display form with the default hosts elided, for human-facing logs.
    pub fn pretty(&self) -> String {
        let left = if self.local_host == DEFAULT_LOCAL_HOST {
            self.local_port.to_string()
        } else {
            format!("{}:{}", self.local_host, self.local_port)
        };
        let right = if self.remote_host == DEFAULT_REMOTE_HOST {
            self.remote_port.to_string()
        } else {
            format!("{}:{}", self.remote_host, self.remote_port)
        };
        format!("{left}->{right}")
    }

    /// A client-side reverse-tunnel proxy never actually listens: the local
    /// port is rewritten to `0` because the client dials rather than binds.
    /// This keeps one `RemoteSpec` shape on both ends of the tunnel but is a
    /// deliberate gotcha that must be preserved (see design notes §3).
    pub fn with_ephemeral_local_port(mut self) -> Self {
        self.local_port = 0;
        self
    }
}

/// Split `PORT[:HOST]` into `(port, host)`, defaulting the host.
fn split_port_host(s: &str, default_host: &str) -> Result<(u16, String), String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty".to_string());
    }
    let (port_str, host) = match s.split_once(':') {
        Some((port, host)) => (port, host.to_string()),
        None => (s, default_host.to_string()),
    };
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("invalid port '{port_str}'"))?;
    if port == 0 {
        return Err("port must be in 1..65535".to_string());
    }
    Ok((port, host))
}

fn validate_host(host: &str) -> Result<(), String> {
    if host.is_empty() {
        return Err("empty host".to_string());
    }
    if let Some(bad) = host.chars().find(|c| REJECTED_HOST_CHARS.contains(c)) {
        return Err(format!("host contains rejected character '{bad}'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_form() {
        let r = RemoteSpec::parse("9001->80").unwrap();
        assert_eq!(r.local_host, "0.0.0.0");
        assert_eq!(r.local_port, 9001);
        assert_eq!(r.remote_host, "127.0.0.1");
        assert_eq!(r.remote_port, 80);
        assert!(r.reverse);
    }

    #[test]
    fn parses_full_form() {
        let r = RemoteSpec::parse("  3000:127.0.0.1->example.com:443  ").unwrap();
        assert_eq!(r.local_host, "127.0.0.1");
        assert_eq!(r.local_port, 3000);
        assert_eq!(r.remote_host, "example.com");
        assert_eq!(r.remote_port, 443);
    }

    #[test]
    fn rejects_missing_arrow() {
        assert!(RemoteSpec::parse("9001:80").is_err());
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert!(RemoteSpec::parse("70000->80").is_err());
        assert!(RemoteSpec::parse("0->80").is_err());
    }

    #[test]
    fn rejects_punctuation_in_host() {
        assert!(RemoteSpec::parse("9001:bad host->80").is_err());
        assert!(RemoteSpec::parse("9001->80:bad;host").is_err());
    }

    #[test]
    fn encode_is_canonical_and_round_trips() {
        let r = RemoteSpec::parse("9001:0.0.0.0->80:x.example").unwrap();
        let encoded = r.encode();
        assert_eq!(encoded, "0.0.0.0:9001->x.example:80");
        let reparsed = RemoteSpec::parse(&encoded).unwrap();
        assert_eq!(reparsed.clone_without_original(), r.clone_without_original());
    }

    #[test]
    fn pretty_elides_defaults() {
        let r = RemoteSpec::parse("9001->80").unwrap();
        assert_eq!(r.pretty(), "9001->80");
        let r2 = RemoteSpec::parse("9001:1.2.3.4->80:5.6.7.8").unwrap();
        assert_eq!(r2.pretty(), "1.2.3.4:9001->5.6.7.8:80");
    }

    impl RemoteSpec {
        /// Test helper: compare structurally, ignoring the captured original text.
        fn clone_without_original(&self) -> Self {
            Self {
                original: String::new(),
                ..self.clone()
            }
        }
    }
}
