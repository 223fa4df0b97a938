//! In-memory user table, with JSON persistence and file-watch hot reload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;

use crate::error::Error;
use crate::user::{User, UserRecord};

const RELOAD_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Shared, concurrently-readable table of known users.
///
/// Reads (`get`, `has_access` checks during auth) vastly outnumber writes
/// (`set`/`del`/bulk reload), so this is a reader-preferring `RwLock` rather
/// than the single-writer-channel pattern used for the session table.
#[derive(Clone)]
pub struct UserStore {
    inner: Arc<RwLock<HashMap<String, User>>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn from_users(users: Vec<User>) -> Self {
        let mut map = HashMap::with_capacity(users.len());
        for u in users {
            map.insert(u.name.clone(), u);
        }
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub async fn get(&self, name: &str) -> Option<User> {
        self.inner.read().await.get(name).cloned()
    }

    pub async fn set(&self, user: User) {
        self.inner.write().await.insert(user.name.clone(), user);
    }

    pub async fn del(&self, name: &str) -> bool {
        self.inner.write().await.remove(name).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Atomically replace the entire table. Used by authfile bulk reloads so
    /// a reader never observes a half-applied set.
    pub async fn reset(&self, users: Vec<User>) {
        let mut map = HashMap::with_capacity(users.len());
        for u in users {
            map.insert(u.name.clone(), u);
        }
        *self.inner.write().await = map;
    }

    /// Preferred on-disk shape: a JSON array of `UserRecord`s. Used by the
    /// admin `/authfile` bulk-replace endpoint.
    pub async fn to_json(&self) -> Result<String, Error> {
        let guard = self.inner.read().await;
        let records: Vec<UserRecord> = guard.values().map(UserRecord::from).collect();
        serde_json::to_string_pretty(&records)
            .map_err(|e| Error::ConfigDecode(format!("encoding user store: {e}")))
    }

    pub async fn write(&self, path: &Path) -> Result<(), Error> {
        let json = self.to_json().await?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| Error::ConfigFileError(format!("writing {}: {e}", path.display())))
    }

    /// Load an authfile from disk. Accepts both the modern array-of-records
    /// shape and the legacy `{"name:pass": ["addr-regex", ...]}` map shape.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::ConfigFileError(format!("reading {}: {e}", path.display())))?;
        let users = parse_authfile(&data)?;
        Ok(Self::from_users(users))
    }

    /// Spawn a background task that polls `path`'s mtime and calls `reset`
    /// whenever it changes, debounced by `RELOAD_POLL_INTERVAL`. Mirrors the
    /// dynamic-config hot-reload pattern used elsewhere in this codebase:
    /// a cheap poll loop rather than a platform file-notify dependency.
    pub fn watch(self, path: PathBuf) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_modified = std::fs::metadata(&path).ok().and_then(|m| m.modified().ok());
            let mut ticker = tokio::time::interval(RELOAD_POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let modified = match std::fs::metadata(&path).ok().and_then(|m| m.modified().ok())
                {
                    Some(m) => m,
                    None => continue,
                };
                if Some(modified) == last_modified {
                    continue;
                }
                last_modified = Some(modified);
                match Self::load(&path).await {
                    Ok(fresh) => {
                        let users: Vec<User> = {
                            let guard = fresh.inner.read().await;
                            guard.values().cloned().collect()
                        };
                        let count = users.len();
                        self.reset(users).await;
                        tracing::info!(path = %path.display(), users = count, "reloaded authfile");
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "authfile reload failed, keeping previous table");
                    }
                }
            }
        })
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_authfile(data: &str) -> Result<Vec<User>, Error> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| Error::ConfigDecode(format!("authfile is not valid JSON: {e}")))?;

    match value {
        Value::Array(_) => {
            let records: Vec<UserRecord> = serde_json::from_value(value)
                .map_err(|e| Error::ConfigDecode(format!("decoding authfile records: {e}")))?;
            records
                .into_iter()
                .map(User::try_from)
                .collect::<Result<Vec<_>, _>>()
        }
        Value::Object(map) => {
            let mut users = Vec::with_capacity(map.len());
            for (key, entry) in map {
                let (name, pass) = key.split_once(':').ok_or_else(|| {
                    Error::ConfigDecode(format!(
                        "legacy authfile key '{key}' is not of the form 'name:pass'"
                    ))
                })?;
                let addrs: Vec<String> = entry
                    .as_array()
                    .ok_or_else(|| {
                        Error::ConfigDecode(format!(
                            "legacy authfile entry for {name} is not an array"
                        ))
                    })?
                    .iter()
                    .map(|v| v.as_str().unwrap_or_default().to_string())
                    .collect();
                users.push(User::new(name, pass, addrs, false)?);
            }
            Ok(users)
        }
        _ => Err(Error::ConfigDecode(
            "authfile must be a JSON array or object".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_del_roundtrip() {
        let store = UserStore::new();
        let u = User::new("alice", "password1", vec![".*".to_string()], false).unwrap();
        store.set(u).await;
        assert_eq!(store.len().await, 1);
        assert!(store.get("alice").await.is_some());
        assert!(store.del("alice").await);
        assert!(store.get("alice").await.is_none());
    }

    #[tokio::test]
    async fn reset_replaces_atomically() {
        let store = UserStore::new();
        store
            .set(User::new("old", "password1", vec![".*".to_string()], false).unwrap())
            .await;
        store
            .reset(vec![User::new(
                "new",
                "password1",
                vec![".*".to_string()],
                false,
            )
            .unwrap()])
            .await;
        assert!(store.get("old").await.is_none());
        assert!(store.get("new").await.is_some());
    }

    #[test]
    fn parses_modern_array_shape() {
        let data = r#"[{"username":"bob","password":"password1","addresses":[".*"],"is_admin":true}]"#;
        let users = parse_authfile(data).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].name, "bob");
        assert!(users[0].is_admin);
    }

    #[test]
    fn parses_legacy_map_shape() {
        let data = r#"{"carol:password1": ["^9001", "^9002"]}"#;
        let users = parse_authfile(data).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].name, "carol");
        assert!(users[0].has_access("9001:0.0.0.0->80:x"));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_authfile("not json").is_err());
    }
}
