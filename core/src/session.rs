//! Session table: maps an opaque session id (minted at successful auth) to
//! the authenticated `User`, with idle-timeout eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::sync::Mutex;

use crate::user::User;

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub [u8; 16]);

impl SessionId {
    pub fn new_random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

struct SessionEntry {
    user: User,
    last_seen: Instant,
}

/// Live sessions, keyed by session id. A background sweep task evicts
/// entries that have not been touched within the configured timeout — this
/// is the server's defense against a tunnel that dies without a clean
/// close ever releasing its session slot.
#[derive(Clone)]
pub struct SessionTable {
    inner: Arc<Mutex<HashMap<SessionId, SessionEntry>>>,
    timeout: Duration,
}

impl SessionTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    pub async fn insert(&self, user: User) -> SessionId {
        let id = SessionId::new_random();
        self.inner.lock().await.insert(
            id.clone(),
            SessionEntry {
                user,
                last_seen: Instant::now(),
            },
        );
        id
    }

    pub async fn touch(&self, id: &SessionId) -> bool {
        let mut guard = self.inner.lock().await;
        if let Some(entry) = guard.get_mut(id) {
            entry.last_seen = Instant::now();
            true
        } else {
            false
        }
    }

    pub async fn user_for(&self, id: &SessionId) -> Option<User> {
        self.inner.lock().await.get(id).map(|e| e.user.clone())
    }

    pub async fn remove(&self, id: &SessionId) {
        self.inner.lock().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Spawn the background eviction sweep. The returned handle is owned by
    /// the caller's lifecycle manager and aborted on shutdown.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let table = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                table.sweep_expired().await;
            }
        })
    }

    async fn sweep_expired(&self) {
        let now = Instant::now();
        let mut guard = self.inner.lock().await;
        let before = guard.len();
        guard.retain(|_, entry| now.duration_since(entry.last_seen) < self.timeout);
        let evicted = before - guard.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = guard.len(), "swept expired sessions");
        }
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::User;

    fn user() -> User {
        User::new("alice", "password1", vec![".*".to_string()], false).unwrap()
    }

    #[tokio::test]
    async fn insert_and_lookup() {
        let table = SessionTable::new(DEFAULT_SESSION_TIMEOUT);
        let id = table.insert(user()).await;
        assert!(table.user_for(&id).await.is_some());
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let table = SessionTable::new(DEFAULT_SESSION_TIMEOUT);
        let id = table.insert(user()).await;
        table.remove(&id).await;
        assert!(table.user_for(&id).await.is_none());
    }

    #[tokio::test]
    async fn sweep_evicts_stale_entries() {
        let table = SessionTable::new(Duration::from_millis(10));
        let id = table.insert(user()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        table.sweep_expired().await;
        assert!(table.user_for(&id).await.is_none());
    }

    #[tokio::test]
    async fn touch_keeps_entry_alive() {
        let table = SessionTable::new(Duration::from_millis(50));
        let id = table.insert(user()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(table.touch(&id).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        table.sweep_expired().await;
        assert!(table.user_for(&id).await.is_some());
    }

    #[test]
    fn session_id_hex_roundtrips_length() {
        let id = SessionId::new_random();
        assert_eq!(id.to_hex().len(), 32);
    }
}
