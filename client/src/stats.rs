//! Runtime stat snapshot, dumped to the log on `SIGUSR2` per `spec.md` §6.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    pub connect_attempts: AtomicU64,
    pub successful_connects: AtomicU64,
    pub reconnects: AtomicU64,
    pub streams_opened: AtomicU64,
    pub bytes_uploaded: AtomicU64,
    pub bytes_downloaded: AtomicU64,
    pub consecutive_failures: AtomicU32,
}

impl Stats {
    pub fn snapshot(&self) -> String {
        format!(
            "connect_attempts={} successful_connects={} reconnects={} streams_opened={} \
             bytes_uploaded={} bytes_downloaded={} consecutive_failures={}",
            self.connect_attempts.load(Ordering::Relaxed),
            self.successful_connects.load(Ordering::Relaxed),
            self.reconnects.load(Ordering::Relaxed),
            self.streams_opened.load(Ordering::Relaxed),
            self.bytes_uploaded.load(Ordering::Relaxed),
            self.bytes_downloaded.load(Ordering::Relaxed),
            self.consecutive_failures.load(Ordering::Relaxed),
        )
    }
}
