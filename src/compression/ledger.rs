/// De-duplication ledger for rotation notifications
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::debug;

/// Age after which a compressed entry is forgotten
pub const LEDGER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How often expired entries are swept out
pub const EVICTION_PERIOD: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    InFlight,
    Compressed(Instant),
}

/// Memory-bounded map of rotated paths that are being, or were recently,
/// compressed. Not a durable record.
#[derive(Debug, Default)]
pub struct CompressionLedger {
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl CompressionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path` for compression. Returns `false` when the path is already
    /// in flight or was compressed inside the TTL window.
    pub fn try_begin(&self, path: &Path) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(path) {
            return false;
        }
        entries.insert(path.to_path_buf(), Entry::InFlight);
        true
    }

    /// Mark `path` as compressed now
    pub fn complete(&self, path: &Path) {
        self.complete_at(path, Instant::now());
    }

    pub fn complete_at(&self, path: &Path, at: Instant) {
        self.lock().insert(path.to_path_buf(), Entry::Compressed(at));
    }

    /// Release a claim that did not end in a compressed file
    pub fn abandon(&self, path: &Path) {
        self.lock().remove(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    pub fn is_compressed(&self, path: &Path) -> bool {
        matches!(self.lock().get(path), Some(Entry::Compressed(_)))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop compressed entries older than `ttl`. In-flight claims are kept.
    pub fn evict_expired(&self, ttl: Duration) -> usize {
        self.evict_older_than(Instant::now(), ttl)
    }

    pub fn evict_older_than(&self, now: Instant, ttl: Duration) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| match entry {
            Entry::InFlight => true,
            Entry::Compressed(at) => now.saturating_duration_since(*at) < ttl,
        });
        before - entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Periodically evict expired ledger entries
pub fn spawn_eviction(ledger: Arc<CompressionLedger>, period: Duration, ttl: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = ledger.evict_expired(ttl);
            if evicted > 0 {
                debug!(evicted, remaining = ledger.len(), "Evicted expired ledger entries");
            }
        }
    })
}
