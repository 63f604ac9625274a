use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::catalog::VideoInfo;
use crate::config::CacheConfig;

struct CacheEntry {
    expires_at: Instant,
    value: Arc<VideoInfo>,
}

/// Time-bounded, size-bounded map from normalized URL to a built catalog.
///
/// When full, expired entries go first and then the ones closest to expiry.
/// A zero TTL or capacity turns every operation into a no-op.
pub struct ResultCache {
    ttl: Option<Duration>,
    capacity: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new(ttl_secs: i64, max_entries: i64) -> Self {
        let enabled = ttl_secs > 0 && max_entries > 0;
        Self {
            ttl: enabled.then(|| Duration::from_secs(ttl_secs.unsigned_abs())),
            capacity: usize::try_from(max_entries).unwrap_or(0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl_secs, config.max_entries)
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    pub fn get(&self, url: &str) -> Option<Arc<VideoInfo>> {
        self.get_at(url, Instant::now())
    }

    pub fn set(&self, url: &str, value: Arc<VideoInfo>) {
        self.set_at(url, value, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_at(&self, url: &str, now: Instant) -> Option<Arc<VideoInfo>> {
        self.ttl?;

        let mut entries = self.entries.lock();
        match entries.get(url) {
            Some(entry) if entry.expires_at > now => Some(Arc::clone(&entry.value)),
            Some(_) => {
                entries.remove(url);
                None
            }
            None => None,
        }
    }

    fn set_at(&self, url: &str, value: Arc<VideoInfo>, now: Instant) {
        let Some(ttl) = self.ttl else {
            return;
        };

        let mut entries = self.entries.lock();
        entries.insert(
            url.to_string(),
            CacheEntry {
                expires_at: now + ttl,
                value,
            },
        );

        if entries.len() <= self.capacity {
            return;
        }

        entries.retain(|_, entry| entry.expires_at > now);

        let overflow = entries.len().saturating_sub(self.capacity);
        if overflow > 0 {
            let mut by_expiry: Vec<(Instant, String)> = entries
                .iter()
                .map(|(key, entry)| (entry.expires_at, key.clone()))
                .collect();
            by_expiry.sort();
            for (_, key) in by_expiry.into_iter().take(overflow) {
                entries.remove(&key);
            }
        }

        debug!(size = entries.len(), capacity = self.capacity, "Result cache trimmed");
    }
}
