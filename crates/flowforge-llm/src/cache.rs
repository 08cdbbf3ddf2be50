//! Time-boxed cache of raw oracle responses.
//!
//! Entries are keyed by a SHA-256 digest of the build mode and the
//! normalized prompt. The full key material is stored alongside each entry
//! and compared on lookup, so a digest collision can never serve another
//! prompt's response.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct Entry {
    key_material: String,
    value: String,
    stored_at: DateTime<Utc>,
}

pub struct ResponseCache<C = SystemClock> {
    clock: C,
    ttl: chrono::Duration,
    entries: Mutex<HashMap<[u8; 32], Entry>>,
}

impl ResponseCache<SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }
}

impl<C: Clock> ResponseCache<C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self {
            clock,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, mode: &str, prompt: &str) -> Option<String> {
        let material = key_material(mode, prompt);
        let digest = digest(&material);
        let now = self.clock.now();

        let mut entries = self.entries.lock();
        let entry = entries.get(&digest)?;
        if entry.key_material != material {
            debug!("Response cache digest collision, ignoring entry");
            return None;
        }
        if now - entry.stored_at >= self.ttl {
            entries.remove(&digest);
            return None;
        }
        debug!(mode, "Response cache hit");
        Some(entry.value.clone())
    }

    pub fn insert(&self, mode: &str, prompt: &str, value: impl Into<String>) {
        let material = key_material(mode, prompt);
        let entry = Entry {
            stored_at: self.clock.now(),
            value: value.into(),
            key_material: material,
        };
        self.entries.lock().insert(digest(&entry.key_material), entry);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now - e.stored_at < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trimmed, with internal whitespace runs collapsed to one space.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn key_material(mode: &str, prompt: &str) -> String {
    format!("{}\0{}", mode, normalize_prompt(prompt))
}

fn digest(material: &str) -> [u8; 32] {
    Sha256::digest(material.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[derive(Clone, Default)]
    struct ManualClock(Arc<AtomicI64>);

    impl ManualClock {
        fn advance(&self, secs: i64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp(1_700_000_000 + self.0.load(Ordering::SeqCst), 0)
                .unwrap_or_default()
        }
    }

    #[test]
    fn hits_only_on_same_mode_and_normalized_prompt() {
        let cache = ResponseCache::with_clock(DEFAULT_TTL, ManualClock::default());
        cache.insert("interpret", "  send a   daily report ", "{}");

        assert_eq!(cache.get("interpret", "send a daily report"), Some("{}".to_string()));
        assert_eq!(cache.get("exact", "send a daily report"), None);
        assert_eq!(cache.get("interpret", "send a weekly report"), None);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let clock = ManualClock::default();
        let cache = ResponseCache::with_clock(Duration::from_secs(60), clock.clone());
        cache.insert("exact", "a", "one");
        cache.insert("exact", "b", "two");

        clock.advance(59);
        assert!(cache.get("exact", "a").is_some());

        clock.advance(1);
        assert!(cache.get("exact", "a").is_none());
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_prompt("\n a \t b  "), "a b");
    }
}
