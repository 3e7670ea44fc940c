/// Short-lived in-memory read cache keyed by `"{tenant}:{table}"`
use crate::clock::{is_fresh, SharedClock};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

struct CacheEntry {
    data: Value,
    stored_at: i64,
}

pub struct ReadCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    clock: SharedClock,
}

impl ReadCache {
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn key(tenant: &str, table: &str) -> String {
        format!("{}:{}", tenant, table)
    }

    /// Cached value, if it is younger than the TTL
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if is_fresh(entry.stored_at, now, self.ttl) => Some(entry.data.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: impl Into<String>, data: Value) {
        let stored_at = self.clock.now_millis();
        self.entries
            .lock()
            .insert(key.into(), CacheEntry { data, stored_at });
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
