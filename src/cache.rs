use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::store::KvStore;

/// Store item holding the persisted tier as one `{key: CacheEntry}` map.
pub const CACHE_STORE_KEY: &str = "local:statsCache";

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Settable clock for TTL tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub stored_at_ms: i64,
}

impl CacheEntry {
    fn is_fresh(&self, now_ms: i64, ttl: Duration) -> bool {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.stored_at_ms) < ttl_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheInfo {
    pub memory_entries: usize,
    pub persisted_entries: Option<usize>,
}

/// Memory tier in front of a persisted `KvStore` tier, one TTL for both.
///
/// A TTL of zero turns every `get` into a miss.
pub struct ResultCache {
    memory: Mutex<HashMap<String, CacheEntry>>,
    /// Serializes read-modify-write of the persisted map.
    persist_lock: Mutex<()>,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self::with_clock(store, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KvStore>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            persist_lock: Mutex::new(()),
            store,
            clock,
            ttl,
        }
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_ms();
        {
            let memory = self.memory.lock().expect("result cache lock poisoned");
            if let Some(entry) = memory.get(key)
                && entry.is_fresh(now, self.ttl)
            {
                debug!(key, "memory cache hit");
                return Some(entry.value.clone());
            }
        }

        let persisted = match self.load_persisted() {
            Ok(map) => map,
            Err(err) => {
                warn!(key, error = %err, "failed to read persisted cache");
                return None;
            }
        };
        let entry = persisted.get(key)?;
        if !entry.is_fresh(now, self.ttl) {
            return None;
        }
        debug!(key, "storage cache hit");
        let mut memory = self.memory.lock().expect("result cache lock poisoned");
        memory.insert(key.to_string(), entry.clone());
        Some(entry.value.clone())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(key, error = %err, "cached value has unexpected shape");
                None
            }
        }
    }

    pub fn set_value(&self, key: &str, value: Value) {
        let entry = CacheEntry {
            value,
            stored_at_ms: self.clock.now_ms(),
        };
        {
            let mut memory = self.memory.lock().expect("result cache lock poisoned");
            memory.insert(key.to_string(), entry.clone());
        }
        if let Err(err) = self.write_persisted(key, entry) {
            warn!(key, error = %err, "failed to write persisted cache");
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.set_value(key, v),
            Err(err) => warn!(key, error = %err, "value not cacheable"),
        }
    }

    pub fn clear(&self) {
        self.memory
            .lock()
            .expect("result cache lock poisoned")
            .clear();
        let _guard = self.persist_lock.lock().expect("result cache lock poisoned");
        match self.store.set(CACHE_STORE_KEY, Value::Object(Default::default())) {
            Ok(()) => debug!("cleared all cache entries"),
            Err(err) => warn!(error = %err, "failed to clear persisted cache"),
        }
    }

    pub fn info(&self) -> CacheInfo {
        let memory_entries = self.memory.lock().expect("result cache lock poisoned").len();
        let persisted_entries = match self.load_persisted() {
            Ok(map) => Some(map.len()),
            Err(err) => {
                warn!(error = %err, "failed to read persisted cache info");
                None
            }
        };
        CacheInfo {
            memory_entries,
            persisted_entries,
        }
    }

    fn load_persisted(&self) -> Result<HashMap<String, CacheEntry>> {
        let Some(raw) = self.store.get(CACHE_STORE_KEY)? else {
            return Ok(HashMap::new());
        };
        serde_json::from_value(raw).context("decode persisted cache")
    }

    /// Rewrites the persisted map with `entry` added and expired entries dropped.
    fn write_persisted(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let _guard = self.persist_lock.lock().expect("result cache lock poisoned");
        let now = self.clock.now_ms();
        let mut map = self.load_persisted().unwrap_or_default();
        map.retain(|_, existing| existing.is_fresh(now, self.ttl));
        map.insert(key.to_string(), entry);
        let raw = serde_json::to_value(&map).context("encode persisted cache")?;
        self.store.set(CACHE_STORE_KEY, raw)
    }
}
