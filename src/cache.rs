//! TTL cache for analytics query results, keyed by endpoint plus a
//! canonical serialization of the request parameters.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

/// Memoizes query payloads until their TTL elapses or the whole cache is
/// cleared. Expiry is checked in [`QueryCache::get`] and nowhere else, so
/// call sites can never hand out a stale entry.
#[derive(Debug)]
pub struct QueryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
}

impl QueryCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Builds the cache key for an endpoint and its parameters. The
    /// parameter serialization is canonical: object keys are written in
    /// sorted order, so two effectively-identical requests always collide
    /// regardless of how their fields were assembled.
    pub fn key<P: Serialize>(endpoint: &str, params: &P) -> String {
        let value = serde_json::to_value(params).unwrap_or(Value::Null);
        let mut out = String::with_capacity(64);
        write_canonical(&value, &mut out);
        format!("{}:{}", endpoint, out)
    }

    /// Returns the payload for `key` if present and not expired. An expired
    /// entry counts as absent and is removed on the spot.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.payload.clone()),
            Some(_) => {
                entries.remove(key);
                tracing::debug!(key = %key, "Evicted expired cache entry");
                None
            }
            None => None,
        }
    }

    /// Stores `payload` under `key` with the default TTL, overwriting any
    /// existing entry.
    pub async fn set(&self, key: String, payload: Value) {
        self.set_with_ttl(key, payload, self.default_ttl).await;
    }

    pub async fn set_with_ttl(&self, key: String, payload: Value, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                payload,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drops every entry. Invoked whenever the analysis parameters change
    /// and on explicit refresh-all requests.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        let dropped = entries.len();
        entries.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "Cleared query cache");
        }
    }

    /// Removes expired entries without touching live ones.
    pub async fn prune_expired(&self) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| !entry.is_expired());
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Writes `value` as compact JSON with object keys in sorted order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        leaf => out.push_str(&leaf.to_string()),
    }
}
