//! In-process cache, for tests and embedders that persist state themselves.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{CacheError, CacheKey, CacheSnapshot, CacheStore};

#[derive(Default)]
pub struct MemoryCache {
    object: Mutex<serde_json::Map<String, Value>>,
    writes: Mutex<Vec<Vec<CacheKey>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a raw JSON object, as if it had been read from disk.
    pub fn with_object(object: serde_json::Map<String, Value>) -> Self {
        Self {
            object: Mutex::new(object),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Raw value stored under `key`.
    pub fn raw(&self, key: CacheKey) -> Option<Value> {
        self.object.lock().get(key.as_str()).cloned()
    }

    /// Keys of every `set_many` call so far, one group per call.
    pub fn write_log(&self) -> Vec<Vec<CacheKey>> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn load(&self) -> Result<CacheSnapshot, CacheError> {
        Ok(CacheSnapshot::from_object(&self.object.lock()))
    }

    async fn set_many(&self, entries: Vec<(CacheKey, Value)>) -> Result<(), CacheError> {
        let mut object = self.object.lock();
        let keys = entries.iter().map(|(k, _)| *k).collect();
        for (key, value) in entries {
            object.insert(key.as_str().to_string(), value);
        }
        self.writes.lock().push(keys);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_and_write_log() {
        let cache = MemoryCache::new();
        cache
            .set_many(vec![
                (CacheKey::Norms, json!({})),
                (CacheKey::ScoreMap, json!({})),
            ])
            .await
            .unwrap();
        cache.set(CacheKey::TimeLastUpdate, json!(5)).await.unwrap();

        assert_eq!(cache.raw(CacheKey::TimeLastUpdate), Some(json!(5)));
        assert_eq!(cache.load().await.unwrap().time_last_update, Some(5));
        assert_eq!(
            cache.write_log(),
            vec![
                vec![CacheKey::Norms, CacheKey::ScoreMap],
                vec![CacheKey::TimeLastUpdate]
            ]
        );
    }
}
