//! JSON-file cache: one object per profile, replaced atomically on every write.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{CacheError, CacheKey, CacheSnapshot, CacheStore};

pub struct JsonFileCache {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonFileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw object. Missing or unreadable JSON is treated as empty.
    async fn read_object(&self) -> Result<serde_json::Map<String, Value>, CacheError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(serde_json::Map::new())
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(object)) => Ok(object),
            Ok(_) | Err(_) => {
                log::warn!(
                    "Ignoring malformed ranker cache at {}",
                    self.path.display()
                );
                Ok(serde_json::Map::new())
            }
        }
    }

    async fn write_object(&self, object: serde_json::Map<String, Value>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let temp_path = self.path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(&Value::Object(object))?;
        tokio::fs::write(&temp_path, payload).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for JsonFileCache {
    async fn load(&self) -> Result<CacheSnapshot, CacheError> {
        let object = self.read_object().await?;
        Ok(CacheSnapshot::from_object(&object))
    }

    async fn set_many(&self, entries: Vec<(CacheKey, Value)>) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut object = self.read_object().await?;
        for (key, value) in entries {
            object.insert(key.as_str().to_string(), value);
        }
        self.write_object(object).await?;
        log::debug!("Wrote ranker cache {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Feature;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_file_is_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path().join("cache.json"));
        assert_eq!(cache.load().await.unwrap(), CacheSnapshot::default());
    }

    #[tokio::test]
    async fn test_set_many_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path().join("nested").join("cache.json"));

        cache
            .set(CacheKey::TimeLastUpdate, json!(1_700_000_000))
            .await
            .unwrap();
        cache
            .set_many(vec![
                (CacheKey::Weights, json!({"frec": 0.5})),
                (CacheKey::InitWeights, json!({"frec": 0.7})),
            ])
            .await
            .unwrap();

        let snapshot = cache.load().await.unwrap();
        assert_eq!(snapshot.time_last_update, Some(1_700_000_000));
        assert_eq!(snapshot.weights.unwrap().get(Feature::Frec), Some(0.5));
        assert_eq!(snapshot.init_weights.unwrap().get(Feature::Frec), Some(0.7));
        assert!(!cache.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_malformed_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = JsonFileCache::new(&path);
        assert_eq!(cache.load().await.unwrap(), CacheSnapshot::default());

        cache.set(CacheKey::Weights, json!({"bias": 0.01})).await.unwrap();
        let snapshot = cache.load().await.unwrap();
        assert_eq!(snapshot.weights.unwrap().get(Feature::Bias), Some(0.01));
    }
}
