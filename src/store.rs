//! Offline persistence
//!
//! Undeliverable events survive restarts through a small key-value port.
//! [`OfflineStore`] layers the collection semantics on top: all events live
//! under one bounded key, insertion past the cap evicts the oldest entries
//! first, and every storage failure is downgraded to a logged diagnostic.
//! Storage trouble must never reach the delivery path as an error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::event::QueuedEvent;

/// Minimal persistent key-value port.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// File-per-key store rooted at a directory.
///
/// Writes go through a temp file and a rename so a crash mid-write never
/// leaves a half-written value behind.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn file_name(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(Self::file_name(key))
    }
}

#[async_trait]
impl KeyValueStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{}.tmp", Self::file_name(key)));
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and for embedders that handle durability
/// themselves. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    map: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.map.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.locked().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.locked().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.locked().remove(key);
        Ok(())
    }
}

/// Bounded, persistent holding area for events that exhausted their retries.
pub struct OfflineStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    max_events: usize,
}

impl OfflineStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, key_prefix: &str, max_events: usize) -> Self {
        Self {
            kv,
            key: format!("{key_prefix}:events"),
            max_events,
        }
    }

    /// Append events under the collection key, evicting the oldest entries
    /// once the cap is exceeded. Failures are logged, never raised.
    pub async fn persist(&self, events: &[QueuedEvent]) {
        if events.is_empty() {
            return;
        }
        let mut all = self.read().await;
        all.extend(events.iter().cloned());
        if all.len() > self.max_events {
            let evicted = all.len() - self.max_events;
            all.drain(..evicted);
            tracing::warn!(
                evicted,
                cap = self.max_events,
                "offline store full, evicting oldest events"
            );
        }
        let payload = match serde_json::to_string(&all) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "offline events not serializable, skipping persist");
                return;
            }
        };
        if let Err(err) = self.kv.set(&self.key, &payload).await {
            tracing::warn!(error = %err, "offline store write failed, events not persisted");
        }
    }

    /// Read everything back, clear the collection, and return the events for
    /// re-injection into the retry path. An unreadable store is an empty one.
    pub async fn load_and_clear(&self) -> Vec<QueuedEvent> {
        let events = self.read().await;
        if let Err(err) = self.kv.delete(&self.key).await {
            tracing::warn!(error = %err, "offline store clear failed");
        }
        events
    }

    async fn read(&self) -> Vec<QueuedEvent> {
        match self.kv.get(&self.key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(events) => events,
                Err(err) => {
                    tracing::warn!(error = %err, "offline store contents unreadable, treating as empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!(error = %err, "offline store read failed, treating as empty");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::event::{EventRecord, Level};

    fn queued(message: &str) -> QueuedEvent {
        QueuedEvent::new(
            EventRecord::builder()
                .level(Level::Info)
                .message(message)
                .build(),
        )
    }

    /// Store whose every operation fails, for the failure-handling contract.
    struct BrokenKvStore;

    #[async_trait]
    impl KeyValueStore for BrokenKvStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::Storage("disk on fire".into()))
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(Error::Storage("disk on fire".into()))
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Err(Error::Storage("disk on fire".into()))
        }
    }

    #[tokio::test]
    async fn persist_and_reload_round_trip() {
        let store = OfflineStore::new(Arc::new(MemoryKvStore::new()), "test", 100);
        store.persist(&[queued("a"), queued("b")]).await;
        store.persist(&[queued("c")]).await;

        let loaded = store.load_and_clear().await;
        let messages: Vec<_> = loaded.iter().map(|q| q.event.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b", "c"]);

        // The collection key was cleared.
        assert!(store.load_and_clear().await.is_empty());
    }

    #[tokio::test]
    async fn cap_evicts_oldest_first() {
        let store = OfflineStore::new(Arc::new(MemoryKvStore::new()), "test", 3);
        store.persist(&[queued("one"), queued("two")]).await;
        store.persist(&[queued("three"), queued("four")]).await;

        let loaded = store.load_and_clear().await;
        let messages: Vec<_> = loaded.iter().map(|q| q.event.message.as_str()).collect();
        assert_eq!(messages, vec!["two", "three", "four"]);
    }

    #[tokio::test]
    async fn storage_failures_never_raise() {
        let store = OfflineStore::new(Arc::new(BrokenKvStore), "test", 10);
        // Both operations swallow the failure and log.
        store.persist(&[queued("doomed")]).await;
        assert!(store.load_and_clear().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_contents_are_treated_as_empty() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set("test:events", "{not json").await.unwrap();
        let store = OfflineStore::new(kv, "test", 10);
        assert!(store.load_and_clear().await.is_empty());
    }

    #[tokio::test]
    async fn file_store_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        {
            let kv = FileKvStore::new(dir.path()).unwrap();
            kv.set("logship:events", r#"[{"k":1}]"#).await.unwrap();
        }
        let kv = FileKvStore::new(dir.path()).unwrap();
        assert_eq!(
            kv.get("logship:events").await.unwrap().as_deref(),
            Some(r#"[{"k":1}]"#)
        );

        kv.delete("logship:events").await.unwrap();
        assert_eq!(kv.get("logship:events").await.unwrap(), None);
        // Deleting a missing key stays quiet.
        kv.delete("logship:events").await.unwrap();
    }

    #[test]
    fn keys_become_safe_file_names() {
        assert_eq!(FileKvStore::file_name("logship:events"), "logship_events");
        assert_eq!(FileKvStore::file_name("a/b\\c d"), "a_b_c_d");
    }
}
