//! Shared Memory Bus: a keyed, typed, TTL'd publish/subscribe store (§4.2).
//!
//! Grounded on the teacher's `services::event_bus::EventBus` — sequence-
//! stamped broadcast with a per-call lock, non-blocking delivery, and an
//! explicit subscriber lifecycle — generalized from one global broadcast
//! channel to a per-subscriber `mpsc` map so a single slow reader can be
//! dropped without starving the rest.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::config::SharedMemoryConfig;

/// The well-known distinguished entry type carrying `ContextSnapshot`'s
/// structured value, plus a small extensible set of general-purpose kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedEntryType {
    Generic,
    ContextSnapshot,
    Discovery,
    ToolOutcome,
}

/// Structured value for entries of type [`SharedEntryType::ContextSnapshot`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub key_files: Vec<String>,
    pub discoveries: Vec<String>,
    pub requirements: Vec<String>,
    pub decisions: Vec<String>,
    pub critical_results: Vec<String>,
    pub error_patterns: Vec<String>,
}

/// One stored value plus its bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub entry_type: SharedEntryType,
    pub source: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    /// `None` means the entry never expires.
    pub ttl: Option<Duration>,
}

impl SharedEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => {
                let age = now.signed_duration_since(self.created_at);
                age.to_std().unwrap_or(Duration::ZERO) >= ttl
            }
        }
    }
}

/// Pushed to subscribers on every successful `write`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedMemoryEvent {
    pub key: String,
    pub entry_type: SharedEntryType,
    pub source: String,
    pub version: u64,
}

struct Subscriber {
    sender: mpsc::Sender<SharedMemoryEvent>,
    closing: Arc<AtomicBool>,
}

struct Store {
    entries: HashMap<String, SharedEntry>,
    type_index: HashMap<SharedEntryType, HashSet<String>>,
}

impl Store {
    fn remove(&mut self, key: &str) -> Option<SharedEntry> {
        let removed = self.entries.remove(key)?;
        if let Some(set) = self.type_index.get_mut(&removed.entry_type) {
            set.remove(key);
        }
        Some(removed)
    }

    fn insert(&mut self, entry: SharedEntry) {
        self.type_index
            .entry(entry.entry_type)
            .or_default()
            .insert(entry.key.clone());
        self.entries.insert(entry.key.clone(), entry);
    }
}

/// Thread-safe, bounded, LRU-evicting publish/subscribe store shared by
/// every agent in a run.
pub struct SharedMemoryBus {
    store: RwLock<Store>,
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
    config: SharedMemoryConfig,
    dropped_notifications: AtomicU64,
}

impl SharedMemoryBus {
    #[must_use]
    pub fn new(config: SharedMemoryConfig) -> Self {
        Self {
            store: RwLock::new(Store {
                entries: HashMap::new(),
                type_index: HashMap::new(),
            }),
            subscribers: RwLock::new(HashMap::new()),
            config,
            dropped_notifications: AtomicU64::new(0),
        }
    }

    /// Count of notifications dropped because a subscriber channel was full
    /// or closing. Exposed for metrics, never used to decide delivery.
    #[must_use]
    pub fn dropped_notifications(&self) -> u64 {
        self.dropped_notifications.load(Ordering::Relaxed)
    }

    /// Create-or-update `key`. Evicts before insert if at capacity and
    /// `key` is new. Returns the entry's new version.
    pub async fn write(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
        entry_type: SharedEntryType,
        source: impl Into<String>,
        ttl: Option<Duration>,
    ) -> u64 {
        let key = key.into();
        let source = source.into();
        let now = Utc::now();
        let (entry, event) = {
            let mut store = self.store.write().await;
            if !store.entries.contains_key(&key) && store.entries.len() >= self.config.max_entries {
                Self::evict_locked(&mut store, &self.config, now);
            }
            let version = store.entries.get(&key).map_or(1, |existing| existing.version + 1);
            let entry = SharedEntry {
                key: key.clone(),
                value,
                entry_type,
                source: source.clone(),
                version,
                created_at: now,
                ttl,
            };
            store.insert(entry.clone());
            let event = SharedMemoryEvent {
                key,
                entry_type,
                source,
                version,
            };
            (entry, event)
        };
        self.notify(event).await;
        entry.version
    }

    fn evict_locked(store: &mut Store, config: &SharedMemoryConfig, now: DateTime<Utc>) {
        let expired: Vec<String> = store
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();
        for key in expired {
            store.remove(&key);
        }
        if store.entries.len() < config.max_entries {
            return;
        }
        let evict_count = ((store.entries.len() as f64) * config.eviction_fraction).floor() as usize;
        let mut by_age: Vec<(DateTime<Utc>, String)> = store
            .entries
            .values()
            .map(|e| (e.created_at, e.key.clone()))
            .collect();
        by_age.sort_by_key(|(created_at, _)| *created_at);
        for (_, key) in by_age.into_iter().take(evict_count.max(1)) {
            store.remove(&key);
        }
    }

    async fn notify(&self, event: SharedMemoryEvent) {
        let subscribers = self.subscribers.read().await;
        for sub in subscribers.values() {
            if sub.closing.load(Ordering::SeqCst) {
                continue;
            }
            if sub.sender.try_send(event.clone()).is_err() {
                self.dropped_notifications.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Read `key`'s current value, if present and not expired.
    pub async fn read(&self, key: &str) -> Option<SharedEntry> {
        let store = self.store.read().await;
        let entry = store.entries.get(key)?;
        if entry.is_expired(Utc::now()) {
            None
        } else {
            Some(entry.clone())
        }
    }

    /// All non-expired entries of a given type.
    pub async fn read_by_type(&self, entry_type: SharedEntryType) -> Vec<SharedEntry> {
        let store = self.store.read().await;
        let now = Utc::now();
        store
            .type_index
            .get(&entry_type)
            .into_iter()
            .flatten()
            .filter_map(|key| store.entries.get(key))
            .filter(|e| !e.is_expired(now))
            .cloned()
            .collect()
    }

    pub async fn delete(&self, key: &str) {
        let mut store = self.store.write().await;
        store.remove(key);
    }

    pub async fn clear(&self) {
        let mut store = self.store.write().await;
        store.entries.clear();
        store.type_index.clear();
    }

    /// Drop all expired entries now, returning how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut store = self.store.write().await;
        let now = Utc::now();
        let expired: Vec<String> = store
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();
        let count = expired.len();
        for key in expired {
            store.remove(&key);
        }
        count
    }

    /// Full point-in-time snapshot of every live (non-expired) entry, for
    /// embedding in an agent checkpoint (§3/§6).
    pub async fn snapshot(&self) -> Vec<SharedEntry> {
        let store = self.store.read().await;
        let now = Utc::now();
        store.entries.values().filter(|e| !e.is_expired(now)).cloned().collect()
    }

    /// Reinsert a previously snapshotted set of entries, preserving their
    /// original `version`/`created_at` instead of treating them as fresh
    /// writes. Does not notify subscribers.
    pub async fn restore(&self, entries: Vec<SharedEntry>) {
        let mut store = self.store.write().await;
        for entry in entries {
            store.insert(entry);
        }
    }

    /// Register a new subscriber, returning its event receiver. Channel
    /// capacity is fixed by configuration (default 100).
    pub async fn subscribe(&self, id: Uuid) -> mpsc::Receiver<SharedMemoryEvent> {
        let (sender, receiver) = mpsc::channel(self.config.subscriber_channel_capacity);
        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(
            id,
            Subscriber {
                sender,
                closing: Arc::new(AtomicBool::new(false)),
            },
        );
        receiver
    }

    /// Atomically mark `id` as closing, remove it from the subscriber map,
    /// then drop its sender outside the lock so in-flight `notify` calls
    /// never observe a half-removed entry.
    pub async fn unsubscribe(&self, id: Uuid) {
        let removed = {
            let mut subscribers = self.subscribers.write().await;
            if let Some(sub) = subscribers.get(&id) {
                sub.closing.store(true, Ordering::SeqCst);
            }
            subscribers.remove(&id)
        };
        drop(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> SharedMemoryBus {
        SharedMemoryBus::new(SharedMemoryConfig {
            max_entries: 4,
            subscriber_channel_capacity: 2,
            eviction_fraction: 0.25,
        })
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let bus = bus();
        bus.write("k", serde_json::json!("v"), SharedEntryType::Generic, "agent-a", None)
            .await;
        let entry = bus.read("k").await.unwrap();
        assert_eq!(entry.value, serde_json::json!("v"));
        assert_eq!(entry.version, 1);
    }

    #[tokio::test]
    async fn repeated_writes_to_same_key_are_monotonic_versions() {
        let bus = bus();
        bus.write("k", serde_json::json!(1), SharedEntryType::Generic, "a", None)
            .await;
        let v2 = bus
            .write("k", serde_json::json!(2), SharedEntryType::Generic, "a", None)
            .await;
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let bus = bus();
        bus.write(
            "k",
            serde_json::json!("v"),
            SharedEntryType::Generic,
            "a",
            Some(Duration::from_millis(0)),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(bus.read("k").await.is_none());
    }

    #[tokio::test]
    async fn eviction_drops_oldest_when_at_capacity() {
        let bus = bus();
        for i in 0..4 {
            bus.write(
                format!("k{i}"),
                serde_json::json!(i),
                SharedEntryType::Generic,
                "a",
                None,
            )
            .await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        bus.write("k4", serde_json::json!(4), SharedEntryType::Generic, "a", None)
            .await;
        assert!(bus.read("k0").await.is_none(), "oldest entry should be evicted");
        assert!(bus.read("k4").await.is_some());
    }

    #[tokio::test]
    async fn read_by_type_filters_to_matching_entries() {
        let bus = bus();
        bus.write(
            "snap",
            serde_json::to_value(ContextSnapshot::default()).unwrap(),
            SharedEntryType::ContextSnapshot,
            "a",
            None,
        )
        .await;
        bus.write("other", serde_json::json!(1), SharedEntryType::Generic, "a", None)
            .await;
        let snapshots = bus.read_by_type(SharedEntryType::ContextSnapshot).await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].key, "snap");
    }

    #[tokio::test]
    async fn subscriber_receives_notification_on_write() {
        let bus = bus();
        let id = Uuid::new_v4();
        let mut rx = bus.subscribe(id).await;
        bus.write("k", serde_json::json!(1), SharedEntryType::Generic, "a", None)
            .await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "k");
        assert_eq!(event.version, 1);
    }

    #[tokio::test]
    async fn unsubscribed_id_receives_no_further_events() {
        let bus = bus();
        let id = Uuid::new_v4();
        let mut rx = bus.subscribe(id).await;
        bus.unsubscribe(id).await;
        bus.write("k", serde_json::json!(1), SharedEntryType::Generic, "a", None)
            .await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn full_subscriber_channel_drops_without_stalling_writer() {
        let bus = bus();
        let id = Uuid::new_v4();
        let _rx = bus.subscribe(id).await; // capacity 2, never drained
        for i in 0..5 {
            bus.write(format!("k{i}"), serde_json::json!(i), SharedEntryType::Generic, "a", None)
                .await;
        }
        assert!(bus.dropped_notifications() > 0);
    }

    #[tokio::test]
    async fn cleanup_expired_removes_only_expired_entries() {
        let bus = bus();
        bus.write(
            "expiring",
            serde_json::json!(1),
            SharedEntryType::Generic,
            "a",
            Some(Duration::from_millis(0)),
        )
        .await;
        bus.write("keeper", serde_json::json!(2), SharedEntryType::Generic, "a", None)
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(bus.cleanup_expired().await, 1);
        assert!(bus.read("keeper").await.is_some());
    }

    #[tokio::test]
    async fn snapshot_then_restore_on_a_fresh_bus_roundtrips() {
        let bus = bus();
        bus.write("k", serde_json::json!("v"), SharedEntryType::Generic, "agent-a", None)
            .await;
        let snapshot = bus.snapshot().await;
        assert_eq!(snapshot.len(), 1);

        let restored = bus();
        restored.restore(snapshot).await;
        let entry = restored.read("k").await.unwrap();
        assert_eq!(entry.value, serde_json::json!("v"));
        assert_eq!(entry.version, 1);
    }

    #[tokio::test]
    async fn snapshot_excludes_expired_entries() {
        let bus = bus();
        bus.write(
            "expiring",
            serde_json::json!(1),
            SharedEntryType::Generic,
            "a",
            Some(Duration::from_millis(0)),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(bus.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn delete_and_clear_remove_entries() {
        let bus = bus();
        bus.write("k", serde_json::json!(1), SharedEntryType::Generic, "a", None)
            .await;
        bus.delete("k").await;
        assert!(bus.read("k").await.is_none());

        bus.write("a", serde_json::json!(1), SharedEntryType::Generic, "s", None)
            .await;
        bus.write("b", serde_json::json!(2), SharedEntryType::Generic, "s", None)
            .await;
        bus.clear().await;
        assert!(bus.read("a").await.is_none());
        assert!(bus.read("b").await.is_none());
    }
}
