//! Bounded TTL caches owned by each client.
//!
//! Group metadata is cached so sends to groups avoid a metadata round-trip;
//! sent and received messages are kept so the transport can look them up
//! when a recipient asks for a retry.

use crate::whatsapp::config::CacheConfig;
use crate::whatsapp::types::{GroupMetadata, GroupUpdate, InboundMessage, MessageContent};
use log::debug;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Key/value store with per-entry expiry and a size bound.
///
/// Expired entries are dropped lazily on read and in bulk on insert. When
/// full, the oldest entry is evicted.
pub struct TtlCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(e) => e.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.purge_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Mutate a live entry in place without refreshing its age.
    pub fn update<F>(&mut self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        if self.get(key).is_none() {
            return false;
        }
        match self.entries.get_mut(key) {
            Some(entry) => {
                f(&mut entry.value);
                true
            }
            None => false,
        }
    }

    /// Drop all expired entries; returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.inserted_at.elapsed() <= ttl);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entry count, including entries that have expired but not been purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.inserted_at)
            .map(|(k, _)| k.clone());
        if let Some(k) = oldest {
            self.entries.remove(&k);
        }
    }
}

/// The two caches a client owns.
pub struct ClientCaches {
    groups: Mutex<TtlCache<String, GroupMetadata>>,
    messages: Mutex<TtlCache<String, MessageContent>>,
}

impl ClientCaches {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            groups: Mutex::new(TtlCache::new(
                Duration::from_secs(config.group_ttl_secs),
                config.group_max_entries,
            )),
            messages: Mutex::new(TtlCache::new(
                Duration::from_secs(config.message_ttl_secs),
                config.message_max_entries,
            )),
        }
    }

    pub async fn group(&self, jid: &str) -> Option<GroupMetadata> {
        self.groups.lock().await.get(&jid.to_string())
    }

    pub async fn put_groups(&self, groups: &[GroupMetadata]) {
        let mut cache = self.groups.lock().await;
        for g in groups {
            cache.insert(g.id.clone(), g.clone());
        }
        debug!("Cached {} group(s)", groups.len());
    }

    /// Apply partial updates to groups already cached; unknown groups are
    /// skipped so the next lookup fetches full metadata.
    pub async fn apply_group_updates(&self, updates: &[GroupUpdate]) {
        let mut cache = self.groups.lock().await;
        for u in updates {
            if !cache.update(&u.id, |meta| u.apply_to(meta)) {
                debug!("Group update for uncached {}", u.id);
            }
        }
    }

    pub async fn message(&self, id: &str) -> Option<MessageContent> {
        self.messages.lock().await.get(&id.to_string())
    }

    pub async fn put_message(&self, id: &str, content: MessageContent) {
        self.messages.lock().await.insert(id.to_string(), content);
    }

    pub async fn put_inbound(&self, messages: &[InboundMessage]) {
        let mut cache = self.messages.lock().await;
        for m in messages {
            if let Some(ref content) = m.content {
                cache.insert(m.id.clone(), content.clone());
            }
        }
    }

    pub async fn clear(&self) {
        self.groups.lock().await.clear();
        self.messages.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str, subject: &str) -> GroupMetadata {
        GroupMetadata {
            id: id.into(),
            subject: subject.into(),
            owner: None,
            creation: 0,
            participants: vec![],
            description: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let mut cache = TtlCache::new(Duration::from_secs(10), 10);
        cache.insert("a", 1);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.get(&"a"), Some(1));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn oldest_evicted_when_full() {
        let mut cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert("b", 2);
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_purged_before_eviction() {
        let mut cache = TtlCache::new(Duration::from_secs(1), 2);
        cache.insert("old", 0);
        tokio::time::advance(Duration::from_secs(2)).await;
        cache.insert("fresh", 1);
        cache.insert("newer", 2);
        assert_eq!(cache.get(&"fresh"), Some(1));
        assert_eq!(cache.get(&"newer"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn overwriting_does_not_evict() {
        let mut cache = TtlCache::new(Duration::from_secs(60), 1);
        cache.insert("a", 1);
        cache.insert("a", 2);
        assert_eq!(cache.get(&"a"), Some(2));
    }

    #[tokio::test]
    async fn group_updates_merge_into_cached_metadata() {
        let caches = ClientCaches::new(&CacheConfig::default());
        caches.put_groups(&[group("1@g.us", "Old")]).await;
        caches
            .apply_group_updates(&[
                GroupUpdate {
                    id: "1@g.us".into(),
                    subject: Some("New".into()),
                    ..Default::default()
                },
                GroupUpdate {
                    id: "2@g.us".into(),
                    subject: Some("Ghost".into()),
                    ..Default::default()
                },
            ])
            .await;

        assert_eq!(caches.group("1@g.us").await.unwrap().subject, "New");
        assert!(caches.group("2@g.us").await.is_none());
    }

    #[tokio::test]
    async fn message_store_roundtrip() {
        let caches = ClientCaches::new(&CacheConfig::default());
        caches.put_message("3EB0AA", MessageContent::text("hello")).await;
        assert_eq!(
            caches.message("3EB0AA").await,
            Some(MessageContent::text("hello"))
        );
        caches.clear().await;
        assert!(caches.message("3EB0AA").await.is_none());
    }
}
