//! In-memory session cache for unlocked master keys.
//!
//! Cached keys live only in process memory, expire after a TTL, and are
//! zeroized when evicted. Clearing is synchronous: once `remove` or
//! `clear` returns, the material is gone and later reads miss.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use strongroom_crypto::MasterKey;

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15 * 60);

struct CachedKey {
    key: MasterKey,
    inserted_at: Instant,
}

/// TTL-bounded cache mapping user ids to unlocked master keys.
pub struct SessionCache {
    entries: RwLock<HashMap<String, CachedKey>>,
    ttl: Duration,
}

impl SessionCache {
    /// Create a cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up a user's cached key.
    ///
    /// Expired entries are evicted on access and count as a miss.
    pub fn get(&self, user_id: &str) -> Option<MasterKey> {
        {
            let entries = self.entries.read().unwrap();
            match entries.get(user_id) {
                Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                    return Some(entry.key.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Entry exists but has expired; evict under the write lock.
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get(user_id) {
            if entry.inserted_at.elapsed() >= self.ttl {
                entries.remove(user_id);
            } else {
                return Some(entry.key.clone());
            }
        }
        None
    }

    /// Cache a key for a user, replacing any previous entry.
    pub fn insert(&self, user_id: &str, key: MasterKey) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            user_id.to_string(),
            CachedKey {
                key,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove a user's entry. The key is zeroized on drop.
    pub fn remove(&self, user_id: &str) {
        let mut entries = self.entries.write().unwrap();
        entries.remove(user_id);
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap();
        entries.clear();
    }

    /// Number of live entries, counting expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> MasterKey {
        MasterKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_insert_and_get() {
        let cache = SessionCache::default();
        cache.insert("alice", key(1));

        let hit = cache.get("alice").unwrap();
        assert_eq!(hit.as_bytes(), &[1u8; 32]);
        assert!(cache.get("bob").is_none());
    }

    #[test]
    fn test_replace_existing_entry() {
        let cache = SessionCache::default();
        cache.insert("alice", key(1));
        cache.insert("alice", key(2));

        assert_eq!(cache.get("alice").unwrap().as_bytes(), &[2u8; 32]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_misses_and_evicts() {
        let cache = SessionCache::new(Duration::from_millis(10));
        cache.insert("alice", key(1));

        std::thread::sleep(Duration::from_millis(25));

        assert!(cache.get("alice").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_is_immediate() {
        let cache = SessionCache::default();
        cache.insert("alice", key(1));
        cache.remove("alice");

        assert!(cache.get("alice").is_none());
    }

    #[test]
    fn test_clear_wipes_all_users() {
        let cache = SessionCache::default();
        cache.insert("alice", key(1));
        cache.insert("bob", key(2));

        cache.clear();

        assert!(cache.get("alice").is_none());
        assert!(cache.get("bob").is_none());
    }
}
