//! The shared-KV seam the quota manager speaks to.
//!
//! The production deployment points this at a networked KV; the bundled
//! [`MemoryKv`] keeps the same semantics (counters and member sets with
//! per-key TTLs, lazy expiry) in process memory.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Minimal KV surface for quota state. Only the quota manager writes
/// through this interface.
pub trait QuotaKv: Send + Sync {
    /// Atomically increment a counter key, creating it at 1.
    fn incr(&self, key: &str) -> u64;
    /// Set the TTL of a key. No-op if the key does not exist.
    fn expire(&self, key: &str, ttl_seconds: u64);
    /// Current counter value (0 when absent or expired).
    fn get_count(&self, key: &str) -> u64;
    /// Remove a key.
    fn delete(&self, key: &str);
    /// Add a member to a set key. Returns true if newly added.
    fn sadd(&self, key: &str, member: &str) -> bool;
    /// Remove a member from a set key.
    fn srem(&self, key: &str, member: &str);
    /// Cardinality of a set key (0 when absent or expired).
    fn scard(&self, key: &str) -> u64;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Value {
    Counter(u64),
    Set(HashSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |t| t <= now)
    }
}

/// In-process KV with per-key TTLs. Expired keys are dropped lazily on
/// access.
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn prune(entries: &mut HashMap<String, Entry>, key: &str) {
        let now = Utc::now();
        if entries.get(key).map_or(false, |e| e.expired(now)) {
            entries.remove(key);
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl QuotaKv for MemoryKv {
    fn incr(&self, key: &str) -> u64 {
        let mut entries = self.entries.lock();
        Self::prune(&mut entries, key);
        let entry = entries.entry(key.to_owned()).or_insert(Entry {
            value: Value::Counter(0),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Counter(n) => {
                *n += 1;
                *n
            }
            Value::Set(_) => {
                // Type clash: reset the key as a fresh counter.
                entry.value = Value::Counter(1);
                entry.expires_at = None;
                1
            }
        }
    }

    fn expire(&self, key: &str, ttl_seconds: u64) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Utc::now() + Duration::seconds(ttl_seconds as i64));
        }
    }

    fn get_count(&self, key: &str) -> u64 {
        let mut entries = self.entries.lock();
        Self::prune(&mut entries, key);
        match entries.get(key) {
            Some(Entry {
                value: Value::Counter(n),
                ..
            }) => *n,
            _ => 0,
        }
    }

    fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn sadd(&self, key: &str, member: &str) -> bool {
        let mut entries = self.entries.lock();
        Self::prune(&mut entries, key);
        let entry = entries.entry(key.to_owned()).or_insert(Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(set) => set.insert(member.to_owned()),
            Value::Counter(_) => {
                let mut set = HashSet::new();
                set.insert(member.to_owned());
                entry.value = Value::Set(set);
                entry.expires_at = None;
                true
            }
        }
    }

    fn srem(&self, key: &str, member: &str) {
        let mut entries = self.entries.lock();
        Self::prune(&mut entries, key);
        if let Some(Entry {
            value: Value::Set(set),
            ..
        }) = entries.get_mut(key)
        {
            set.remove(member);
            if set.is_empty() {
                entries.remove(key);
            }
        }
    }

    fn scard(&self, key: &str) -> u64 {
        let mut entries = self.entries.lock();
        Self::prune(&mut entries, key);
        match entries.get(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => set.len() as u64,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incr_counts_from_one() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("k"), 1);
        assert_eq!(kv.incr("k"), 2);
        assert_eq!(kv.get_count("k"), 2);
    }

    #[test]
    fn expired_counter_resets() {
        let kv = MemoryKv::new();
        kv.incr("k");
        // A TTL of zero expires immediately.
        kv.expire("k", 0);
        assert_eq!(kv.get_count("k"), 0);
        assert_eq!(kv.incr("k"), 1);
    }

    #[test]
    fn set_add_remove_card() {
        let kv = MemoryKv::new();
        assert!(kv.sadd("s", "a"));
        assert!(!kv.sadd("s", "a"));
        assert!(kv.sadd("s", "b"));
        assert_eq!(kv.scard("s"), 2);
        kv.srem("s", "a");
        assert_eq!(kv.scard("s"), 1);
        kv.srem("s", "b");
        assert_eq!(kv.scard("s"), 0);
    }

    #[test]
    fn srem_missing_member_is_noop() {
        let kv = MemoryKv::new();
        kv.srem("s", "ghost");
        assert_eq!(kv.scard("s"), 0);
    }

    #[test]
    fn delete_removes_key() {
        let kv = MemoryKv::new();
        kv.incr("k");
        kv.delete("k");
        assert_eq!(kv.get_count("k"), 0);
    }

    #[test]
    fn expired_set_is_empty() {
        let kv = MemoryKv::new();
        kv.sadd("s", "a");
        kv.expire("s", 0);
        assert_eq!(kv.scard("s"), 0);
    }
}
