//! Sharded LRU cache keyed by `(fqdn, qtype)`.

use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::types::{CacheEntry, Question};

const DEFAULT_SHARDS: usize = 16;

struct Shard {
    map: Mutex<LruCache<Question, CacheEntry>>,
}

/// Fixed shard count, sized the way a low-contention in-memory cache of
/// this scale is typically sharded: enough to spread lock contention across
/// cores without per-entry bookkeeping overhead.
pub struct Cache {
    shards: Vec<Shard>,
    min_ttl: Duration,
    max_ttl: Duration,
}

fn shard_index(q: &Question, n: usize) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    q.hash(&mut hasher);
    (hasher.finish() as usize) % n
}

impl Cache {
    pub fn new(max_entries: usize, min_ttl: Duration, max_ttl: Duration) -> Self {
        let shard_count = DEFAULT_SHARDS.min(max_entries.max(1));
        let per_shard = (max_entries / shard_count.max(1)).max(1);
        let cap = std::num::NonZeroUsize::new(per_shard).unwrap();
        let shards = (0..shard_count)
            .map(|_| Shard {
                map: Mutex::new(LruCache::new(cap)),
            })
            .collect();
        Self { shards, min_ttl, max_ttl }
    }

    fn shard(&self, q: &Question) -> &Shard {
        &self.shards[shard_index(q, self.shards.len())]
    }

    /// Returns a hit only if unexpired; an expired entry is evicted before
    /// returning `None`.
    pub fn get(&self, q: &Question) -> Option<CacheEntry> {
        let now = Instant::now();
        let shard = self.shard(q);
        let mut map = shard.map.lock();
        match map.get(q) {
            Some(entry) if !entry.is_expired(now) => Some(entry.clone()),
            Some(_) => {
                map.pop(q);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, q: Question, message: hickory_proto::op::Message, min_rr_ttl: u32) {
        let effective_ttl = Duration::from_secs(
            (min_rr_ttl as u64).clamp(self.min_ttl.as_secs(), self.max_ttl.as_secs().max(self.min_ttl.as_secs())),
        );
        let entry = CacheEntry {
            message,
            stored_at: Instant::now(),
            effective_ttl,
        };
        let shard = self.shard(&q);
        shard.map.lock().put(q, entry);
    }

    pub fn invalidate(&self, q: &Question) {
        self.shard(q).map.lock().pop(q);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.lock().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Message;
    use hickory_proto::rr::RecordType;

    fn msg() -> Message {
        Message::new()
    }

    #[test]
    fn miss_then_hit_then_expiry() {
        let cache = Cache::new(100, Duration::from_secs(0), Duration::from_secs(3600));
        let q = Question::new("foo.example.com", RecordType::A);
        assert!(cache.get(&q).is_none());
        cache.put(q.clone(), msg(), 30);
        let entry = cache.get(&q).expect("hit after put");
        assert_eq!(entry.effective_ttl, Duration::from_secs(30));
    }

    #[test]
    fn ttl_clamped_to_min_and_max() {
        let cache = Cache::new(100, Duration::from_secs(30), Duration::from_secs(3600));
        let low = Question::new("low.example.com", RecordType::A);
        cache.put(low.clone(), msg(), 0);
        assert_eq!(cache.get(&low).unwrap().effective_ttl, Duration::from_secs(30));

        let high = Question::new("high.example.com", RecordType::A);
        let cache2 = Cache::new(100, Duration::from_secs(0), Duration::from_secs(3600));
        cache2.put(high.clone(), msg(), 86_400);
        assert_eq!(cache2.get(&high).unwrap().effective_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = Cache::new(100, Duration::from_secs(0), Duration::from_secs(3600));
        let q = Question::new("bar.example.com", RecordType::A);
        cache.put(q.clone(), msg(), 60);
        cache.invalidate(&q);
        assert!(cache.get(&q).is_none());
    }

    #[test]
    fn distinct_qtype_is_distinct_key() {
        let cache = Cache::new(100, Duration::from_secs(0), Duration::from_secs(3600));
        let a = Question::new("dual.example.com", RecordType::A);
        let aaaa = Question::new("dual.example.com", RecordType::AAAA);
        cache.put(a.clone(), msg(), 60);
        assert!(cache.get(&aaaa).is_none());
        assert!(cache.get(&a).is_some());
    }
}
