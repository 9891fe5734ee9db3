use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 幂等缓存 (Idempotency Cache)
///
/// 同一个 `Idempotency-Key` 在 TTL 内重复提交时，直接返回第一次的结果。
/// 每次访问都会顺手清理过期条目；满了就淘汰最早写入的那条。
pub struct IdempotencyCache<V> {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> IdempotencyCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_at(key.into(), value, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut entries = self.lock();
        Self::evict_expired(&mut entries, self.ttl, now);
        entries.get(key).map(|(_, value)| value.clone())
    }

    fn insert_at(&self, key: String, value: V, now: Instant) {
        let mut entries = self.lock();
        Self::evict_expired(&mut entries, self.ttl, now);
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, (stored_at, _))| *stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, (now, value));
    }

    fn evict_expired(entries: &mut HashMap<String, (Instant, V)>, ttl: Duration, now: Instant) {
        entries.retain(|_, (stored_at, _)| now.saturating_duration_since(*stored_at) < ttl);
    }

    // 锁中毒时沿用内部数据
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Instant, V)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_cached_value_within_ttl() {
        let cache = IdempotencyCache::new(Duration::from_secs(60), 8);
        cache.insert("req-1", 42);
        assert_eq!(cache.get("req-1"), Some(42));
        assert_eq!(cache.get("req-2"), None);
    }

    #[test]
    fn expired_entries_are_evicted() {
        let cache = IdempotencyCache::new(Duration::from_secs(60), 8);
        let start = Instant::now();
        cache.insert_at("req-1".into(), "first", start);
        assert_eq!(cache.get_at("req-1", start + Duration::from_secs(59)), Some("first"));
        assert_eq!(cache.get_at("req-1", start + Duration::from_secs(60)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let cache = IdempotencyCache::new(Duration::from_secs(60), 2);
        let start = Instant::now();
        cache.insert_at("a".into(), 1, start);
        cache.insert_at("b".into(), 2, start + Duration::from_millis(1));
        cache.insert_at("c".into(), 3, start + Duration::from_millis(2));

        assert_eq!(cache.len(), 2);
        let later = start + Duration::from_millis(3);
        assert_eq!(cache.get_at("a", later), None);
        assert_eq!(cache.get_at("c", later), Some(3));
    }
}
