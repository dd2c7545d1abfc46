//! Time-windowed deduplication of webhook delivery ids.
//!
//! GitHub redelivers webhooks on demand and occasionally on its own; the
//! delivery id identifies the original delivery across redeliveries. Seen
//! ids are retained for a TTL window and pruned on every check, so growth
//! is bounded by the redelivery window rather than by count.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

pub const DELIVERY_TTL: Duration = Duration::from_secs(60 * 60);

pub struct DeliveryCache {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl Default for DeliveryCache {
    fn default() -> Self { Self::new() }
}

impl DeliveryCache {
    pub fn new() -> Self { Self::with_ttl(DELIVERY_TTL) }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, seen: Mutex::new(HashMap::new()) }
    }

    /// Prune expired entries, then check membership. Does not record the id;
    /// call `mark` only after the job is safely enqueued, so a failed
    /// enqueue does not poison future redeliveries.
    pub fn is_duplicate(&self, delivery_id: &str) -> bool {
        self.is_duplicate_at(delivery_id, Instant::now())
    }

    pub fn is_duplicate_at(&self, delivery_id: &str, now: Instant) -> bool {
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|_, first_seen| now.duration_since(*first_seen) < self.ttl);
        seen.contains_key(delivery_id)
    }

    pub fn mark(&self, delivery_id: &str) { self.mark_at(delivery_id, Instant::now()) }

    pub fn mark_at(&self, delivery_id: &str, seen_at: Instant) {
        self.seen.lock().unwrap().insert(delivery_id.to_string(), seen_at);
    }

    pub fn len(&self) -> usize { self.seen.lock().unwrap().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_within_ttl() {
        let cache = DeliveryCache::new();
        let now = Instant::now();
        assert!(!cache.is_duplicate_at("delivery-1", now));
        cache.mark_at("delivery-1", now);
        assert!(cache.is_duplicate_at("delivery-1", now + Duration::from_secs(10)));
        assert!(!cache.is_duplicate_at("delivery-2", now + Duration::from_secs(10)));
    }

    #[test]
    fn test_accepted_again_after_ttl() {
        let cache = DeliveryCache::with_ttl(Duration::from_secs(60));
        let now = Instant::now();
        cache.mark_at("delivery-1", now);
        assert!(cache.is_duplicate_at("delivery-1", now + Duration::from_secs(59)));
        assert!(!cache.is_duplicate_at("delivery-1", now + Duration::from_secs(61)));
    }

    #[test]
    fn test_pruning_bounds_growth() {
        let cache = DeliveryCache::with_ttl(Duration::from_secs(60));
        let now = Instant::now();
        for i in 0..100 {
            cache.mark_at(&format!("delivery-{i}"), now);
        }
        assert_eq!(cache.len(), 100);
        assert!(!cache.is_duplicate_at("other", now + Duration::from_secs(61)));
        assert!(cache.is_empty());
    }
}
