//! TTL cache slots for slow-changing SDK data.

use std::time::Duration;

use tokio::time::Instant;

/// One cached value with its fetch time.
///
/// Invalidation keeps the value around as a stale fallback but forces the
/// next read to refetch.
#[derive(Debug)]
pub(crate) struct TtlCache<T> {
    ttl: Duration,
    value: Option<T>,
    fetched_at: Option<Instant>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            value: None,
            fetched_at: None,
        }
    }

    /// The value if it was fetched less than one TTL ago.
    pub fn fresh(&self, now: Instant) -> Option<T> {
        let fetched_at = self.fetched_at?;
        if now.saturating_duration_since(fetched_at) < self.ttl {
            self.value.clone()
        } else {
            None
        }
    }

    /// The last value regardless of age.
    pub fn stale(&self) -> Option<T> {
        self.value.clone()
    }

    pub fn store(&mut self, value: T, now: Instant) {
        self.value = Some(value);
        self.fetched_at = Some(now);
    }

    pub fn invalidate(&mut self) {
        self.fetched_at = None;
    }

    pub fn clear(&mut self) {
        self.value = None;
        self.fetched_at = None;
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_until_ttl_elapses() {
        let start = Instant::now();
        let mut cache = TtlCache::new(Duration::from_secs(5));
        assert!(cache.fresh(start).is_none());

        cache.store(vec![1], start);
        assert_eq!(cache.fresh(start + Duration::from_secs(4)), Some(vec![1]));
        assert!(cache.fresh(start + Duration::from_secs(5)).is_none());
        assert_eq!(cache.stale(), Some(vec![1]));
    }

    #[test]
    fn invalidate_keeps_stale_value() {
        let now = Instant::now();
        let mut cache = TtlCache::new(Duration::from_secs(60));
        cache.store("x", now);
        cache.invalidate();
        assert!(cache.fresh(now).is_none());
        assert_eq!(cache.stale(), Some("x"));

        cache.clear();
        assert!(cache.is_empty());
    }
}
