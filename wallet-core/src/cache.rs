use std::time::{Duration, Instant};

/// Single-value cache with an explicit time-to-live.
///
/// Stale values are kept so callers can fall back to them when a refresh fails.
#[derive(Debug, Clone)]
pub struct TtlCache<T> {
    ttl: Duration,
    entry: Option<(T, Instant)>,
}

impl<T> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn put(&mut self, value: T) {
        self.entry = Some((value, Instant::now()));
    }

    pub fn is_fresh(&self) -> bool {
        self.entry
            .as_ref()
            .is_some_and(|(_, stored_at)| stored_at.elapsed() < self.ttl)
    }

    /// The cached value if it is still within its TTL.
    pub fn fresh(&self) -> Option<&T> {
        if self.is_fresh() {
            self.entry.as_ref().map(|(value, _)| value)
        } else {
            None
        }
    }

    /// The cached value regardless of age.
    pub fn stale(&self) -> Option<&T> {
        self.entry.as_ref().map(|(value, _)| value)
    }

    pub fn age(&self) -> Option<Duration> {
        self.entry.as_ref().map(|(_, stored_at)| stored_at.elapsed())
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_within_ttl() {
        let mut cache = TtlCache::new(Duration::from_secs(30));
        assert!(cache.fresh().is_none());
        cache.put(7);
        assert!(cache.is_fresh());
        assert_eq!(cache.fresh(), Some(&7));
        assert!(cache.age().unwrap() < Duration::from_secs(30));
    }

    #[test]
    fn expired_value_is_only_stale() {
        let mut cache = TtlCache::new(Duration::ZERO);
        cache.put("old");
        assert!(!cache.is_fresh());
        assert_eq!(cache.fresh(), None);
        assert_eq!(cache.stale(), Some(&"old"));

        cache.invalidate();
        assert_eq!(cache.stale(), None);
    }
}
