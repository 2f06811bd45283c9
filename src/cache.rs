use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Duration, Utc};

use crate::{domain::Changelist, gerrit::FetchError};

/// What a single host produced on its last fetch attempt.
pub type HostOutcome = Result<Vec<Changelist>, FetchError>;

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub fetched_at: DateTime<Utc>,
    pub outcome: HostOutcome,
}

/// Remembers the last outcome per host, successes and failures alike, for a
/// fixed freshness window. One entry per host, overwritten in place.
pub struct ResultCache {
    freshness: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new(freshness: Duration) -> Self {
        Self {
            freshness,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached outcome for `host` if it is younger than the
    /// freshness window at `now`.
    pub fn lookup(&self, host: &str, now: DateTime<Utc>) -> Option<HostOutcome> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(host)
            .filter(|entry| now - entry.fetched_at < self.freshness)
            .map(|entry| entry.outcome.clone())
    }

    pub fn store(&self, host: &str, now: DateTime<Utc>, outcome: HostOutcome) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            host.to_owned(),
            CacheEntry {
                fetched_at: now,
                outcome,
            },
        );
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::{Category, fixtures};

    const HOST: &str = "https://a-review.example.com";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn lookup_misses_when_nothing_was_stored() {
        let cache = ResultCache::new(Duration::minutes(1));
        assert!(cache.lookup(HOST, t0()).is_none());
    }

    #[test]
    fn lookup_hits_inside_window_and_expires_at_boundary() {
        let cache = ResultCache::new(Duration::minutes(1));
        cache.store(HOST, t0(), Ok(vec![fixtures::cl("I1", HOST, Category::Stale)]));

        let hit = cache.lookup(HOST, t0() + Duration::seconds(59));
        assert_eq!(hit.map(|outcome| outcome.unwrap().len()), Some(1));
        assert!(cache.lookup(HOST, t0() + Duration::minutes(1)).is_none());
    }

    #[test]
    fn failures_are_cached_too() {
        let cache = ResultCache::new(Duration::minutes(1));
        cache.store(HOST, t0(), Err(FetchError::Network("timeout".into())));
        assert_eq!(
            cache.lookup(HOST, t0()),
            Some(Err(FetchError::Network("timeout".into())))
        );
    }

    #[test]
    fn store_overwrites_previous_entry() {
        let cache = ResultCache::new(Duration::minutes(1));
        cache.store(HOST, t0(), Err(FetchError::Network("timeout".into())));
        cache.store(HOST, t0() + Duration::seconds(30), Ok(Vec::new()));

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.lookup(HOST, t0() + Duration::seconds(80)),
            Some(Ok(Vec::new()))
        );
    }
}
