//! Bounded, write-expiring cache of BSSID lookups.

use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::candidates::CandidateOffset;
use crate::geo::Coordinate;
use crate::resolver::LocationHit;

pub const DEFAULT_MAX_ENTRIES: u64 = 1_000_000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Cheap to clone; clones share the same storage.
#[derive(Clone)]
pub struct QueryCache {
    inner: Cache<String, Coordinate>,
}

impl QueryCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Reads do not extend the entry's lifetime.
    pub async fn get(&self, bssid: &str) -> Option<Coordinate> {
        self.inner.get(bssid).await
    }

    pub async fn get_hit(&self, bssid: &str, offset: CandidateOffset) -> Option<LocationHit> {
        self.get(bssid)
            .await
            .map(|coord| LocationHit::new(coord, offset))
    }

    /// Inserts or overwrites. `(0, 0)` is never stored.
    pub async fn put(&self, bssid: &str, coord: Coordinate) {
        if coord.is_null_island() {
            debug!(bssid, "refusing to cache null coordinate");
            return;
        }
        self.inner.insert(bssid.to_string(), coord).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Applies pending evictions and expirations.
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TEST_KEY: &str = "aa:bb:cc:dd:ee:ff";

    #[tokio::test]
    async fn hit_takes_offset_of_current_lookup() {
        let cache = QueryCache::default();
        cache.put(TEST_KEY, Coordinate::new(1.0, 2.0)).await;

        let hit = cache.get_hit(TEST_KEY, -3).await.unwrap();
        assert_eq!(hit.coordinate(), Coordinate::new(1.0, 2.0));
        assert_eq!(hit.offset, -3);

        let again = cache.get_hit(TEST_KEY, 7).await.unwrap();
        assert_eq!(again.offset, 7);
        assert!(cache.get_hit("00:00:00:00:00:01", 0).await.is_none());
    }

    #[tokio::test]
    async fn put_overwrites_existing_entry() {
        let cache = QueryCache::default();
        cache.put(TEST_KEY, Coordinate::new(1.0, 2.0)).await;
        cache.put(TEST_KEY, Coordinate::new(3.0, 4.0)).await;
        assert_eq!(cache.get(TEST_KEY).await, Some(Coordinate::new(3.0, 4.0)));
    }

    #[tokio::test]
    async fn null_coordinates_are_not_cached() {
        let cache = QueryCache::default();
        cache.put(TEST_KEY, Coordinate::new(0.0, 0.0)).await;
        assert_eq!(cache.get(TEST_KEY).await, None);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = QueryCache::new(16, Duration::from_millis(50));
        cache.put(TEST_KEY, Coordinate::new(1.0, 2.0)).await;
        assert!(cache.get(TEST_KEY).await.is_some());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.get(TEST_KEY).await.is_none());
    }

    #[tokio::test]
    async fn size_stays_bounded() {
        let cache = QueryCache::new(4, DEFAULT_TTL);
        for i in 0..64u32 {
            cache
                .put(&format!("00:00:00:00:00:{:02x}", i), Coordinate::new(1.0, f64::from(i) + 1.0))
                .await;
        }
        cache.sync().await;
        assert!(cache.entry_count() <= 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_are_all_visible() {
        let cache = Arc::new(QueryCache::default());
        let mut handles = Vec::new();
        for i in 0..32u32 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                let key = format!("00:00:00:00:01:{:02x}", i);
                cache.put(&key, Coordinate::new(10.0, f64::from(i) + 1.0)).await;
                cache.get(&key).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let got = handle.await.unwrap().unwrap();
            assert_eq!(got, Coordinate::new(10.0, i as f64 + 1.0));
        }
    }
}
