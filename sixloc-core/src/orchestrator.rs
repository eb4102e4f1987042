use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::QueryCache;
use crate::candidates::{generate_candidates, CandidateOffset};
use crate::mac::MacAddress;
use crate::oracle::GeoOracle;
use crate::resolver::{cluster_and_select, ClusterParams, LocationHit};

pub const HIGH_PROBABILITY_OFFSETS: [CandidateOffset; 3] = [-1, 5, 0];
pub const LOW_PROBABILITY_OFFSETS: [CandidateOffset; 14] =
    [3, -2, -8, 1, 6, 2, -4, -3, -5, -6, -7, 4, 7, 8];

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// The last stage that ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    First,
    Second,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedOutcome {
    /// Stage-one hits followed by stage-two hits, each in priority order.
    pub hits: Vec<LocationHit>,
    pub stage: Stage,
}

pub struct StagedQuery {
    oracle: Arc<dyn GeoOracle>,
    cache: QueryCache,
    lookup_timeout: Duration,
}

impl StagedQuery {
    pub fn new(oracle: Arc<dyn GeoOracle>, cache: QueryCache) -> Self {
        Self {
            oracle,
            cache,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Every stage joins all of its lookups before deciding. Stage two runs
    /// only when the 1 km / 2 point rule finds nothing in stage one.
    pub async fn run(&self, wan_mac: &MacAddress) -> StagedOutcome {
        let candidates = generate_candidates(wan_mac);

        let mut hits = self.run_stage(&candidates, &HIGH_PROBABILITY_OFFSETS).await;
        if cluster_and_select(&hits, ClusterParams::default()).is_some() {
            info!(%wan_mac, hits = hits.len(), "resolved after stage one");
            return StagedOutcome {
                hits,
                stage: Stage::First,
            };
        }

        debug!(%wan_mac, hits = hits.len(), "nothing resolved after stage one; widening");
        hits.extend(self.run_stage(&candidates, &LOW_PROBABILITY_OFFSETS).await);
        info!(%wan_mac, hits = hits.len(), "finished stage two");
        StagedOutcome {
            hits,
            stage: Stage::Second,
        }
    }

    async fn run_stage(
        &self,
        candidates: &BTreeMap<CandidateOffset, String>,
        offsets: &[CandidateOffset],
    ) -> Vec<LocationHit> {
        let mut set = JoinSet::new();
        for (slot, offset) in offsets.iter().copied().enumerate() {
            let Some(bssid) = candidates.get(&offset).cloned() else {
                continue;
            };
            let oracle = Arc::clone(&self.oracle);
            let cache = self.cache.clone();
            let timeout = self.lookup_timeout;
            set.spawn(async move {
                let hit = lookup_candidate(oracle.as_ref(), &cache, timeout, &bssid, offset).await;
                (slot, hit)
            });
        }

        let mut slots: Vec<Option<LocationHit>> = vec![None; offsets.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, hit)) => slots[slot] = hit,
                Err(err) => warn!(error = %err, "lookup task failed"),
            }
        }
        slots.into_iter().flatten().collect()
    }
}

async fn lookup_candidate(
    oracle: &dyn GeoOracle,
    cache: &QueryCache,
    timeout: Duration,
    bssid: &str,
    offset: CandidateOffset,
) -> Option<LocationHit> {
    if let Some(hit) = cache.get_hit(bssid, offset).await {
        debug!(bssid, offset, "cache hit");
        return Some(hit);
    }

    match tokio::time::timeout(timeout, oracle.lookup(bssid)).await {
        Ok(Ok(Some(coord))) if !coord.is_null_island() => {
            cache.put(bssid, coord).await;
            Some(LocationHit::new(coord, offset))
        }
        Ok(Ok(_)) => {
            debug!(bssid, offset, "no location on record");
            None
        }
        Ok(Err(err)) => {
            warn!(bssid, offset, error = %err, "lookup failed");
            None
        }
        Err(_) => {
            warn!(bssid, offset, timeout_ms = timeout.as_millis() as u64, "lookup timed out");
            None
        }
    }
}
