use std::net::Ipv6Addr;
use std::sync::Arc;

use tracing::debug;

use crate::cache::QueryCache;
use crate::error::DecodeError;
use crate::mac::{is_eui64, InterfaceIdentifier, MacAddress};
use crate::oracle::GeoOracle;
use crate::orchestrator::{Stage, StagedQuery};
use crate::resolver::{cluster_and_select, ClusterParams, LocationHit};
use crate::store::Landmark;
use crate::Config;

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub wan_mac: MacAddress,
    pub interface_id: InterfaceIdentifier,
    pub hit: LocationHit,
    pub stage: Stage,
    pub observations: usize,
}

impl Resolved {
    pub fn into_landmark(self, ip: &Ipv6Addr, now_ms: i64) -> Landmark {
        Landmark {
            ip: ip.to_string(),
            interface_id: self.interface_id.to_string(),
            wan_mac: self.wan_mac.to_string(),
            latitude: self.hit.latitude,
            longitude: self.hit.longitude,
            source_offset: self.hit.offset,
            is_reliable: false,
            is_dynamic: false,
            created_at_ms: now_ms,
            last_updated_ms: None,
        }
    }
}

pub fn parse_address(input: &str) -> Result<Ipv6Addr, DecodeError> {
    input
        .trim()
        .parse::<Ipv6Addr>()
        .map_err(|_| DecodeError::InvalidAddress {
            input: input.trim().to_string(),
        })
}

/// Interface identifier and WAN MAC of an EUI-64 derived address.
pub fn decode(addr: &Ipv6Addr) -> Result<(InterfaceIdentifier, MacAddress), DecodeError> {
    if !is_eui64(&addr.octets())? {
        return Err(DecodeError::NotEui64 {
            address: addr.to_string(),
        });
    }
    let iid = InterfaceIdentifier::from_ipv6(addr);
    Ok((iid, iid.wan_mac()))
}

pub struct Geolocator {
    query: StagedQuery,
    params: ClusterParams,
}

impl Geolocator {
    pub fn new(query: StagedQuery, params: ClusterParams) -> Self {
        Self { query, params }
    }

    pub fn from_config(cfg: &Config, oracle: Arc<dyn GeoOracle>) -> Self {
        let cache = QueryCache::new(cfg.cache_max_entries, cfg.cache_ttl());
        // Stage one always stops on the default 1 km / 2 point rule; the
        // configured parameters only drive the final pick.
        let query = StagedQuery::new(oracle, cache).with_lookup_timeout(cfg.lookup_timeout());
        Self::new(query, cfg.cluster_params())
    }

    pub fn cache(&self) -> &QueryCache {
        self.query.cache()
    }

    /// `Ok(None)` when no coordinate could be resolved, which is a normal
    /// outcome.
    pub async fn locate(&self, addr: &Ipv6Addr) -> Result<Option<Resolved>, DecodeError> {
        let (interface_id, wan_mac) = decode(addr)?;
        let outcome = self.query.run(&wan_mac).await;
        let observations = outcome.hits.len();
        let Some(hit) = cluster_and_select(&outcome.hits, self.params) else {
            debug!(%addr, %wan_mac, observations, "unresolved");
            return Ok(None);
        };
        Ok(Some(Resolved {
            wan_mac,
            interface_id,
            hit,
            stage: outcome.stage,
            observations,
        }))
    }
}
