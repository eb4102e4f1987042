use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub mod cache;
pub mod candidates;
pub mod error;
pub mod geo;
pub mod locator;
pub mod mac;
pub mod oracle;
pub mod orchestrator;
pub mod resolver;
pub mod store;

pub use cache::QueryCache;
pub use candidates::{generate_candidates, CandidateOffset, MAX_OFFSET, MIN_OFFSET};
pub use error::{DecodeError, OracleError};
pub use geo::{haversine_km, Coordinate, EARTH_RADIUS_KM};
pub use locator::{decode, parse_address, Geolocator, Resolved};
pub use mac::{extract_mac, is_eui64, InterfaceIdentifier, MacAddress};
pub use oracle::{GeoOracle, OracleReply, WigleClient};
pub use orchestrator::{Stage, StagedOutcome, StagedQuery};
pub use resolver::{cluster, cluster_and_select, ClusterParams, LocationHit};
pub use store::{Landmark, LandmarkStore, Rotation};

pub const DEFAULT_ORACLE_URL: &str = "https://api.wigle.net/api/v2/network/detail";
pub const DEFAULT_API_TOKEN_ENV: &str = "SIXLOC_ORACLE_TOKEN";
pub const MAX_CACHE_TTL_DAYS: u64 = 3650;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_oracle_url")]
    pub oracle_url: String,
    #[serde(default = "default_api_token_env")]
    pub api_token_env: String,
    pub hitlist_path: String,
    pub landmarks_path: String,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: u64,
    #[serde(default = "default_cache_ttl_days")]
    pub cache_ttl_days: u64,
    #[serde(default = "default_epsilon_km")]
    pub epsilon_km: f64,
    #[serde(default = "default_min_points")]
    pub min_points: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let data = fs::read(path)?;
        let cfg = serde_json::from_slice(&data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(cfg)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_days.saturating_mul(SECS_PER_DAY))
    }

    pub fn cluster_params(&self) -> ClusterParams {
        ClusterParams {
            epsilon_km: self.epsilon_km,
            min_points: self.min_points,
        }
    }
}

pub fn now_unix_ms() -> i64 {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (dur.as_secs() as i64) * 1000 + (dur.subsec_millis() as i64)
}

fn default_oracle_url() -> String {
    DEFAULT_ORACLE_URL.to_string()
}

fn default_api_token_env() -> String {
    DEFAULT_API_TOKEN_ENV.to_string()
}

fn default_lookup_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_cache_max_entries() -> u64 {
    cache::DEFAULT_MAX_ENTRIES
}

fn default_cache_ttl_days() -> u64 {
    30
}

fn default_epsilon_km() -> f64 {
    resolver::DEFAULT_EPSILON_KM
}

fn default_min_points() -> usize {
    resolver::DEFAULT_MIN_POINTS
}

fn default_max_in_flight() -> usize {
    8
}

fn default_checkpoint_every() -> usize {
    100
}
