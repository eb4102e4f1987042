//! Boundary to the external wireless-geolocation service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::warn;

use crate::error::OracleError;
use crate::geo::Coordinate;

/// Resolves a BSSID to the coordinate the service has on record.
///
/// `Ok(None)` means the service answered but knows no usable location.
#[async_trait]
pub trait GeoOracle: Send + Sync {
    async fn lookup(&self, bssid: &str) -> Result<Option<Coordinate>, OracleError>;
}

/// Validated form of one oracle response body.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleReply {
    pub success: bool,
    pub coordinate: Option<Coordinate>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    results: Option<RawResults>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawResults {
    One(RawNetwork),
    Many(Vec<RawNetwork>),
}

#[derive(Debug, Deserialize)]
struct RawNetwork {
    trilat: Option<f64>,
    trilong: Option<f64>,
}

impl RawNetwork {
    fn coordinate(&self) -> Option<Coordinate> {
        match (self.trilat, self.trilong) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        }
    }
}

impl OracleReply {
    pub fn parse(body: &str) -> Result<Self, OracleError> {
        let raw: RawReply = serde_json::from_str(body)
            .map_err(|e| OracleError::MalformedResponse(e.to_string()))?;
        let coordinate = match raw.results {
            Some(RawResults::One(net)) => net.coordinate(),
            Some(RawResults::Many(nets)) => nets.iter().find_map(RawNetwork::coordinate),
            None => None,
        };
        Ok(Self {
            success: raw.success,
            coordinate,
            message: raw.message,
        })
    }

    /// Unsuccessful replies are errors; a missing or `(0, 0)` coordinate is
    /// "not found".
    pub fn into_outcome(self) -> Result<Option<Coordinate>, OracleError> {
        if !self.success {
            return Err(OracleError::Rejected(
                self.message.unwrap_or_else(|| "no message".to_string()),
            ));
        }
        Ok(self.coordinate.filter(|c| !c.is_null_island()))
    }
}

/// HTTP client for the WiGLE network detail endpoint.
pub struct WigleClient {
    client: Client,
    base_url: String,
    auth: String,
}

impl WigleClient {
    pub fn new(
        base_url: &str,
        auth: &str,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, OracleError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: auth.to_string(),
        })
    }
}

pub(crate) fn netid(bssid: &str) -> String {
    bssid.replace(':', "")
}

#[async_trait]
impl GeoOracle for WigleClient {
    async fn lookup(&self, bssid: &str) -> Result<Option<Coordinate>, OracleError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("netid", netid(bssid))])
            .header(AUTHORIZATION, &self.auth)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            if status == StatusCode::UNAUTHORIZED {
                warn!(bssid, "oracle rejected credentials; check the API token");
            }
            return Err(OracleError::Unavailable {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(map_transport)?;
        OracleReply::parse(&body)?.into_outcome()
    }
}

fn map_transport(err: reqwest::Error) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout
    } else {
        OracleError::Transport(err.to_string())
    }
}
