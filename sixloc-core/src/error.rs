use thiserror::Error;

/// Failures while turning an input address into a WAN MAC.
///
/// These abort only the single address being decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("{address} is not an EUI-64 derived address")]
    NotEui64 { address: String },

    #[error("cannot parse '{input}' as an address")]
    InvalidAddress { input: String },
}

/// Failures reported by a geolocation oracle.
///
/// The orchestrator folds every variant into "no hit" for the candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("oracle unavailable: HTTP status {status}")]
    Unavailable { status: u16 },

    #[error("oracle timed out")]
    Timeout,

    #[error("oracle transport error: {0}")]
    Transport(String),

    #[error("malformed oracle response: {0}")]
    MalformedResponse(String),

    #[error("oracle rejected query: {0}")]
    Rejected(String),
}
