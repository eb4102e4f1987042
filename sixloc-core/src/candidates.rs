//! Candidate access-point identifiers near a WAN MAC.

use std::collections::BTreeMap;

use crate::mac::MacAddress;

/// Signed distance between a probed BSSID and the literal WAN MAC.
pub type CandidateOffset = i8;

pub const MIN_OFFSET: CandidateOffset = -8;
pub const MAX_OFFSET: CandidateOffset = 8;

const MAC_SPACE: i64 = 1 << 48;

/// One BSSID string per offset in `[MIN_OFFSET, MAX_OFFSET]`.
///
/// Arithmetic wraps across the 48-bit boundary.
pub fn generate_candidates(mac: &MacAddress) -> BTreeMap<CandidateOffset, String> {
    let base = mac.to_u64() as i64;
    (MIN_OFFSET..=MAX_OFFSET)
        .map(|offset| {
            let value = (base + i64::from(offset)).rem_euclid(MAC_SPACE) as u64;
            (offset, MacAddress::from_u64(value).to_string())
        })
        .collect()
}
