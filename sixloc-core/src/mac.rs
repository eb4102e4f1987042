use std::fmt;
use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

pub const MAC_LEN: usize = 6;
pub const IID_LEN: usize = 8;
pub const IPV6_LEN: usize = 16;

const EUI64_MARKER: [u8; 2] = [0xff, 0xfe];
const UNIVERSAL_LOCAL_BIT: u8 = 0x02;

/// A 48-bit link-layer address, displayed as `aa:bb:cc:dd:ee:ff`.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MacAddress(pub [u8; MAC_LEN]);

impl MacAddress {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let arr: [u8; MAC_LEN] = bytes.try_into().map_err(|_| DecodeError::InvalidLength {
            expected: MAC_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Parse `aa:bb:cc:dd:ee:ff` (case-insensitive).
    pub fn parse(s: &str) -> Result<Self, DecodeError> {
        let invalid = || DecodeError::InvalidAddress { input: s.to_owned() };
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != MAC_LEN {
            return Err(invalid());
        }
        let mut bytes = [0u8; MAC_LEN];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(invalid());
            }
            bytes[i] = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; MAC_LEN] {
        &self.0
    }

    /// The MAC read as an unsigned big-endian 48-bit integer.
    pub fn to_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    /// Keeps the low 48 bits of `value`.
    pub fn from_u64(value: u64) -> Self {
        let be = value.to_be_bytes();
        let mut bytes = [0u8; MAC_LEN];
        bytes.copy_from_slice(&be[2..]);
        Self(bytes)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({self})")
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

impl TryFrom<String> for MacAddress {
    type Error = DecodeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

/// The low 64 bits of an IPv6 address.
#[derive(Clone, Copy, Hash, Eq, PartialEq)]
pub struct InterfaceIdentifier(pub [u8; IID_LEN]);

impl InterfaceIdentifier {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let arr: [u8; IID_LEN] = bytes.try_into().map_err(|_| DecodeError::InvalidLength {
            expected: IID_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn from_ipv6(addr: &Ipv6Addr) -> Self {
        let octets = addr.octets();
        let mut bytes = [0u8; IID_LEN];
        bytes.copy_from_slice(&octets[IPV6_LEN - IID_LEN..]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IID_LEN] {
        &self.0
    }

    pub fn wan_mac(&self) -> MacAddress {
        let b = self.0;
        MacAddress([b[0] ^ UNIVERSAL_LOCAL_BIT, b[1], b[2], b[5], b[6], b[7]])
    }
}

/// Four colon-separated 16-bit groups, e.g. `0211:22ff:fe33:4455`.
impl fmt::Display for InterfaceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}{:02x}:{:02x}{:02x}:{:02x}{:02x}:{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

impl fmt::Debug for InterfaceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceIdentifier({self})")
    }
}

/// True iff the 16-byte address carries the `ff:fe` marker at bytes 8 and 9.
pub fn is_eui64(address: &[u8]) -> Result<bool, DecodeError> {
    if address.len() != IPV6_LEN {
        return Err(DecodeError::InvalidLength {
            expected: IPV6_LEN,
            actual: address.len(),
        });
    }
    Ok(address[8..10] == EUI64_MARKER)
}

/// Reverse the EUI-64 embedding of an 8-byte interface identifier.
pub fn extract_mac(iid: &[u8]) -> Result<MacAddress, DecodeError> {
    Ok(InterfaceIdentifier::from_bytes(iid)?.wan_mac())
}
