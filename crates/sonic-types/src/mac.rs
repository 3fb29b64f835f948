//! MAC address type used for bonded interface addresses.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// Bond interfaces take their address from configuration as a string; this
/// type normalizes the accepted spellings to the lowercase colon form the
/// kernel reports back.
///
/// # Examples
///
/// ```
/// use sonic_types::MacAddress;
///
/// let mac: MacAddress = "00:1B:21:AA:00:01".parse().unwrap();
/// assert_eq!(mac.to_string(), "00:1b:21:aa:00:01");
///
/// let dashed: MacAddress = "00-1b-21-aa-00-01".parse().unwrap();
/// assert_eq!(mac, dashed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The all-zero address.
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Group bit of the first octet.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Returns true if the address may be assigned to an interface.
    ///
    /// Multicast (including broadcast) and all-zero addresses are rejected by
    /// the kernel when set on a link.
    pub fn is_assignable(&self) -> bool {
        !self.is_multicast() && !self.is_zero()
    }

    /// Parses an address and checks that it can be assigned to a link.
    pub fn parse_assignable(s: &str) -> Result<Self, ParseError> {
        let mac: MacAddress = s.parse()?;
        if mac.is_assignable() {
            Ok(mac)
        } else {
            Err(ParseError::UnassignableMacAddress(mac.to_string()))
        }
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidMacAddress(s.to_string());
        let separator = if s.contains(':') { ':' } else { '-' };

        let mut bytes = [0u8; 6];
        let mut parts = s.split(separator);
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}
