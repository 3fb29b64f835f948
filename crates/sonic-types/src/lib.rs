//! Common SONiC types shared by the LAG control plane.
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses assigned to bonded interfaces

mod mac;

pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("MAC address {0} cannot be assigned to an interface")]
    UnassignableMacAddress(String),
}
