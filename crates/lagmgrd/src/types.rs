//! Core value types for the LAG manager.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LagError, Result};

/// Maximum interface name length including the terminating NUL (IFNAMSIZ).
pub const IFNAMSIZ: usize = 16;

/// Kernel interface index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct IfIndex(u32);

impl IfIndex {
    pub const fn new(index: u32) -> Self {
        IfIndex(index)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for IfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for IfIndex {
    fn from(index: u32) -> Self {
        IfIndex(index)
    }
}

impl FromStr for IfIndex {
    type Err = LagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().parse::<u32>() {
            Ok(0) | Err(_) => Err(LagError::invalid_argument(format!(
                "'{}' is not a valid interface index",
                s
            ))),
            Ok(index) => Ok(IfIndex(index)),
        }
    }
}

/// Operator-visible LAG number, e.g. 12 for `PortChannel12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LagId(u32);

impl LagId {
    /// Sentinel for a LAG without a number.
    pub const INVALID: LagId = LagId(u32::MAX);

    pub const fn new(id: u32) -> Self {
        LagId(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }

    /// Derives the id from the first run of digits in a bond name.
    ///
    /// ```
    /// use sonic_lagmgrd::LagId;
    ///
    /// assert_eq!(LagId::from_name("PortChannel12"), LagId::new(12));
    /// assert_eq!(LagId::from_name("bond"), LagId::INVALID);
    /// ```
    pub fn from_name(name: &str) -> Self {
        let digits: String = name
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        match digits.parse::<u32>() {
            Ok(id) if id != u32::MAX => LagId(id),
            _ => LagId::INVALID,
        }
    }
}

impl Default for LagId {
    fn default() -> Self {
        LagId::INVALID
    }
}

impl fmt::Display for LagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("invalid")
        }
    }
}

/// Checks a bond name against the kernel's interface name rules.
pub fn validate_lag_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LagError::invalid_argument("LAG name is empty"));
    }
    if name.len() >= IFNAMSIZ {
        return Err(LagError::invalid_argument(format!(
            "LAG name '{}' exceeds {} characters",
            name,
            IFNAMSIZ - 1
        )));
    }
    if name.contains(|c: char| c.is_whitespace() || c == '/') {
        return Err(LagError::invalid_argument(format!(
            "LAG name '{}' contains whitespace or '/'",
            name
        )));
    }
    Ok(())
}

/// Kind of group-state notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupEvent {
    Created,
    Updated,
    Deleted,
}

/// Kernel-reported change in a port's bond membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortAssociation {
    /// The port was enslaved to the bond with this index.
    Attached { master: IfIndex },
    /// The port left whatever bond it was in.
    Detached,
}

/// Administrative status as written in configuration ("up"/"down").
pub fn parse_admin_status(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "up" => Ok(true),
        "down" => Ok(false),
        other => Err(LagError::invalid_argument(format!(
            "admin_status must be 'up' or 'down', got '{}'",
            other
        ))),
    }
}
