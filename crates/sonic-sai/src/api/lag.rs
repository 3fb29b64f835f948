//! SAI LAG API surface.
//!
//! [`LagApi`] is the blocking hardware boundary used to program link
//! aggregation on an NPU. Every call may fail; callers get a [`SaiResult`]
//! and decide how to compensate.

use std::fmt;
use std::str::FromStr;

use crate::error::{SaiError, SaiResult};
use crate::types::{LagMemberOid, LagOid};

/// Identifier of an NPU (switching ASIC) in the system.
pub type NpuId = u32;

/// Hardware location of a physical port: the NPU it lives on and the
/// port number within that NPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NpuPort {
    pub npu_id: NpuId,
    pub port_id: u32,
}

impl NpuPort {
    pub const fn new(npu_id: NpuId, port_id: u32) -> Self {
        Self { npu_id, port_id }
    }
}

impl fmt::Display for NpuPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "npu{}/port{}", self.npu_id, self.port_id)
    }
}

/// Physical link state reported by the NPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    #[default]
    Down,
    Up,
}

impl LinkState {
    pub const fn from_up(up: bool) -> Self {
        if up {
            LinkState::Up
        } else {
            LinkState::Down
        }
    }

    pub const fn is_up(self) -> bool {
        matches!(self, LinkState::Up)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_up() { "up" } else { "down" })
    }
}

/// FDB learning mode of an aggregate's bridge port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MacLearnMode {
    /// Learning disabled, packets with unknown source dropped.
    Drop,
    /// Learning disabled, packets forwarded.
    Disable,
    /// Hardware learning (the SAI default).
    #[default]
    Hardware,
    CpuTrap,
    CpuLog,
}

impl MacLearnMode {
    /// Returns false for the modes that turn learning off.
    pub const fn learning_enabled(self) -> bool {
        !matches!(self, MacLearnMode::Drop | MacLearnMode::Disable)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            MacLearnMode::Drop => "drop",
            MacLearnMode::Disable => "disable",
            MacLearnMode::Hardware => "hardware",
            MacLearnMode::CpuTrap => "cpu_trap",
            MacLearnMode::CpuLog => "cpu_log",
        }
    }
}

impl fmt::Display for MacLearnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MacLearnMode {
    type Err = SaiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(MacLearnMode::Drop),
            "disable" => Ok(MacLearnMode::Disable),
            "hardware" | "hw" => Ok(MacLearnMode::Hardware),
            "cpu_trap" => Ok(MacLearnMode::CpuTrap),
            "cpu_log" => Ok(MacLearnMode::CpuLog),
            other => Err(SaiError::invalid_parameter(format!(
                "unknown MAC learn mode '{}'",
                other
            ))),
        }
    }
}

/// Hardware aggregation gateway.
///
/// Implementations block until the NPU has applied (or rejected) the
/// request. They must be callable from several threads.
pub trait LagApi: Send + Sync {
    /// Allocates a new aggregate on `npu`.
    fn create_lag(&self, npu: NpuId) -> SaiResult<LagOid>;

    /// Frees an aggregate. The aggregate must have no members.
    fn remove_lag(&self, npu: NpuId, lag: LagOid) -> SaiResult<()>;

    /// Adds the port at `port` to `lag`, returning the member handle.
    fn create_lag_member(&self, npu: NpuId, lag: LagOid, port: NpuPort) -> SaiResult<LagMemberOid>;

    fn remove_lag_member(&self, npu: NpuId, member: LagMemberOid) -> SaiResult<()>;

    /// Blocks (`true`) or unblocks egress on a member without removing it.
    fn set_member_egress_disable(
        &self,
        npu: NpuId,
        member: LagMemberOid,
        disabled: bool,
    ) -> SaiResult<()>;

    fn get_member_egress_disable(&self, npu: NpuId, member: LagMemberOid) -> SaiResult<bool>;

    fn set_resilient_hash(&self, npu: NpuId, lag: LagOid, enabled: bool) -> SaiResult<()>;

    fn set_learn_mode(&self, npu: NpuId, lag: LagOid, mode: MacLearnMode) -> SaiResult<()>;

    /// Reads the current physical link state of a port.
    fn get_port_link_state(&self, npu: NpuId, port: NpuPort) -> SaiResult<LinkState>;
}
