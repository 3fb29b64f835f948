//! LAG group and member records.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use sonic_sai::{LagMemberOid, LagOid, MacLearnMode};

use crate::types::{IfIndex, LagId};

/// One logical bonded interface.
///
/// Values handed out by the coordinator are snapshots; the live record is
/// only mutated by the registry while the coordinator lock is held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagGroup {
    pub ifindex: IfIndex,
    pub name: String,
    pub lag_id: LagId,
    /// Empty until explicitly set.
    pub mac_address: String,
    pub members: BTreeSet<IfIndex>,
    /// Last known link state per member.
    pub member_oper: BTreeMap<IfIndex, bool>,
    /// Members blocked from forwarding. Always a subset of `members`.
    pub blocked_members: BTreeSet<IfIndex>,
    /// Block requests for ports that are not members yet.
    pub pending_blocks: BTreeSet<IfIndex>,
    pub hardware_handle: LagOid,
    pub admin_status: bool,
    /// Derived from `member_oper`.
    pub oper_status: bool,
    pub mac_learn_mode: MacLearnMode,
    pub mac_learn_mode_set: bool,
}

impl LagGroup {
    pub fn new(ifindex: IfIndex, name: impl Into<String>, lag_id: LagId, handle: LagOid) -> Self {
        Self {
            ifindex,
            name: name.into(),
            lag_id,
            mac_address: String::new(),
            members: BTreeSet::new(),
            member_oper: BTreeMap::new(),
            blocked_members: BTreeSet::new(),
            pending_blocks: BTreeSet::new(),
            hardware_handle: handle,
            admin_status: false,
            oper_status: false,
            mac_learn_mode: MacLearnMode::default(),
            mac_learn_mode_set: false,
        }
    }

    pub fn has_member(&self, port: IfIndex) -> bool {
        self.members.contains(&port)
    }

    pub fn is_blocked(&self, port: IfIndex) -> bool {
        self.blocked_members.contains(&port)
    }

    /// Oper status as implied by the tracked member states.
    pub fn derived_oper_status(&self) -> bool {
        self.member_oper.values().any(|up| *up)
    }

    /// Serializable view of the group.
    pub fn state(&self) -> LagState {
        LagState {
            name: self.name.clone(),
            ifindex: self.ifindex,
            lag_id: self.lag_id,
            mac_address: self.mac_address.clone(),
            admin_status: self.admin_status,
            oper_status: self.oper_status,
            mac_learn_mode: self
                .mac_learn_mode_set
                .then(|| self.mac_learn_mode.as_str().to_string()),
            members: self.members.iter().copied().collect(),
            blocked_members: self.blocked_members.iter().copied().collect(),
            num_ports: self.members.len(),
            hardware_handle: self.hardware_handle.as_raw(),
        }
    }
}

/// One physical port bonded into a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagMember {
    pub ifindex: IfIndex,
    pub master_ifindex: IfIndex,
    pub hardware_member_handle: LagMemberOid,
    /// Whether the port is currently a slave of the kernel bond.
    pub kernel_attached: bool,
}

/// State view published to consumers outside the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LagState {
    pub name: String,
    pub ifindex: IfIndex,
    pub lag_id: LagId,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mac_address: String,
    pub admin_status: bool,
    pub oper_status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_learn_mode: Option<String>,
    pub members: Vec<IfIndex>,
    pub blocked_members: Vec<IfIndex>,
    pub num_ports: usize,
    pub hardware_handle: u64,
}
