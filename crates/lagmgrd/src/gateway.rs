//! Outbound seams of the LAG coordinator.
//!
//! The hardware side is [`sonic_sai::LagApi`]. This module adds the
//! kernel/OS interface layer and the state publisher.

use sonic_cfgmgr_common::CfgMgrResult;
use sonic_sai::NpuPort;
use sonic_types::MacAddress;

use crate::group::LagGroup;
use crate::types::{GroupEvent, IfIndex};

/// Kernel/OS interface layer: bond registration, enslavement and link
/// attributes.
///
/// Implementations must not call back into the coordinator.
pub trait KernelGateway: Send + Sync {
    /// Whether an interface with this name is already known to the OS layer.
    fn interface_registered(&self, name: &str) -> bool;

    fn register_bond_interface(&self, ifindex: IfIndex, name: &str) -> CfgMgrResult<()>;

    fn deregister_bond_interface(&self, ifindex: IfIndex) -> CfgMgrResult<()>;

    fn attach_port_to_bond(&self, bond: IfIndex, port: IfIndex) -> CfgMgrResult<()>;

    fn detach_port_from_bond(&self, bond: IfIndex, port: IfIndex) -> CfgMgrResult<()>;

    /// Resolves a kernel port to its (NPU, hardware port) location.
    fn resolve_port_location(&self, port: IfIndex) -> CfgMgrResult<NpuPort>;

    /// Reverse of [`resolve_port_location`](Self::resolve_port_location).
    fn resolve_port_ifindex(&self, location: NpuPort) -> Option<IfIndex>;

    fn admin_state(&self, ifindex: IfIndex) -> CfgMgrResult<bool>;

    fn set_admin_state(&self, ifindex: IfIndex, up: bool) -> CfgMgrResult<()>;

    fn set_mac_address(&self, ifindex: IfIndex, mac: &MacAddress) -> CfgMgrResult<()>;

    fn set_mac_learning(&self, ifindex: IfIndex, enabled: bool) -> CfgMgrResult<()>;
}

/// Receives group state and oper-status changes.
///
/// Called with the coordinator lock held, so notifications for one group
/// arrive in the order the changes were applied.
pub trait LagPublisher: Send + Sync {
    fn publish_group_state(&self, event: GroupEvent, group: &LagGroup);

    fn publish_oper_status(&self, group: &LagGroup, up: bool);
}
