//! LAG coordinator.
//!
//! [`LagOrch`] owns the [`LagRegistry`] behind a single mutex. Every entry
//! point, whether a configuration request, a kernel association event or a
//! hardware link callback, takes that lock, calls the gateways, updates the
//! registry and publishes before releasing it. Operations that are composed
//! of other operations (group delete, member list replacement) call the
//! `*_locked` helpers on the registry they already hold.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use sonic_orch_common::Operation;
use sonic_sai::{LagApi, LagOid, LinkState, MacLearnMode, NpuId, NpuPort};
use sonic_types::MacAddress;

use crate::error::{LagError, Result};
use crate::gateway::{KernelGateway, LagPublisher};
use crate::group::{LagGroup, LagMember};
use crate::registry::{LagRegistry, LagStats, OperTransition};
use crate::types::{validate_lag_name, GroupEvent, IfIndex, LagId, PortAssociation};

/// Who asked for a membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Configuration request; the kernel bond must be updated too.
    Config,
    /// Kernel notification; the kernel bond already reflects the change.
    Kernel,
}

/// Synchronized LAG coordinator.
pub struct LagOrch {
    npu_id: NpuId,
    registry: Mutex<LagRegistry>,
    hardware: Arc<dyn LagApi>,
    kernel: Arc<dyn KernelGateway>,
    publisher: Arc<dyn LagPublisher>,
}

impl LagOrch {
    pub fn new(
        npu_id: NpuId,
        hardware: Arc<dyn LagApi>,
        kernel: Arc<dyn KernelGateway>,
        publisher: Arc<dyn LagPublisher>,
    ) -> Self {
        Self {
            npu_id,
            registry: Mutex::new(LagRegistry::new()),
            hardware,
            kernel,
            publisher,
        }
    }

    pub fn npu_id(&self) -> NpuId {
        self.npu_id
    }

    // ---- group lifecycle ----

    /// Creates a group for an existing kernel bond.
    ///
    /// Without an explicit `lag_id` the id is derived from the name.
    #[instrument(skip(self))]
    pub fn create_group(&self, ifindex: IfIndex, name: &str, lag_id: Option<LagId>) -> Result<LagGroup> {
        validate_lag_name(name)?;
        let lag_id = lag_id.unwrap_or_else(|| LagId::from_name(name));

        let mut reg = self.registry.lock();
        if reg.group(ifindex).is_some() {
            return Err(LagError::group_exists(ifindex));
        }
        if reg.group_by_name(name).is_some() || self.kernel.interface_registered(name) {
            return Err(LagError::group_exists(name));
        }
        if reg.owner_of(ifindex).is_some() {
            return Err(LagError::invalid_argument(format!(
                "ifindex {} is a member of another LAG",
                ifindex
            )));
        }

        let handle = self
            .hardware
            .create_lag(self.npu_id)
            .map_err(|e| LagError::hardware("create_lag", e))?;

        let resilient_hash = reg.resilient_hash();
        if let Err(e) = self.hardware.set_resilient_hash(self.npu_id, handle, resilient_hash) {
            warn!(lag = %name, error = %e, "Failed to set resilient hash on new LAG");
        }

        if let Err(e) = self.kernel.register_bond_interface(ifindex, name) {
            self.undo_create_lag(handle);
            return Err(LagError::kernel("register_bond_interface", e));
        }

        let group = LagGroup::new(ifindex, name, lag_id, handle);
        if let Err(e) = reg.insert_group(group.clone()) {
            if let Err(ke) = self.kernel.deregister_bond_interface(ifindex) {
                warn!(lag = %name, error = %ke, "Failed to deregister LAG during rollback");
            }
            self.undo_create_lag(handle);
            return Err(e);
        }

        info!(lag = %name, %ifindex, %lag_id, %handle, "Created LAG");
        self.publisher.publish_group_state(GroupEvent::Created, &group);
        Ok(group)
    }

    /// Deletes a group, detaching and removing every member first.
    #[instrument(skip(self))]
    pub fn delete_group(&self, ifindex: IfIndex) -> Result<()> {
        let mut reg = self.registry.lock();
        let group = reg
            .group(ifindex)
            .cloned()
            .ok_or_else(|| LagError::group_not_found(ifindex))?;

        for port in &group.members {
            self.remove_member_locked(&mut reg, ifindex, *port, Origin::Config)?;
        }

        self.hardware
            .remove_lag(self.npu_id, group.hardware_handle)
            .map_err(|e| LagError::hardware("remove_lag", e))?;

        if let Err(e) = self.kernel.deregister_bond_interface(ifindex) {
            warn!(lag = %group.name, error = %e, "Failed to deregister LAG interface");
        }

        let removed = reg.remove_group(ifindex)?;
        info!(lag = %removed.name, %ifindex, "Deleted LAG");
        self.publisher.publish_group_state(GroupEvent::Deleted, &removed);
        Ok(())
    }

    // ---- membership ----

    /// Adds `port` to the group at `master` in hardware and in the kernel.
    #[instrument(skip(self))]
    pub fn add_member(&self, master: IfIndex, port: IfIndex) -> Result<()> {
        let mut reg = self.registry.lock();
        self.add_member_locked(&mut reg, master, port, Origin::Config)
    }

    /// Removes `port` from the group at `master`.
    #[instrument(skip(self))]
    pub fn remove_member(&self, master: IfIndex, port: IfIndex) -> Result<()> {
        let mut reg = self.registry.lock();
        self.remove_member_locked(&mut reg, master, port, Origin::Config)
    }

    /// Applies a member list.
    ///
    /// `Set` makes the member set equal to `ports`; `Del` removes the listed
    /// ports that are members and ignores the rest.
    #[instrument(skip(self))]
    pub fn set_member_ports(&self, master: IfIndex, op: Operation, ports: &[IfIndex]) -> Result<()> {
        let mut reg = self.registry.lock();
        let current = reg
            .group(master)
            .map(|g| g.members.clone())
            .ok_or_else(|| LagError::group_not_found(master))?;
        let wanted: BTreeSet<IfIndex> = ports.iter().copied().collect();

        match op {
            Operation::Set => {
                for port in current.difference(&wanted) {
                    self.remove_member_locked(&mut reg, master, *port, Origin::Config)?;
                }
                for port in wanted.difference(&current) {
                    self.add_member_locked(&mut reg, master, *port, Origin::Config)?;
                }
            }
            Operation::Del => {
                for port in &wanted {
                    if current.contains(port) {
                        self.remove_member_locked(&mut reg, master, *port, Origin::Config)?;
                    } else {
                        debug!(%master, %port, "Not a member, nothing to remove");
                    }
                }
            }
        }
        Ok(())
    }

    /// Blocks or unblocks a port of the group at `master`.
    ///
    /// For a port that is not a member of any group the request is recorded
    /// and applied when the port joins. Unblocking clears the hardware block
    /// regardless of link state; a later link-down event disables the member
    /// again.
    #[instrument(skip(self))]
    pub fn set_member_block_state(&self, master: IfIndex, port: IfIndex, blocked: bool) -> Result<()> {
        let mut reg = self.registry.lock();
        let group = reg
            .group(master)
            .cloned()
            .ok_or_else(|| LagError::group_not_found(master))?;

        match reg.owner_of(port) {
            None => {
                debug!(lag = %group.name, %port, blocked, "Recording block state for non-member");
                return reg.set_pending_block(master, port, blocked);
            }
            Some(owner) if owner != master => return Err(LagError::member_not_found(port)),
            Some(_) => {}
        }

        if group.is_blocked(port) == blocked {
            return Ok(());
        }
        let member = reg
            .member(port)
            .copied()
            .ok_or_else(|| LagError::member_not_found(port))?;

        if blocked {
            let link_up = group.member_oper.get(&port).copied().unwrap_or(false);
            let was_disabled = self
                .hardware
                .get_member_egress_disable(self.npu_id, member.hardware_member_handle)
                .unwrap_or(!link_up);
            self.set_egress_disable(&member, true)?;
            if member.kernel_attached {
                if let Err(e) = self.detach_preserving_admin(master, port) {
                    if !was_disabled {
                        if let Err(he) = self.set_egress_disable(&member, false) {
                            warn!(%port, error = %he, "Failed to unblock member during rollback");
                        }
                    }
                    return Err(e);
                }
            }
        } else {
            let attach = !member.kernel_attached;
            if attach {
                self.attach_preserving_admin(master, port)?;
            }
            if let Err(e) = self.set_egress_disable(&member, false) {
                if attach {
                    if let Err(ke) = self.detach_preserving_admin(master, port) {
                        warn!(%port, error = %ke, "Failed to detach member during rollback");
                    }
                }
                return Err(e);
            }
        }

        reg.set_member_kernel_attached(port, !blocked)?;
        reg.set_member_blocked(master, port, blocked)?;
        info!(lag = %group.name, %port, blocked, "Member block state changed");
        self.publish_state(&reg, GroupEvent::Updated, master);
        Ok(())
    }

    /// Reads the hardware block (egress disable) state of a member.
    pub fn member_block_state(&self, master: IfIndex, port: IfIndex) -> Result<bool> {
        let reg = self.registry.lock();
        let member = reg
            .member(port)
            .filter(|m| m.master_ifindex == master)
            .copied()
            .ok_or_else(|| LagError::member_not_found(port))?;
        self.hardware
            .get_member_egress_disable(self.npu_id, member.hardware_member_handle)
            .map_err(|e| LagError::hardware("get_member_egress_disable", e))
    }

    // ---- group attributes ----

    #[instrument(skip(self))]
    pub fn set_admin_status(&self, ifindex: IfIndex, up: bool) -> Result<()> {
        let mut reg = self.registry.lock();
        let group = reg
            .group_mut(ifindex)
            .ok_or_else(|| LagError::group_not_found(ifindex))?;
        group.admin_status = up;
        debug!(lag = %group.name, up, "Admin status set");
        self.publish_state(&reg, GroupEvent::Updated, ifindex);
        Ok(())
    }

    /// Validates `mac`, programs it on the kernel bond and stores it in
    /// normalized form.
    #[instrument(skip(self))]
    pub fn set_mac_address(&self, ifindex: IfIndex, mac: &str) -> Result<()> {
        let mac = MacAddress::parse_assignable(mac)
            .map_err(|e| LagError::invalid_argument(e.to_string()))?;

        let mut reg = self.registry.lock();
        if reg.group(ifindex).is_none() {
            return Err(LagError::group_not_found(ifindex));
        }
        self.kernel
            .set_mac_address(ifindex, &mac)
            .map_err(|e| LagError::kernel("set_mac_address", e))?;

        if let Some(group) = reg.group_mut(ifindex) {
            group.mac_address = mac.to_string();
            debug!(lag = %group.name, mac = %group.mac_address, "MAC address set");
        }
        self.publish_state(&reg, GroupEvent::Updated, ifindex);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_mac_learn_mode(&self, ifindex: IfIndex, mode: MacLearnMode) -> Result<()> {
        let mut reg = self.registry.lock();
        let group = reg
            .group(ifindex)
            .cloned()
            .ok_or_else(|| LagError::group_not_found(ifindex))?;

        self.kernel
            .set_mac_learning(ifindex, mode.learning_enabled())
            .map_err(|e| LagError::kernel("set_mac_learning", e))?;

        if let Err(e) = self
            .hardware
            .set_learn_mode(self.npu_id, group.hardware_handle, mode)
        {
            let previous = group.mac_learn_mode.learning_enabled();
            if let Err(ke) = self.kernel.set_mac_learning(ifindex, previous) {
                warn!(lag = %group.name, error = %ke, "Failed to restore kernel learning");
            }
            return Err(LagError::hardware("set_learn_mode", e));
        }

        if let Some(group) = reg.group_mut(ifindex) {
            group.mac_learn_mode = mode;
            group.mac_learn_mode_set = true;
        }
        debug!(lag = %group.name, %mode, "MAC learn mode set");
        self.publish_state(&reg, GroupEvent::Updated, ifindex);
        Ok(())
    }

    /// Sets the global resilient-hash flag and pushes it to every group.
    ///
    /// Per-group hardware failures are logged and not retried.
    #[instrument(skip(self))]
    pub fn set_resilient_hash(&self, enabled: bool) {
        let mut reg = self.registry.lock();
        if !reg.set_resilient_hash(enabled) {
            return;
        }
        info!(enabled, groups = reg.group_count(), "Resilient hash changed");
        for group in reg.groups_sorted() {
            if let Err(e) = self
                .hardware
                .set_resilient_hash(self.npu_id, group.hardware_handle, enabled)
            {
                warn!(lag = %group.name, error = %e, "Failed to set resilient hash");
            }
        }
    }

    pub fn resilient_hash(&self) -> bool {
        self.registry.lock().resilient_hash()
    }

    // ---- lookups ----

    pub fn lookup_group(&self, ifindex: IfIndex) -> Option<LagGroup> {
        self.registry.lock().group(ifindex).cloned()
    }

    pub fn lookup_group_by_name(&self, name: &str) -> Option<LagGroup> {
        self.registry.lock().group_by_name(name).cloned()
    }

    pub fn group_by_hardware_handle(&self, handle: LagOid) -> Option<LagGroup> {
        self.registry.lock().group_by_handle(handle).cloned()
    }

    pub fn lookup_member(&self, port: IfIndex) -> Option<LagMember> {
        self.registry.lock().member(port).copied()
    }

    pub fn owner_of(&self, port: IfIndex) -> Option<IfIndex> {
        self.registry.lock().owner_of(port)
    }

    /// Snapshot of all groups ordered by ifindex.
    pub fn all_groups(&self) -> Vec<LagGroup> {
        self.registry
            .lock()
            .groups_sorted()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> LagStats {
        self.registry.lock().stats().clone()
    }

    pub fn check_invariants(&self) -> Result<()> {
        self.registry.lock().check_invariants()
    }

    /// Counts an event lost before reaching a handler.
    pub fn record_dropped_event(&self) {
        self.registry.lock().record_dropped_event();
    }

    // ---- asynchronous event handlers ----

    /// Hardware link-state callback. Errors are logged and dropped.
    #[instrument(skip(self))]
    pub fn on_hardware_link_state_change(&self, npu: NpuId, port_id: u32, state: LinkState) {
        let location = NpuPort::new(npu, port_id);
        let mut reg = self.registry.lock();

        let port = match self.kernel.resolve_port_ifindex(location) {
            Some(port) => port,
            None => {
                debug!(%location, "Link event for unknown port dropped");
                reg.record_dropped_event();
                return;
            }
        };
        if reg.owner_of(port).is_none() {
            debug!(%port, "Link event for non-member dropped");
            reg.record_dropped_event();
            return;
        }

        if let Err(e) = self.apply_link_state(&mut reg, port, state.is_up()) {
            warn!(%port, error = %e, "Failed to apply link state");
            reg.record_dropped_event();
        }
    }

    /// Kernel bond association callback. Errors are logged and dropped.
    #[instrument(skip(self))]
    pub fn on_kernel_port_association(&self, port: IfIndex, association: PortAssociation) {
        let mut reg = self.registry.lock();
        let result = match association {
            PortAssociation::Attached { master } => {
                if reg.owner_of(port) == Some(master) {
                    debug!(%port, %master, "Port already a member");
                    if let Err(e) = reg.set_member_kernel_attached(port, true) {
                        warn!(%port, error = %e, "Failed to record kernel attachment");
                    }
                    return;
                }
                if reg.group(master).is_none() {
                    debug!(%port, %master, "Attach to unmanaged bond dropped");
                    reg.record_dropped_event();
                    return;
                }
                self.add_member_locked(&mut reg, master, port, Origin::Kernel)
            }
            PortAssociation::Detached => {
                // Config removals are echoed back by the kernel after the
                // slave entry is gone.
                let Some(master) = reg.owner_of(port) else {
                    debug!(%port, "Detach of non-member ignored");
                    return;
                };
                if reg.group(master).is_some_and(|g| g.is_blocked(port)) {
                    debug!(%port, %master, "Detach of blocked member recorded");
                    if let Err(e) = reg.set_member_kernel_attached(port, false) {
                        warn!(%port, error = %e, "Failed to record kernel detachment");
                    }
                    return;
                }
                self.remove_member_locked(&mut reg, master, port, Origin::Kernel)
            }
        };

        if let Err(e) = result {
            warn!(%port, ?association, error = %e, "Failed to apply kernel association");
            reg.record_dropped_event();
        }
    }

    // ---- lock-free helpers (caller holds the registry lock) ----

    fn add_member_locked(
        &self,
        reg: &mut LagRegistry,
        master: IfIndex,
        port: IfIndex,
        origin: Origin,
    ) -> Result<()> {
        reg.check_member_admission(master, port)?;
        let (handle, blocked) = match reg.group(master) {
            Some(group) => (group.hardware_handle, group.pending_blocks.contains(&port)),
            None => return Err(LagError::group_not_found(master)),
        };

        let location = self
            .kernel
            .resolve_port_location(port)
            .map_err(|e| LagError::kernel("resolve_port_location", e))?;

        let member_oid = self
            .hardware
            .create_lag_member(self.npu_id, handle, location)
            .map_err(|e| LagError::hardware("create_lag_member", e))?;
        let kernel_attach = origin == Origin::Config && !blocked;
        let member = LagMember {
            ifindex: port,
            master_ifindex: master,
            hardware_member_handle: member_oid,
            kernel_attached: origin == Origin::Kernel || kernel_attach,
        };

        let link_up = match self.hardware.get_port_link_state(self.npu_id, location) {
            Ok(state) => state.is_up(),
            Err(e) => {
                warn!(%port, %location, error = %e, "Link state unreadable, assuming down");
                false
            }
        };

        if kernel_attach {
            if let Err(e) = self.attach_preserving_admin(master, port) {
                self.undo_create_member(&member);
                return Err(e);
            }
        }

        if blocked || !link_up {
            if let Err(e) = self.set_egress_disable(&member, true) {
                if kernel_attach {
                    if let Err(ke) = self.detach_preserving_admin(master, port) {
                        warn!(%port, error = %ke, "Failed to detach member during rollback");
                    }
                }
                self.undo_create_member(&member);
                return Err(e);
            }
        }

        let transition = reg.insert_member(member, link_up)?;
        info!(%master, %port, %location, blocked, link_up, "Added LAG member");
        self.publish_transition(reg, master, transition);
        self.publish_state(reg, GroupEvent::Updated, master);
        Ok(())
    }

    fn remove_member_locked(
        &self,
        reg: &mut LagRegistry,
        master: IfIndex,
        port: IfIndex,
        origin: Origin,
    ) -> Result<()> {
        let member = reg
            .member(port)
            .filter(|m| m.master_ifindex == master)
            .copied()
            .ok_or_else(|| LagError::member_not_found(port))?;
        let kernel_detach = origin == Origin::Config && member.kernel_attached;
        if kernel_detach {
            self.detach_preserving_admin(master, port)?;
        }

        if let Err(e) = self
            .hardware
            .remove_lag_member(self.npu_id, member.hardware_member_handle)
        {
            if kernel_detach {
                if let Err(ke) = self.attach_preserving_admin(master, port) {
                    warn!(%port, error = %ke, "Failed to re-attach member during rollback");
                }
            }
            return Err(LagError::hardware("remove_lag_member", e));
        }

        let (_, transition) = reg.remove_member(port)?;
        info!(%master, %port, "Removed LAG member");
        self.publish_transition(reg, master, transition);
        self.publish_state(reg, GroupEvent::Updated, master);
        Ok(())
    }

    fn apply_link_state(&self, reg: &mut LagRegistry, port: IfIndex, up: bool) -> Result<()> {
        let member = reg
            .member(port)
            .copied()
            .ok_or_else(|| LagError::member_not_found(port))?;
        let (master, transition) = reg.set_member_oper(port, up)?;
        let blocked = reg.group(master).is_some_and(|g| g.is_blocked(port));

        debug!(%master, %port, up, blocked, "Member link state");
        self.publish_transition(reg, master, transition);
        self.set_egress_disable(&member, blocked || !up)
    }

    fn attach_preserving_admin(&self, master: IfIndex, port: IfIndex) -> Result<()> {
        let admin = self.saved_admin_state(port);
        self.kernel
            .attach_port_to_bond(master, port)
            .map_err(|e| LagError::kernel("attach_port_to_bond", e))?;
        self.restore_admin_state(port, admin);
        Ok(())
    }

    fn detach_preserving_admin(&self, master: IfIndex, port: IfIndex) -> Result<()> {
        let admin = self.saved_admin_state(port);
        self.kernel
            .detach_port_from_bond(master, port)
            .map_err(|e| LagError::kernel("detach_port_from_bond", e))?;
        self.restore_admin_state(port, admin);
        Ok(())
    }

    fn saved_admin_state(&self, port: IfIndex) -> Option<bool> {
        match self.kernel.admin_state(port) {
            Ok(up) => Some(up),
            Err(e) => {
                warn!(%port, error = %e, "Failed to read admin state");
                None
            }
        }
    }

    fn restore_admin_state(&self, port: IfIndex, admin: Option<bool>) {
        if let Some(up) = admin {
            if let Err(e) = self.kernel.set_admin_state(port, up) {
                warn!(%port, up, error = %e, "Failed to restore admin state");
            }
        }
    }

    fn set_egress_disable(&self, member: &LagMember, disable: bool) -> Result<()> {
        self.hardware
            .set_member_egress_disable(self.npu_id, member.hardware_member_handle, disable)
            .map_err(|e| LagError::hardware("set_member_egress_disable", e))
    }

    fn undo_create_member(&self, member: &LagMember) {
        if let Err(e) = self
            .hardware
            .remove_lag_member(self.npu_id, member.hardware_member_handle)
        {
            warn!(port = %member.ifindex, error = %e, "Failed to remove hardware member during rollback");
        }
    }

    fn undo_create_lag(&self, handle: LagOid) {
        if let Err(e) = self.hardware.remove_lag(self.npu_id, handle) {
            warn!(%handle, error = %e, "Failed to remove hardware LAG during rollback");
        }
    }

    fn publish_transition(&self, reg: &LagRegistry, master: IfIndex, transition: OperTransition) {
        if !transition.changed() {
            return;
        }
        if let Some(group) = reg.group(master) {
            info!(lag = %group.name, up = group.oper_status, "LAG oper status changed");
            self.publisher.publish_oper_status(group, group.oper_status);
        }
    }

    fn publish_state(&self, reg: &LagRegistry, event: GroupEvent, ifindex: IfIndex) {
        if let Some(group) = reg.group(ifindex) {
            self.publisher.publish_group_state(event, group);
        }
    }
}
