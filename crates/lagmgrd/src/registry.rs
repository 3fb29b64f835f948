//! LAG registry: master table, slave table and oper-status derivation.
//!
//! The registry performs no locking and no I/O. The coordinator owns it
//! behind a single mutex and calls these helpers while holding that lock,
//! after the hardware and kernel gateways have accepted a change.

use serde::Serialize;
use tracing::debug;

use sonic_orch_common::SyncMap;
use sonic_sai::LagOid;

use crate::error::{LagError, Result};
use crate::group::{LagGroup, LagMember};
use crate::types::IfIndex;

/// Change of a group's oper status caused by a registry update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperTransition {
    Unchanged,
    Up,
    Down,
}

impl OperTransition {
    fn between(before: bool, after: bool) -> Self {
        match (before, after) {
            (false, true) => OperTransition::Up,
            (true, false) => OperTransition::Down,
            _ => OperTransition::Unchanged,
        }
    }

    pub fn changed(self) -> bool {
        self != OperTransition::Unchanged
    }
}

/// Counters kept alongside the tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LagStats {
    pub groups_created: u64,
    pub groups_deleted: u64,
    pub members_added: u64,
    pub members_removed: u64,
    pub oper_transitions: u64,
    pub events_dropped: u64,
}

/// Master table (bond ifindex → group) and slave table (port → member).
#[derive(Debug, Default)]
pub struct LagRegistry {
    groups: SyncMap<IfIndex, LagGroup>,
    members: SyncMap<IfIndex, LagMember>,
    resilient_hash: bool,
    stats: LagStats,
}

impl LagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resilient_hash(&self) -> bool {
        self.resilient_hash
    }

    /// Stores the flag, returning true if it changed.
    pub fn set_resilient_hash(&mut self, enabled: bool) -> bool {
        let changed = self.resilient_hash != enabled;
        self.resilient_hash = enabled;
        changed
    }

    pub fn stats(&self) -> &LagStats {
        &self.stats
    }

    pub fn record_dropped_event(&mut self) {
        self.stats.events_dropped += 1;
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn group(&self, ifindex: IfIndex) -> Option<&LagGroup> {
        self.groups.get(&ifindex)
    }

    pub(crate) fn group_mut(&mut self, ifindex: IfIndex) -> Option<&mut LagGroup> {
        self.groups.get_mut(&ifindex)
    }

    pub fn group_by_name(&self, name: &str) -> Option<&LagGroup> {
        self.groups.values().find(|g| g.name == name)
    }

    pub fn group_by_handle(&self, handle: LagOid) -> Option<&LagGroup> {
        self.groups.values().find(|g| g.hardware_handle == handle)
    }

    pub fn member(&self, port: IfIndex) -> Option<&LagMember> {
        self.members.get(&port)
    }

    /// Returns the bond that currently owns `port`.
    pub fn owner_of(&self, port: IfIndex) -> Option<IfIndex> {
        self.members.get(&port).map(|m| m.master_ifindex)
    }

    /// Groups ordered by interface index.
    pub fn groups_sorted(&self) -> Vec<&LagGroup> {
        self.groups
            .sorted_keys()
            .into_iter()
            .filter_map(|ifindex| self.groups.get(&ifindex))
            .collect()
    }

    /// Adds a freshly created group to the master table.
    pub fn insert_group(&mut self, group: LagGroup) -> Result<()> {
        if self.groups.contains_key(&group.ifindex) {
            return Err(LagError::group_exists(group.ifindex));
        }
        if self.group_by_name(&group.name).is_some() {
            return Err(LagError::group_exists(&group.name));
        }
        if !group.hardware_handle.is_valid() {
            return Err(LagError::inconsistent(format!(
                "{} has a null hardware handle",
                group.name
            )));
        }
        if self.group_by_handle(group.hardware_handle).is_some() {
            return Err(LagError::inconsistent(format!(
                "hardware handle {} is already in use",
                group.hardware_handle
            )));
        }
        if self.members.contains_key(&group.ifindex) {
            return Err(LagError::inconsistent(format!(
                "ifindex {} is a LAG member",
                group.ifindex
            )));
        }

        debug!(lag = %group.name, ifindex = %group.ifindex, "registry: group inserted");
        self.groups.insert(group.ifindex, group);
        self.stats.groups_created += 1;
        Ok(())
    }

    /// Removes an empty group from the master table.
    pub fn remove_group(&mut self, ifindex: IfIndex) -> Result<LagGroup> {
        let group = self
            .groups
            .get(&ifindex)
            .ok_or_else(|| LagError::group_not_found(ifindex))?;
        if !group.members.is_empty() {
            return Err(LagError::inconsistent(format!(
                "{} still has {} members",
                group.name,
                group.members.len()
            )));
        }

        let group = self
            .groups
            .remove(&ifindex)
            .ok_or_else(|| LagError::group_not_found(ifindex))?;
        if !group.pending_blocks.is_empty() {
            debug!(
                lag = %group.name,
                pending = group.pending_blocks.len(),
                "registry: dropping block requests for ports that never joined"
            );
        }
        self.stats.groups_deleted += 1;
        Ok(group)
    }

    /// Checks that `port` may join `master` without breaking exclusivity.
    pub fn check_member_admission(&self, master: IfIndex, port: IfIndex) -> Result<()> {
        if !self.groups.contains_key(&master) {
            return Err(LagError::group_not_found(master));
        }
        if self.groups.contains_key(&port) {
            return Err(LagError::invalid_argument(format!(
                "ifindex {} is a LAG and cannot be a member",
                port
            )));
        }
        match self.owner_of(port) {
            None => Ok(()),
            Some(owner) if owner == master => Err(LagError::member_exists(port)),
            Some(owner) => Err(LagError::inconsistent(format!(
                "port {} is already a member of LAG {}",
                port, owner
            ))),
        }
    }

    /// Records a member the hardware has accepted.
    ///
    /// `link_up` seeds the member's oper state. A pending block request for
    /// the port becomes an active block.
    pub fn insert_member(&mut self, member: LagMember, link_up: bool) -> Result<OperTransition> {
        self.check_member_admission(member.master_ifindex, member.ifindex)?;

        let group = self
            .groups
            .get_mut(&member.master_ifindex)
            .ok_or_else(|| LagError::group_not_found(member.master_ifindex))?;
        group.members.insert(member.ifindex);
        group.member_oper.insert(member.ifindex, link_up);
        if group.pending_blocks.remove(&member.ifindex) {
            group.blocked_members.insert(member.ifindex);
        }
        let transition = Self::recompute_oper(group);

        self.members.insert(member.ifindex, member);
        self.stats.members_added += 1;
        self.count_transition(transition);
        Ok(transition)
    }

    /// Erases a member from the slave table and from its group.
    pub fn remove_member(&mut self, port: IfIndex) -> Result<(LagMember, OperTransition)> {
        let member = self
            .members
            .remove(&port)
            .ok_or_else(|| LagError::member_not_found(port))?;

        let transition = match self.groups.get_mut(&member.master_ifindex) {
            Some(group) => {
                group.members.remove(&port);
                group.member_oper.remove(&port);
                group.blocked_members.remove(&port);
                Self::recompute_oper(group)
            }
            None => {
                return Err(LagError::inconsistent(format!(
                    "member {} points at missing LAG {}",
                    port, member.master_ifindex
                )))
            }
        };

        self.stats.members_removed += 1;
        self.count_transition(transition);
        Ok((member, transition))
    }

    /// Updates a member's tracked link state.
    pub fn set_member_oper(&mut self, port: IfIndex, up: bool) -> Result<(IfIndex, OperTransition)> {
        let master = self
            .owner_of(port)
            .ok_or_else(|| LagError::member_not_found(port))?;
        let group = self
            .groups
            .get_mut(&master)
            .ok_or_else(|| LagError::inconsistent(format!("member {} has no LAG", port)))?;
        group.member_oper.insert(port, up);
        let transition = Self::recompute_oper(group);
        self.count_transition(transition);
        Ok((master, transition))
    }

    /// Marks a current member as blocked or unblocked.
    pub fn set_member_blocked(&mut self, master: IfIndex, port: IfIndex, blocked: bool) -> Result<()> {
        let group = self
            .groups
            .get_mut(&master)
            .ok_or_else(|| LagError::group_not_found(master))?;
        if !group.members.contains(&port) {
            return Err(LagError::member_not_found(port));
        }
        if blocked {
            group.blocked_members.insert(port);
        } else {
            group.blocked_members.remove(&port);
        }
        Ok(())
    }

    /// Records whether a member is enslaved to its kernel bond.
    pub fn set_member_kernel_attached(&mut self, port: IfIndex, attached: bool) -> Result<()> {
        let member = self
            .members
            .get_mut(&port)
            .ok_or_else(|| LagError::member_not_found(port))?;
        member.kernel_attached = attached;
        Ok(())
    }

    /// Records (or clears) a block request for a port that is not a member.
    pub fn set_pending_block(&mut self, master: IfIndex, port: IfIndex, blocked: bool) -> Result<()> {
        let group = self
            .groups
            .get_mut(&master)
            .ok_or_else(|| LagError::group_not_found(master))?;
        if blocked {
            group.pending_blocks.insert(port);
        } else {
            group.pending_blocks.remove(&port);
        }
        Ok(())
    }

    /// Verifies every table invariant.
    pub fn check_invariants(&self) -> Result<()> {
        for (port, member) in self.members.iter() {
            if member.ifindex != *port {
                return Err(LagError::inconsistent(format!(
                    "slave entry {} records ifindex {}",
                    port, member.ifindex
                )));
            }
            match self.groups.get(&member.master_ifindex) {
                Some(group) if group.members.contains(port) => {}
                _ => {
                    return Err(LagError::inconsistent(format!(
                        "member {} is not listed by LAG {}",
                        port, member.master_ifindex
                    )))
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        for group in self.groups.values() {
            for port in &group.members {
                if !seen.insert(*port) {
                    return Err(LagError::inconsistent(format!(
                        "port {} belongs to more than one LAG",
                        port
                    )));
                }
                if self.owner_of(*port) != Some(group.ifindex) {
                    return Err(LagError::inconsistent(format!(
                        "{} lists port {} without a slave entry",
                        group.name, port
                    )));
                }
            }
            if !group.blocked_members.is_subset(&group.members) {
                return Err(LagError::inconsistent(format!(
                    "{} blocks ports that are not members",
                    group.name
                )));
            }
            if group.member_oper.keys().any(|p| !group.members.contains(p)) {
                return Err(LagError::inconsistent(format!(
                    "{} tracks link state of non-members",
                    group.name
                )));
            }
            if group.oper_status != group.derived_oper_status() {
                return Err(LagError::inconsistent(format!(
                    "{} oper status disagrees with its members",
                    group.name
                )));
            }
        }
        Ok(())
    }

    fn recompute_oper(group: &mut LagGroup) -> OperTransition {
        let before = group.oper_status;
        group.oper_status = group.derived_oper_status();
        OperTransition::between(before, group.oper_status)
    }

    fn count_transition(&mut self, transition: OperTransition) {
        if transition.changed() {
            self.stats.oper_transitions += 1;
        }
    }
}
