//! LAG configuration table processing.
//!
//! Entries of the `LAG` table are keyed by bond name; `LAG_GLOBAL|GLOBAL`
//! carries the resilient-hash switch. Each entry is turned into coordinator
//! calls and answered with a [`TaskStatus`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use sonic_orch_common::{KeyOpFieldsValues, Operation, TaskError, TaskResult, TaskResultExt, TaskStatus};
use sonic_sai::MacLearnMode;

use crate::orch::LagOrch;
use crate::types::{parse_admin_status, IfIndex, LagId};

/// LAG table name
pub const CFG_LAG_TABLE_NAME: &str = "LAG";

/// Global LAG settings table name
pub const CFG_LAG_GLOBAL_TABLE_NAME: &str = "LAG_GLOBAL";

/// Only key of the global table
pub const GLOBAL_KEY: &str = "GLOBAL";

/// Field names
pub mod fields {
    pub const IFINDEX: &str = "ifindex";
    pub const LAG_ID: &str = "lag_id";
    pub const ADMIN_STATUS: &str = "admin_status";
    pub const MAC: &str = "mac";
    pub const MAC_LEARN_MODE: &str = "mac_learn_mode";
    /// Comma-separated port names (or ifindexes); replaces the member set
    pub const MEMBERS: &str = "members";
    pub const UNBLOCKED_MEMBERS: &str = "unblocked_members";
    pub const BLOCKED_MEMBERS: &str = "blocked_members";
    pub const RESILIENT_HASH: &str = "resilient_hash";
}

/// A configuration change addressed to one of the two tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigRequest {
    Lag(KeyOpFieldsValues),
    Global(KeyOpFieldsValues),
}

impl ConfigRequest {
    pub fn table(&self) -> &'static str {
        match self {
            ConfigRequest::Lag(_) => CFG_LAG_TABLE_NAME,
            ConfigRequest::Global(_) => CFG_LAG_GLOBAL_TABLE_NAME,
        }
    }

    pub fn entry(&self) -> &KeyOpFieldsValues {
        match self {
            ConfigRequest::Lag(kfv) | ConfigRequest::Global(kfv) => kfv,
        }
    }
}

/// Applies configuration table entries to a [`LagOrch`].
pub struct LagConfigTable {
    orch: Arc<LagOrch>,
    ports: HashMap<String, IfIndex>,
}

impl LagConfigTable {
    /// `ports` maps port names to kernel ifindexes for member lists.
    pub fn new(orch: Arc<LagOrch>, ports: impl IntoIterator<Item = (String, IfIndex)>) -> Self {
        Self {
            orch,
            ports: ports.into_iter().collect(),
        }
    }

    pub fn orch(&self) -> &Arc<LagOrch> {
        &self.orch
    }

    /// Processes one entry.
    pub fn process(&self, request: &ConfigRequest) -> TaskStatus {
        let result = match request {
            ConfigRequest::Lag(kfv) => self.process_lag(kfv),
            ConfigRequest::Global(kfv) => self.process_global(kfv),
        };
        let status = result.to_status();

        let entry = request.entry();
        match &result {
            Ok(()) => debug!(table = request.table(), key = %entry.key, op = ?entry.op, "Processed entry"),
            Err(e) if status.is_failure() => {
                warn!(table = request.table(), key = %entry.key, error = %e, "Entry failed")
            }
            Err(e) => debug!(table = request.table(), key = %entry.key, reason = %e, ?status, "Entry not applied"),
        }
        status
    }

    fn process_global(&self, kfv: &KeyOpFieldsValues) -> TaskResult<()> {
        if kfv.key != GLOBAL_KEY {
            return Err(TaskError::ignored(format!("unknown global key {}", kfv.key)));
        }
        match kfv.op {
            Operation::Del => self.orch.set_resilient_hash(false),
            Operation::Set => {
                if let Some(value) = kfv.get_field(fields::RESILIENT_HASH) {
                    self.orch.set_resilient_hash(parse_flag(value)?);
                }
            }
        }
        Ok(())
    }

    fn process_lag(&self, kfv: &KeyOpFieldsValues) -> TaskResult<()> {
        match kfv.op {
            Operation::Set => self.apply_lag(kfv),
            Operation::Del => self.remove_lag(&kfv.key),
        }
    }

    fn apply_lag(&self, kfv: &KeyOpFieldsValues) -> TaskResult<()> {
        let name = kfv.key.as_str();
        let requested_ifindex = kfv
            .get_field(fields::IFINDEX)
            .map(|v| v.parse::<IfIndex>())
            .transpose()
            .map_err(|e| TaskError::invalid_entry(e.to_string()))?;

        let ifindex = match self.orch.lookup_group_by_name(name) {
            Some(group) => {
                if requested_ifindex.is_some_and(|i| i != group.ifindex) {
                    return Err(TaskError::invalid_entry(format!(
                        "{} already exists with ifindex {}",
                        name, group.ifindex
                    )));
                }
                group.ifindex
            }
            None => {
                let ifindex = requested_ifindex.ok_or_else(|| {
                    TaskError::invalid_entry(format!("{} has no ifindex", name))
                })?;
                let lag_id = kfv
                    .get_field(fields::LAG_ID)
                    .map(|v| v.trim().parse::<u32>().map(LagId::new))
                    .transpose()
                    .map_err(|_| TaskError::invalid_entry(format!("{}: bad lag_id", name)))?;
                self.orch.create_group(ifindex, name, lag_id)?;
                info!(lag = %name, %ifindex, "LAG created from config");
                ifindex
            }
        };

        if let Some(value) = kfv.get_field(fields::ADMIN_STATUS) {
            self.orch.set_admin_status(ifindex, parse_admin_status(value)?)?;
        }
        if let Some(mac) = kfv.get_field(fields::MAC) {
            self.orch.set_mac_address(ifindex, mac)?;
        }
        if let Some(mode) = kfv.get_field(fields::MAC_LEARN_MODE) {
            let mode: MacLearnMode = mode
                .parse()
                .map_err(|e: sonic_sai::SaiError| TaskError::invalid_entry(e.to_string()))?;
            self.orch.set_mac_learn_mode(ifindex, mode)?;
        }

        // Block requests go first so joining ports are admitted already blocked.
        if let Some(list) = kfv.get_field(fields::UNBLOCKED_MEMBERS) {
            for port in self.resolve_ports(list)? {
                self.orch.set_member_block_state(ifindex, port, false)?;
            }
        }
        if let Some(list) = kfv.get_field(fields::BLOCKED_MEMBERS) {
            for port in self.resolve_ports(list)? {
                self.orch.set_member_block_state(ifindex, port, true)?;
            }
        }
        if let Some(list) = kfv.get_field(fields::MEMBERS) {
            let ports = self.resolve_ports(list)?;
            self.orch.set_member_ports(ifindex, Operation::Set, &ports)?;
        }
        Ok(())
    }

    fn remove_lag(&self, name: &str) -> TaskResult<()> {
        let group = self
            .orch
            .lookup_group_by_name(name)
            .ok_or_else(|| TaskError::ignored(format!("{} is not configured", name)))?;
        self.orch.delete_group(group.ifindex)?;
        info!(lag = %name, "LAG removed from config");
        Ok(())
    }

    fn resolve_ports(&self, list: &str) -> TaskResult<Vec<IfIndex>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|port| match self.ports.get(port) {
                Some(ifindex) => Ok(*ifindex),
                None => port
                    .parse::<IfIndex>()
                    .map_err(|_| TaskError::need_retry(format!("port {} is not known", port))),
            })
            .collect()
    }
}

fn parse_flag(value: &str) -> TaskResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "enable" | "enabled" | "on" => Ok(true),
        "false" | "disable" | "disabled" | "off" => Ok(false),
        other => Err(TaskError::invalid_entry(format!("bad boolean '{}'", other))),
    }
}
