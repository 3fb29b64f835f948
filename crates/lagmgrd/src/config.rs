//! Configuration file support for lagmgrd
//!
//! Loads and validates lagmgrd configuration from TOML files.
//! Default location: /etc/sonic/lagmgrd.toml
//!
//! ```toml
//! [daemon]
//! npu_id = 0
//! resilient_hash = true
//!
//! [[ports]]
//! name = "Ethernet0"
//! ifindex = 10
//! npu_port = 1
//! link_up = true
//!
//! [[lags]]
//! name = "PortChannel1"
//! ifindex = 100
//! members = ["Ethernet0"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use sonic_orch_common::{FieldValue, KeyOpFieldsValues};
use sonic_sai::{NpuId, NpuPort};

use crate::config_table::{fields, ConfigRequest, GLOBAL_KEY};
use crate::error::{LagError, Result};
use crate::kernel::PortMapping;
use crate::types::{validate_lag_name, IfIndex};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/lagmgrd.toml";

/// Daemon-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub npu_id: NpuId,

    /// Initial value of the global resilient-hash flag
    #[serde(default)]
    pub resilient_hash: bool,

    /// Record kernel commands instead of running them
    #[serde(default)]
    pub dry_run: bool,

    /// Capacity of each event channel
    #[serde(default = "default_event_queue_depth")]
    pub event_queue_depth: usize,

    /// Aggregates the virtual NPU can hold
    #[serde(default = "default_max_lags")]
    pub max_lags: usize,
}

/// Front-panel port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    pub name: String,
    pub ifindex: IfIndex,
    pub npu_port: u32,
    /// Initial link state on the virtual NPU
    #[serde(default)]
    pub link_up: bool,
}

/// Bootstrap LAG entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LagConfig {
    pub name: String,
    pub ifindex: IfIndex,
    #[serde(default)]
    pub lag_id: Option<u32>,
    #[serde(default)]
    pub admin_status: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub mac_learn_mode: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub blocked_members: Vec<String>,
}

/// Complete lagmgrd configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LagMgrConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub ports: Vec<PortConfig>,

    #[serde(default)]
    pub lags: Vec<LagConfig>,
}

fn default_event_queue_depth() -> usize {
    1024
}

fn default_max_lags() -> usize {
    1024
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            npu_id: 0,
            resilient_hash: false,
            dry_run: false,
            event_queue_depth: default_event_queue_depth(),
            max_lags: default_max_lags(),
        }
    }
}

impl LagMgrConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).map_err(|e| {
                LagError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(LagError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| LagError::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.daemon.event_queue_depth == 0 {
            return Err(LagError::Config("event_queue_depth must be > 0".to_string()));
        }
        if self.daemon.max_lags == 0 {
            return Err(LagError::Config("max_lags must be > 0".to_string()));
        }

        let mut names = HashSet::new();
        let mut ifindexes = HashSet::new();
        let mut locations = HashSet::new();
        for port in &self.ports {
            if !names.insert(port.name.as_str()) {
                return Err(LagError::Config(format!("duplicate port name {}", port.name)));
            }
            if !ifindexes.insert(port.ifindex) {
                return Err(LagError::Config(format!(
                    "duplicate port ifindex {}",
                    port.ifindex
                )));
            }
            if !locations.insert(port.npu_port) {
                return Err(LagError::Config(format!(
                    "duplicate npu_port {} ({})",
                    port.npu_port, port.name
                )));
            }
        }

        let mut lag_names = HashSet::new();
        for lag in &self.lags {
            validate_lag_name(&lag.name).map_err(|e| LagError::Config(e.to_string()))?;
            if !lag_names.insert(lag.name.as_str()) || names.contains(lag.name.as_str()) {
                return Err(LagError::Config(format!("duplicate interface name {}", lag.name)));
            }
            if !ifindexes.insert(lag.ifindex) {
                return Err(LagError::Config(format!(
                    "{} reuses ifindex {}",
                    lag.name, lag.ifindex
                )));
            }
            for member in lag.members.iter().chain(&lag.blocked_members) {
                if !names.contains(member.as_str()) {
                    return Err(LagError::Config(format!(
                        "{} references unknown port {}",
                        lag.name, member
                    )));
                }
            }
        }

        let mut owned = HashSet::new();
        for member in self.lags.iter().flat_map(|l| &l.members) {
            if !owned.insert(member.as_str()) {
                return Err(LagError::Config(format!(
                    "port {} is listed in more than one LAG",
                    member
                )));
            }
        }

        Ok(())
    }

    /// Port table for the kernel gateway.
    pub fn port_mappings(&self) -> Vec<PortMapping> {
        self.ports
            .iter()
            .map(|p| PortMapping {
                name: p.name.clone(),
                ifindex: p.ifindex,
                location: NpuPort::new(self.daemon.npu_id, p.npu_port),
            })
            .collect()
    }

    /// Configuration requests that reproduce the bootstrap LAGs.
    ///
    /// The global entry comes first so new groups pick up the configured
    /// resilient-hash value.
    pub fn bootstrap_requests(&self) -> Vec<ConfigRequest> {
        let mut requests = vec![ConfigRequest::Global(KeyOpFieldsValues::set(
            GLOBAL_KEY,
            vec![field(fields::RESILIENT_HASH, self.daemon.resilient_hash.to_string())],
        ))];

        for lag in &self.lags {
            let mut fvs = vec![field(fields::IFINDEX, lag.ifindex.to_string())];
            if let Some(lag_id) = lag.lag_id {
                fvs.push(field(fields::LAG_ID, lag_id.to_string()));
            }
            if let Some(admin) = &lag.admin_status {
                fvs.push(field(fields::ADMIN_STATUS, admin.clone()));
            }
            if let Some(mac) = &lag.mac {
                fvs.push(field(fields::MAC, mac.clone()));
            }
            if let Some(mode) = &lag.mac_learn_mode {
                fvs.push(field(fields::MAC_LEARN_MODE, mode.clone()));
            }
            fvs.push(field(fields::MEMBERS, lag.members.join(",")));
            if !lag.blocked_members.is_empty() {
                fvs.push(field(fields::BLOCKED_MEMBERS, lag.blocked_members.join(",")));
            }
            requests.push(ConfigRequest::Lag(KeyOpFieldsValues::set(lag.name.clone(), fvs)));
        }
        requests
    }
}

fn field(name: &str, value: String) -> FieldValue {
    (name.to_string(), value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = r#"
[daemon]
npu_id = 1
resilient_hash = true
event_queue_depth = 64

[[ports]]
name = "Ethernet0"
ifindex = 10
npu_port = 1
link_up = true

[[ports]]
name = "Ethernet4"
ifindex = 11
npu_port = 2

[[lags]]
name = "PortChannel1"
ifindex = 100
admin_status = "up"
members = ["Ethernet0", "Ethernet4"]
blocked_members = ["Ethernet4"]
"#;

    #[test]
    fn test_default_config() {
        let config = LagMgrConfig::default();
        assert_eq!(config.daemon.npu_id, 0);
        assert!(!config.daemon.resilient_hash);
        assert!(!config.daemon.dry_run);
        assert_eq!(config.daemon.event_queue_depth, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let config = LagMgrConfig::parse(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.daemon.npu_id, 1);
        assert_eq!(config.daemon.event_queue_depth, 64);
        assert_eq!(config.ports.len(), 2);
        assert!(!config.ports[1].link_up);
        assert_eq!(config.lags[0].blocked_members, vec!["Ethernet4".to_string()]);
    }

    #[test]
    fn test_port_mappings_use_npu_id() {
        let config = LagMgrConfig::parse(SAMPLE).unwrap();
        let mappings = config.port_mappings();
        assert_eq!(mappings[0].location, NpuPort::new(1, 1));
        assert_eq!(mappings[1].ifindex, IfIndex::new(11));
    }

    #[test]
    fn test_bootstrap_requests() {
        let config = LagMgrConfig::parse(SAMPLE).unwrap();
        let requests = config.bootstrap_requests();
        assert_eq!(requests.len(), 2);

        match &requests[0] {
            ConfigRequest::Global(kfv) => {
                assert_eq!(kfv.get_field(fields::RESILIENT_HASH), Some("true"))
            }
            other => panic!("unexpected request {:?}", other),
        }
        match &requests[1] {
            ConfigRequest::Lag(kfv) => {
                assert_eq!(kfv.key, "PortChannel1");
                assert_eq!(kfv.get_field(fields::IFINDEX), Some("100"));
                assert_eq!(kfv.get_field(fields::MEMBERS), Some("Ethernet0,Ethernet4"));
                assert_eq!(kfv.get_field(fields::BLOCKED_MEMBERS), Some("Ethernet4"));
                assert!(!kfv.has_field(fields::MAC));
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_unknown_member() {
        let mut config = LagMgrConfig::parse(SAMPLE).unwrap();
        config.lags[0].members.push("Ethernet99".to_string());
        assert!(matches!(config.validate(), Err(LagError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = LagMgrConfig::parse(SAMPLE).unwrap();
        config.ports[1].ifindex = IfIndex::new(10);
        assert!(config.validate().is_err());

        let mut config = LagMgrConfig::parse(SAMPLE).unwrap();
        let mut second = config.lags[0].clone();
        second.name = "PortChannel2".to_string();
        second.ifindex = IfIndex::new(101);
        config.lags.push(second);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_queue_depth() {
        let mut config = LagMgrConfig::default();
        config.daemon.event_queue_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = LagMgrConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, LagMgrConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = LagMgrConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.lags[0].name, "PortChannel1");
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[daemon\nnpu_id = ").unwrap();
        assert!(matches!(
            LagMgrConfig::load_or_default(file.path()),
            Err(LagError::Config(_))
        ));
    }
}
