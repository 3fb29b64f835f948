//! Shell-backed kernel gateway.
//!
//! Bonds are created outside this daemon (by teamd or the operator); the
//! gateway keeps an in-process table of the ones handed to it and drives
//! enslavement and link attributes through `ip`/`bridge`. In dry-run mode
//! commands are recorded instead of executed and admin state is tracked
//! in memory.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use sonic_cfgmgr_common::{shell, CfgMgrError, CfgMgrResult};
use sonic_sai::NpuPort;
use sonic_types::MacAddress;

use crate::commands::{
    build_attach_cmd, build_detach_cmd, build_set_admin_cmd, build_set_learning_cmd,
    build_set_mac_cmd, build_show_link_cmd, parse_admin_up,
};
use crate::gateway::KernelGateway;
use crate::types::IfIndex;

/// A front-panel port known to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub name: String,
    pub ifindex: IfIndex,
    pub location: NpuPort,
}

pub struct ShellKernelGateway {
    ports: HashMap<IfIndex, PortMapping>,
    locations: HashMap<NpuPort, IfIndex>,
    bonds: RwLock<HashMap<IfIndex, String>>,
    dry_run: bool,
    recorded: Mutex<Vec<String>>,
    admin: Mutex<HashMap<IfIndex, bool>>,
}

impl ShellKernelGateway {
    pub fn new(ports: impl IntoIterator<Item = PortMapping>, dry_run: bool) -> Self {
        let ports: HashMap<IfIndex, PortMapping> =
            ports.into_iter().map(|p| (p.ifindex, p)).collect();
        let locations = ports.values().map(|p| (p.location, p.ifindex)).collect();
        Self {
            ports,
            locations,
            bonds: RwLock::new(HashMap::new()),
            dry_run,
            recorded: Mutex::new(Vec::new()),
            admin: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Commands issued so far in dry-run mode.
    pub fn recorded_commands(&self) -> Vec<String> {
        self.recorded.lock().clone()
    }

    /// Resolves a port or registered bond name.
    pub fn ifindex_of(&self, name: &str) -> Option<IfIndex> {
        self.ports
            .values()
            .find(|p| p.name == name)
            .map(|p| p.ifindex)
            .or_else(|| {
                self.bonds
                    .read()
                    .iter()
                    .find(|(_, bond)| bond.as_str() == name)
                    .map(|(ifindex, _)| *ifindex)
            })
    }

    pub fn is_port(&self, ifindex: IfIndex) -> bool {
        self.ports.contains_key(&ifindex)
    }

    pub fn is_bond(&self, ifindex: IfIndex) -> bool {
        self.bonds.read().contains_key(&ifindex)
    }

    /// Name of a port or registered bond.
    pub fn name_of(&self, ifindex: IfIndex) -> Option<String> {
        self.ports
            .get(&ifindex)
            .map(|p| p.name.clone())
            .or_else(|| self.bonds.read().get(&ifindex).cloned())
    }

    fn port_name(&self, port: IfIndex) -> CfgMgrResult<&str> {
        self.ports
            .get(&port)
            .map(|p| p.name.as_str())
            .ok_or_else(|| CfgMgrError::port_not_ready(port.to_string()))
    }

    fn bond_name(&self, bond: IfIndex) -> CfgMgrResult<String> {
        self.bonds
            .read()
            .get(&bond)
            .cloned()
            .ok_or_else(|| CfgMgrError::entry_not_found("BOND", bond.to_string()))
    }

    fn interface_name(&self, ifindex: IfIndex) -> CfgMgrResult<String> {
        self.name_of(ifindex)
            .ok_or_else(|| CfgMgrError::port_not_ready(ifindex.to_string()))
    }

    fn run(&self, cmd: &str) -> CfgMgrResult<String> {
        if self.dry_run {
            debug!(command = %cmd, "dry-run");
            self.recorded.lock().push(cmd.to_string());
            return Ok(String::new());
        }
        shell::exec_blocking_or_throw(cmd)
    }
}

impl KernelGateway for ShellKernelGateway {
    fn interface_registered(&self, name: &str) -> bool {
        self.bonds.read().values().any(|bond| bond == name)
    }

    fn register_bond_interface(&self, ifindex: IfIndex, name: &str) -> CfgMgrResult<()> {
        {
            let bonds = self.bonds.read();
            if bonds.contains_key(&ifindex) || bonds.values().any(|b| b == name) {
                return Err(CfgMgrError::already_registered(name));
            }
        }
        if self.ports.contains_key(&ifindex) {
            return Err(CfgMgrError::invalid_config(
                "ifindex",
                format!("{} belongs to port {}", ifindex, self.port_name(ifindex)?),
            ));
        }

        if !self.dry_run {
            shell::exec_blocking_or_throw(&build_show_link_cmd(name))
                .map_err(|_| CfgMgrError::port_not_ready(name))?;
        }

        self.bonds.write().insert(ifindex, name.to_string());
        info!(bond = %name, %ifindex, "Registered bond interface");
        Ok(())
    }

    fn deregister_bond_interface(&self, ifindex: IfIndex) -> CfgMgrResult<()> {
        let name = self
            .bonds
            .write()
            .remove(&ifindex)
            .ok_or_else(|| CfgMgrError::entry_not_found("BOND", ifindex.to_string()))?;
        info!(bond = %name, %ifindex, "Deregistered bond interface");
        Ok(())
    }

    fn attach_port_to_bond(&self, bond: IfIndex, port: IfIndex) -> CfgMgrResult<()> {
        let bond = self.bond_name(bond)?;
        let port = self.port_name(port)?;
        self.run(&build_attach_cmd(port, &bond)).map(|_| ())
    }

    fn detach_port_from_bond(&self, bond: IfIndex, port: IfIndex) -> CfgMgrResult<()> {
        self.bond_name(bond)?;
        let port = self.port_name(port)?;
        self.run(&build_detach_cmd(port)).map(|_| ())
    }

    fn resolve_port_location(&self, port: IfIndex) -> CfgMgrResult<NpuPort> {
        self.ports
            .get(&port)
            .map(|p| p.location)
            .ok_or_else(|| CfgMgrError::port_not_ready(port.to_string()))
    }

    fn resolve_port_ifindex(&self, location: NpuPort) -> Option<IfIndex> {
        self.locations.get(&location).copied()
    }

    fn admin_state(&self, ifindex: IfIndex) -> CfgMgrResult<bool> {
        let name = self.interface_name(ifindex)?;
        if self.dry_run {
            return Ok(self.admin.lock().get(&ifindex).copied().unwrap_or(false));
        }
        let cmd = build_show_link_cmd(&name);
        let output = shell::exec_blocking_or_throw(&cmd)?;
        parse_admin_up(&output).ok_or_else(|| {
            CfgMgrError::internal(format!("unparsable link output for {}: {}", name, output))
        })
    }

    fn set_admin_state(&self, ifindex: IfIndex, up: bool) -> CfgMgrResult<()> {
        let name = self.interface_name(ifindex)?;
        self.run(&build_set_admin_cmd(&name, up))?;
        if self.dry_run {
            self.admin.lock().insert(ifindex, up);
        }
        Ok(())
    }

    fn set_mac_address(&self, ifindex: IfIndex, mac: &MacAddress) -> CfgMgrResult<()> {
        let name = self.interface_name(ifindex)?;
        self.run(&build_set_mac_cmd(&name, &mac.to_string())).map(|_| ())
    }

    fn set_mac_learning(&self, ifindex: IfIndex, enabled: bool) -> CfgMgrResult<()> {
        let name = self.interface_name(ifindex)?;
        self.run(&build_set_learning_cmd(&name, enabled)).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gateway() -> ShellKernelGateway {
        ShellKernelGateway::new(
            vec![
                PortMapping {
                    name: "Ethernet0".to_string(),
                    ifindex: IfIndex::new(10),
                    location: NpuPort::new(0, 1),
                },
                PortMapping {
                    name: "Ethernet4".to_string(),
                    ifindex: IfIndex::new(11),
                    location: NpuPort::new(0, 2),
                },
            ],
            true,
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let gw = gateway();
        gw.register_bond_interface(IfIndex::new(100), "PortChannel1").unwrap();

        assert!(gw.interface_registered("PortChannel1"));
        assert_eq!(gw.ifindex_of("PortChannel1"), Some(IfIndex::new(100)));
        assert_eq!(gw.ifindex_of("Ethernet4"), Some(IfIndex::new(11)));
        assert!(matches!(
            gw.register_bond_interface(IfIndex::new(101), "PortChannel1"),
            Err(CfgMgrError::AlreadyRegistered { .. })
        ));

        gw.deregister_bond_interface(IfIndex::new(100)).unwrap();
        assert!(!gw.interface_registered("PortChannel1"));
        assert!(gw.deregister_bond_interface(IfIndex::new(100)).is_err());
    }

    #[test]
    fn test_port_ifindex_cannot_be_bond() {
        let gw = gateway();
        assert!(gw.register_bond_interface(IfIndex::new(10), "PortChannel1").is_err());
    }

    #[test]
    fn test_attach_detach_commands() {
        let gw = gateway();
        gw.register_bond_interface(IfIndex::new(100), "PortChannel1").unwrap();
        gw.attach_port_to_bond(IfIndex::new(100), IfIndex::new(10)).unwrap();
        gw.detach_port_from_bond(IfIndex::new(100), IfIndex::new(10)).unwrap();

        assert_eq!(
            gw.recorded_commands(),
            vec![
                r#"/sbin/ip link set dev "Ethernet0" master "PortChannel1""#.to_string(),
                r#"/sbin/ip link set dev "Ethernet0" nomaster"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_attach_unknown_port() {
        let gw = gateway();
        gw.register_bond_interface(IfIndex::new(100), "PortChannel1").unwrap();
        let err = gw
            .attach_port_to_bond(IfIndex::new(100), IfIndex::new(99))
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(gw
            .attach_port_to_bond(IfIndex::new(200), IfIndex::new(10))
            .is_err());
    }

    #[test]
    fn test_port_location_mapping() {
        let gw = gateway();
        assert_eq!(
            gw.resolve_port_location(IfIndex::new(11)).unwrap(),
            NpuPort::new(0, 2)
        );
        assert_eq!(gw.resolve_port_ifindex(NpuPort::new(0, 1)), Some(IfIndex::new(10)));
        assert_eq!(gw.resolve_port_ifindex(NpuPort::new(1, 1)), None);
    }

    #[test]
    fn test_dry_run_admin_state() {
        let gw = gateway();
        assert!(!gw.admin_state(IfIndex::new(10)).unwrap());
        gw.set_admin_state(IfIndex::new(10), true).unwrap();
        assert!(gw.admin_state(IfIndex::new(10)).unwrap());
        assert_eq!(
            gw.recorded_commands(),
            vec![r#"/sbin/ip link set dev "Ethernet0" up"#.to_string()]
        );
    }

    #[test]
    fn test_learning_and_mac() {
        let gw = gateway();
        gw.register_bond_interface(IfIndex::new(100), "PortChannel1").unwrap();
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        gw.set_mac_address(IfIndex::new(100), &mac).unwrap();
        gw.set_mac_learning(IfIndex::new(100), false).unwrap();

        let cmds = gw.recorded_commands();
        assert!(cmds[0].ends_with(r#"address "00:11:22:33:44:55""#));
        assert!(cmds[1].ends_with("learning off"));
    }
}
