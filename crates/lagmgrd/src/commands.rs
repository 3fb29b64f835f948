//! Shell command builders for bond membership and link attributes

use sonic_cfgmgr_common::shell;

/// Build enslave command (`ip link set dev PORT master BOND`)
pub fn build_attach_cmd(port: &str, bond: &str) -> String {
    format!(
        "{} link set dev {} master {}",
        shell::IP_CMD,
        shell::shellquote(port),
        shell::shellquote(bond)
    )
}

/// Build release command
pub fn build_detach_cmd(port: &str) -> String {
    format!(
        "{} link set dev {} nomaster",
        shell::IP_CMD,
        shell::shellquote(port)
    )
}

/// Build admin up/down command
pub fn build_set_admin_cmd(name: &str, up: bool) -> String {
    format!(
        "{} link set dev {} {}",
        shell::IP_CMD,
        shell::shellquote(name),
        if up { "up" } else { "down" }
    )
}

pub fn build_set_mac_cmd(name: &str, mac: &str) -> String {
    format!(
        "{} link set dev {} address {}",
        shell::IP_CMD,
        shell::shellquote(name),
        shell::shellquote(mac)
    )
}

/// Build FDB learning toggle for a bond
pub fn build_set_learning_cmd(name: &str, enabled: bool) -> String {
    format!(
        "{} link set dev {} learning {}",
        shell::BRIDGE_CMD,
        shell::shellquote(name),
        if enabled { "on" } else { "off" }
    )
}

/// Build single-interface link query (one line per interface)
pub fn build_show_link_cmd(name: &str) -> String {
    format!("{} -o link show dev {}", shell::IP_CMD, shell::shellquote(name))
}

/// Extracts the administrative state from `ip -o link show` output.
///
/// The admin flag is the `UP` entry inside the `<...>` flag list, e.g.
/// `2: Ethernet0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 9100 ...`.
pub fn parse_admin_up(output: &str) -> Option<bool> {
    let start = output.find('<')?;
    let end = start + output[start..].find('>')?;
    Some(output[start + 1..end].split(',').any(|flag| flag == "UP"))
}
