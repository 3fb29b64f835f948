//! lagmgrd - LAG (port-channel) state manager daemon for SONiC
//!
//! Keeps the authoritative mapping between bonded interfaces and their
//! member ports, programs the NPU aggregate through [`sonic_sai::LagApi`],
//! enslaves ports at kernel level, and derives each LAG's oper status from
//! its members' link state.
//!
//! [`LagOrch`] is the entry point. It serializes configuration requests,
//! kernel association events and hardware link callbacks through a single
//! lock over the [`LagRegistry`].

mod commands;
mod config;
mod config_table;
mod error;
mod events;
mod gateway;
mod group;
mod kernel;
mod kernel_watch;
mod orch;
mod publisher;
mod registry;
mod types;

pub use commands::*;
pub use config::{DaemonConfig, LagConfig, LagMgrConfig, PortConfig, DEFAULT_CONFIG_PATH};
pub use config_table::{
    fields, ConfigRequest, LagConfigTable, CFG_LAG_GLOBAL_TABLE_NAME, CFG_LAG_TABLE_NAME,
    GLOBAL_KEY,
};
pub use error::{LagError, Result};
pub use events::{EventSenders, EventWorkers, HardwareEvent, KernelEvent};
pub use gateway::{KernelGateway, LagPublisher};
pub use group::{LagGroup, LagMember, LagState};
pub use kernel::{PortMapping, ShellKernelGateway};
pub use kernel_watch::{parse_link_updates, KernelWatcher, LinkSocket, LinkUpdate};
pub use orch::LagOrch;
pub use publisher::{ChannelPublisher, LagNotification, TracingPublisher};
pub use registry::{LagRegistry, LagStats, OperTransition};
pub use types::{
    parse_admin_status, validate_lag_name, GroupEvent, IfIndex, LagId, PortAssociation, IFNAMSIZ,
};
