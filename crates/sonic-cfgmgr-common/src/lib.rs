//! Common infrastructure for SONiC configuration manager daemons.
//!
//! - [`shell`]: shell command execution with proper quoting
//! - [`error`]: error types for operations on the Linux network stack
//!
//! # Example
//!
//! ```ignore
//! use sonic_cfgmgr_common::{
//!     shell::{self, IP_CMD, shellquote},
//!     CfgMgrResult,
//! };
//!
//! fn set_admin_down(alias: &str) -> CfgMgrResult<()> {
//!     let cmd = format!("{} link set dev {} down", IP_CMD, shellquote(alias));
//!     shell::exec_blocking_or_throw(&cmd)?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod shell;

pub use error::{CfgMgrError, CfgMgrResult};
