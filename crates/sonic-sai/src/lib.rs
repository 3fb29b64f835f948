//! Safe Rust bindings for the SAI (Switch Abstraction Interface) LAG objects.
//!
//! This crate keeps aggregate and aggregate-member handles in separate
//! types and exposes the LAG programming calls as a trait, so the control
//! plane can run against real hardware or the in-memory virtual switch.
//!
//! - [`types`]: type-safe object IDs
//! - [`error`]: status codes and [`SaiError`]
//! - [`api`]: [`LagApi`] and [`VirtualLagApi`]
//!
//! # Example
//!
//! ```
//! use sonic_sai::{LagApi, NpuPort, VirtualLagApi};
//!
//! let npu = VirtualLagApi::new(0, 16);
//! let lag = npu.create_lag(0).unwrap();
//! let member = npu.create_lag_member(0, lag, NpuPort::new(0, 1)).unwrap();
//! npu.set_member_egress_disable(0, member, true).unwrap();
//! assert!(npu.get_member_egress_disable(0, member).unwrap());
//! ```

pub mod api;
pub mod error;
pub mod types;

pub use api::{
    LagApi, LinkState, LinkStateListener, MacLearnMode, NpuId, NpuPort, VirtualLag,
    VirtualLagApi, VirtualLagMember,
};
pub use error::{SaiError, SaiResult, SaiStatus};
pub use types::{LagKind, LagMemberKind, LagMemberOid, LagOid, RawSaiObjectId, SaiObjectId, SaiObjectKind};
