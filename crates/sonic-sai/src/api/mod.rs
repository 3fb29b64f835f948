//! SAI API surfaces used by the LAG manager.
//!
//! - [`lag`]: the [`LagApi`] hardware gateway trait and its value types
//! - [`virtual_switch`]: [`VirtualLagApi`], an in-memory NPU

pub mod lag;
pub mod virtual_switch;

pub use lag::{LagApi, LinkState, MacLearnMode, NpuId, NpuPort};
pub use virtual_switch::{LinkStateListener, VirtualLag, VirtualLagApi, VirtualLagMember};
