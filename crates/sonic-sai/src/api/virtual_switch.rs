//! In-memory virtual switch implementing [`LagApi`].
//!
//! Used when no hardware SAI is available (virtual switch images, dry runs
//! and tests). Object ids are allocated from a single counter and are never
//! handed out twice.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::api::lag::{LagApi, LinkState, MacLearnMode, NpuId, NpuPort};
use crate::error::{SaiError, SaiResult};
use crate::types::{LagMemberOid, LagOid, RawSaiObjectId};

/// SAI object type codes, stored in the upper bits of allocated ids.
const OBJECT_TYPE_LAG: RawSaiObjectId = 0x02;
const OBJECT_TYPE_LAG_MEMBER: RawSaiObjectId = 0x1b;
const OBJECT_TYPE_SHIFT: u32 = 48;

/// Callback invoked on every link state change of a port.
pub type LinkStateListener = Arc<dyn Fn(NpuPort, LinkState) + Send + Sync>;

/// Aggregate as seen by the virtual NPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualLag {
    pub resilient_hash: bool,
    pub learn_mode: MacLearnMode,
    pub member_count: usize,
}

/// Aggregate member as seen by the virtual NPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualLagMember {
    pub lag: LagOid,
    pub port: NpuPort,
    pub egress_disabled: bool,
}

#[derive(Debug, Default)]
struct VirtualState {
    lags: HashMap<LagOid, VirtualLag>,
    members: HashMap<LagMemberOid, VirtualLagMember>,
    links: HashMap<NpuPort, LinkState>,
    next_index: u64,
}

impl VirtualState {
    fn allocate(&mut self, object_type: RawSaiObjectId) -> RawSaiObjectId {
        self.next_index += 1;
        (object_type << OBJECT_TYPE_SHIFT) | self.next_index
    }
}

/// Virtual NPU holding aggregates, members and port link states.
pub struct VirtualLagApi {
    npu_id: NpuId,
    max_lags: usize,
    state: Mutex<VirtualState>,
    listener: Mutex<Option<LinkStateListener>>,
}

impl VirtualLagApi {
    pub fn new(npu_id: NpuId, max_lags: usize) -> Self {
        Self {
            npu_id,
            max_lags,
            state: Mutex::new(VirtualState::default()),
            listener: Mutex::new(None),
        }
    }

    pub fn npu_id(&self) -> NpuId {
        self.npu_id
    }

    /// Registers the callback that receives link state notifications.
    pub fn set_link_listener(&self, listener: LinkStateListener) {
        *self.listener.lock() = Some(listener);
    }

    pub fn clear_link_listener(&self) {
        self.listener.lock().take();
    }

    /// Changes the link state of a port and notifies the listener when the
    /// state actually changed.
    pub fn set_link_state(&self, port: NpuPort, link: LinkState) {
        let changed = {
            let mut state = self.state.lock();
            state.links.insert(port, link) != Some(link)
        };
        if !changed {
            return;
        }
        debug!("virtual switch: {} link {}", port, link);
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(port, link);
        }
    }

    pub fn lag(&self, lag: LagOid) -> Option<VirtualLag> {
        self.state.lock().lags.get(&lag).copied()
    }

    pub fn member(&self, member: LagMemberOid) -> Option<VirtualLagMember> {
        self.state.lock().members.get(&member).copied()
    }

    pub fn lag_count(&self) -> usize {
        self.state.lock().lags.len()
    }

    fn check_npu(&self, npu: NpuId) -> SaiResult<()> {
        if npu == self.npu_id {
            Ok(())
        } else {
            Err(SaiError::invalid_parameter(format!(
                "unknown NPU {} (virtual switch is NPU {})",
                npu, self.npu_id
            )))
        }
    }
}

impl LagApi for VirtualLagApi {
    fn create_lag(&self, npu: NpuId) -> SaiResult<LagOid> {
        self.check_npu(npu)?;
        let mut state = self.state.lock();
        if state.lags.len() >= self.max_lags {
            return Err(SaiError::table_full("LAG"));
        }
        let lag = LagOid::from_raw_unchecked(state.allocate(OBJECT_TYPE_LAG));
        state.lags.insert(
            lag,
            VirtualLag {
                resilient_hash: false,
                learn_mode: MacLearnMode::default(),
                member_count: 0,
            },
        );
        debug!("virtual switch: created {:?}", lag);
        Ok(lag)
    }

    fn remove_lag(&self, npu: NpuId, lag: LagOid) -> SaiResult<()> {
        self.check_npu(npu)?;
        let mut state = self.state.lock();
        let member_count = state
            .lags
            .get(&lag)
            .map(|entry| entry.member_count)
            .ok_or_else(|| SaiError::not_found(format!("{:?}", lag)))?;
        if member_count > 0 {
            return Err(SaiError::object_in_use(format!("{:?}", lag)));
        }
        state.lags.remove(&lag);
        debug!("virtual switch: removed {:?}", lag);
        Ok(())
    }

    fn create_lag_member(&self, npu: NpuId, lag: LagOid, port: NpuPort) -> SaiResult<LagMemberOid> {
        self.check_npu(npu)?;
        if port.npu_id != npu {
            return Err(SaiError::invalid_parameter(format!(
                "port {} is not on NPU {}",
                port, npu
            )));
        }
        let mut state = self.state.lock();
        if !state.lags.contains_key(&lag) {
            return Err(SaiError::not_found(format!("{:?}", lag)));
        }
        if state.members.values().any(|m| m.port == port) {
            return Err(SaiError::already_exists(format!("member for {}", port)));
        }

        let member = LagMemberOid::from_raw_unchecked(state.allocate(OBJECT_TYPE_LAG_MEMBER));
        state.members.insert(
            member,
            VirtualLagMember {
                lag,
                port,
                egress_disabled: false,
            },
        );
        if let Some(entry) = state.lags.get_mut(&lag) {
            entry.member_count += 1;
        }
        debug!("virtual switch: added {} to {:?} as {:?}", port, lag, member);
        Ok(member)
    }

    fn remove_lag_member(&self, npu: NpuId, member: LagMemberOid) -> SaiResult<()> {
        self.check_npu(npu)?;
        let mut state = self.state.lock();
        let removed = state
            .members
            .remove(&member)
            .ok_or_else(|| SaiError::not_found(format!("{:?}", member)))?;
        if let Some(entry) = state.lags.get_mut(&removed.lag) {
            entry.member_count = entry.member_count.saturating_sub(1);
        }
        Ok(())
    }

    fn set_member_egress_disable(
        &self,
        npu: NpuId,
        member: LagMemberOid,
        disabled: bool,
    ) -> SaiResult<()> {
        self.check_npu(npu)?;
        let mut state = self.state.lock();
        let entry = state
            .members
            .get_mut(&member)
            .ok_or_else(|| SaiError::not_found(format!("{:?}", member)))?;
        entry.egress_disabled = disabled;
        Ok(())
    }

    fn get_member_egress_disable(&self, npu: NpuId, member: LagMemberOid) -> SaiResult<bool> {
        self.check_npu(npu)?;
        self.state
            .lock()
            .members
            .get(&member)
            .map(|m| m.egress_disabled)
            .ok_or_else(|| SaiError::not_found(format!("{:?}", member)))
    }

    fn set_resilient_hash(&self, npu: NpuId, lag: LagOid, enabled: bool) -> SaiResult<()> {
        self.check_npu(npu)?;
        let mut state = self.state.lock();
        let entry = state
            .lags
            .get_mut(&lag)
            .ok_or_else(|| SaiError::not_found(format!("{:?}", lag)))?;
        entry.resilient_hash = enabled;
        Ok(())
    }

    fn set_learn_mode(&self, npu: NpuId, lag: LagOid, mode: MacLearnMode) -> SaiResult<()> {
        self.check_npu(npu)?;
        let mut state = self.state.lock();
        let entry = state
            .lags
            .get_mut(&lag)
            .ok_or_else(|| SaiError::not_found(format!("{:?}", lag)))?;
        entry.learn_mode = mode;
        Ok(())
    }

    fn get_port_link_state(&self, npu: NpuId, port: NpuPort) -> SaiResult<LinkState> {
        self.check_npu(npu)?;
        Ok(self
            .state
            .lock()
            .links
            .get(&port)
            .copied()
            .unwrap_or_default())
    }
}
