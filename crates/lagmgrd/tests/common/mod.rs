//! Shared test doubles for lagmgrd integration tests
//!
//! The hardware mock wraps the virtual NPU so object ids and member state
//! behave like the real thing, and records every mutating call. Both mocks
//! accept failure injection by operation name.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use sonic_cfgmgr_common::{CfgMgrError, CfgMgrResult};
use sonic_lagmgrd::{GroupEvent, IfIndex, KernelGateway, LagGroup, LagOrch, LagPublisher};
use sonic_sai::{
    LagApi, LagMemberOid, LagOid, LinkState, MacLearnMode, NpuId, NpuPort, SaiError, SaiResult,
    SaiStatus, VirtualLagApi,
};
use sonic_types::MacAddress;

pub const NPU: NpuId = 0;
pub const LAG: IfIndex = IfIndex::new(100);
pub const LAG2: IfIndex = IfIndex::new(200);

/// Front-panel port `n`, at hardware port `n` of NPU 0.
pub fn port(n: u32) -> IfIndex {
    IfIndex::new(n)
}

pub fn location(n: u32) -> NpuPort {
    NpuPort::new(NPU, n)
}

// ---- hardware ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwCall {
    CreateLag(LagOid),
    RemoveLag(LagOid),
    CreateMember {
        lag: LagOid,
        port: NpuPort,
        member: LagMemberOid,
    },
    RemoveMember(LagMemberOid),
    SetEgressDisable(LagMemberOid, bool),
    SetResilientHash(LagOid, bool),
    SetLearnMode(LagOid, MacLearnMode),
}

pub struct MockHardware {
    npu: VirtualLagApi,
    calls: Mutex<Vec<HwCall>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl MockHardware {
    pub fn new() -> Self {
        Self {
            npu: VirtualLagApi::new(NPU, 64),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Makes every later call of `op` fail.
    pub fn fail(&self, op: &'static str) {
        self.failing.lock().insert(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.failing.lock().remove(op);
    }

    pub fn calls(&self) -> Vec<HwCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn set_link(&self, n: u32, up: bool) {
        self.npu.set_link_state(location(n), LinkState::from_up(up));
    }

    pub fn npu(&self) -> &VirtualLagApi {
        &self.npu
    }

    fn check(&self, op: &'static str) -> SaiResult<()> {
        if self.failing.lock().contains(op) {
            Err(SaiError::from_status(SaiStatus::Failure))
        } else {
            Ok(())
        }
    }

    fn record(&self, call: HwCall) {
        self.calls.lock().push(call);
    }
}

impl LagApi for MockHardware {
    fn create_lag(&self, npu: NpuId) -> SaiResult<LagOid> {
        self.check("create_lag")?;
        let lag = self.npu.create_lag(npu)?;
        self.record(HwCall::CreateLag(lag));
        Ok(lag)
    }

    fn remove_lag(&self, npu: NpuId, lag: LagOid) -> SaiResult<()> {
        self.check("remove_lag")?;
        self.npu.remove_lag(npu, lag)?;
        self.record(HwCall::RemoveLag(lag));
        Ok(())
    }

    fn create_lag_member(&self, npu: NpuId, lag: LagOid, port: NpuPort) -> SaiResult<LagMemberOid> {
        self.check("create_lag_member")?;
        let member = self.npu.create_lag_member(npu, lag, port)?;
        self.record(HwCall::CreateMember { lag, port, member });
        Ok(member)
    }

    fn remove_lag_member(&self, npu: NpuId, member: LagMemberOid) -> SaiResult<()> {
        self.check("remove_lag_member")?;
        self.npu.remove_lag_member(npu, member)?;
        self.record(HwCall::RemoveMember(member));
        Ok(())
    }

    fn set_member_egress_disable(&self, npu: NpuId, member: LagMemberOid, disable: bool) -> SaiResult<()> {
        self.check("set_member_egress_disable")?;
        self.npu.set_member_egress_disable(npu, member, disable)?;
        self.record(HwCall::SetEgressDisable(member, disable));
        Ok(())
    }

    fn get_member_egress_disable(&self, npu: NpuId, member: LagMemberOid) -> SaiResult<bool> {
        self.check("get_member_egress_disable")?;
        self.npu.get_member_egress_disable(npu, member)
    }

    fn set_resilient_hash(&self, npu: NpuId, lag: LagOid, enabled: bool) -> SaiResult<()> {
        self.check("set_resilient_hash")?;
        self.npu.set_resilient_hash(npu, lag, enabled)?;
        self.record(HwCall::SetResilientHash(lag, enabled));
        Ok(())
    }

    fn set_learn_mode(&self, npu: NpuId, lag: LagOid, mode: MacLearnMode) -> SaiResult<()> {
        self.check("set_learn_mode")?;
        self.npu.set_learn_mode(npu, lag, mode)?;
        self.record(HwCall::SetLearnMode(lag, mode));
        Ok(())
    }

    fn get_port_link_state(&self, npu: NpuId, port: NpuPort) -> SaiResult<LinkState> {
        self.check("get_port_link_state")?;
        self.npu.get_port_link_state(npu, port)
    }
}

// ---- kernel ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelCall {
    Register(IfIndex, String),
    Deregister(IfIndex),
    Attach { bond: IfIndex, port: IfIndex },
    Detach { bond: IfIndex, port: IfIndex },
    SetAdmin(IfIndex, bool),
    SetMac(IfIndex, String),
    SetLearning(IfIndex, bool),
}

/// Kernel double. Enslaving or releasing a port takes it admin down, like
/// the bonding driver does, so admin preservation is observable.
pub struct MockKernel {
    ports: HashMap<IfIndex, NpuPort>,
    bonds: Mutex<HashMap<IfIndex, String>>,
    enslaved: Mutex<HashMap<IfIndex, IfIndex>>,
    admin: Mutex<HashMap<IfIndex, bool>>,
    calls: Mutex<Vec<KernelCall>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl MockKernel {
    /// Ports 1..=`count`.
    pub fn with_ports(count: u32) -> Self {
        Self {
            ports: (1..=count).map(|n| (port(n), location(n))).collect(),
            bonds: Mutex::new(HashMap::new()),
            enslaved: Mutex::new(HashMap::new()),
            admin: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().insert(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.failing.lock().remove(op);
    }

    pub fn calls(&self) -> Vec<KernelCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Attach/detach calls only.
    pub fn membership_calls(&self) -> Vec<KernelCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, KernelCall::Attach { .. } | KernelCall::Detach { .. }))
            .collect()
    }

    pub fn master_of(&self, port: IfIndex) -> Option<IfIndex> {
        self.enslaved.lock().get(&port).copied()
    }

    pub fn set_admin(&self, ifindex: IfIndex, up: bool) {
        self.admin.lock().insert(ifindex, up);
    }

    pub fn admin(&self, ifindex: IfIndex) -> bool {
        self.admin.lock().get(&ifindex).copied().unwrap_or(false)
    }

    pub fn is_registered(&self, ifindex: IfIndex) -> bool {
        self.bonds.lock().contains_key(&ifindex)
    }

    fn check(&self, op: &'static str) -> CfgMgrResult<()> {
        if self.failing.lock().contains(op) {
            Err(CfgMgrError::ShellCommandFailed {
                command: op.to_string(),
                exit_code: 2,
                output: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn record(&self, call: KernelCall) {
        self.calls.lock().push(call);
    }
}

impl KernelGateway for MockKernel {
    fn interface_registered(&self, name: &str) -> bool {
        self.bonds.lock().values().any(|b| b == name)
    }

    fn register_bond_interface(&self, ifindex: IfIndex, name: &str) -> CfgMgrResult<()> {
        self.check("register_bond_interface")?;
        self.bonds.lock().insert(ifindex, name.to_string());
        self.record(KernelCall::Register(ifindex, name.to_string()));
        Ok(())
    }

    fn deregister_bond_interface(&self, ifindex: IfIndex) -> CfgMgrResult<()> {
        self.check("deregister_bond_interface")?;
        self.bonds
            .lock()
            .remove(&ifindex)
            .ok_or_else(|| CfgMgrError::entry_not_found("BOND", ifindex.to_string()))?;
        self.record(KernelCall::Deregister(ifindex));
        Ok(())
    }

    fn attach_port_to_bond(&self, bond: IfIndex, port: IfIndex) -> CfgMgrResult<()> {
        self.check("attach_port_to_bond")?;
        if !self.is_registered(bond) {
            return Err(CfgMgrError::entry_not_found("BOND", bond.to_string()));
        }
        self.enslaved.lock().insert(port, bond);
        self.admin.lock().insert(port, false);
        self.record(KernelCall::Attach { bond, port });
        Ok(())
    }

    fn detach_port_from_bond(&self, bond: IfIndex, port: IfIndex) -> CfgMgrResult<()> {
        self.check("detach_port_from_bond")?;
        self.enslaved.lock().remove(&port);
        self.admin.lock().insert(port, false);
        self.record(KernelCall::Detach { bond, port });
        Ok(())
    }

    fn resolve_port_location(&self, port: IfIndex) -> CfgMgrResult<NpuPort> {
        self.check("resolve_port_location")?;
        self.ports
            .get(&port)
            .copied()
            .ok_or_else(|| CfgMgrError::port_not_ready(port.to_string()))
    }

    fn resolve_port_ifindex(&self, location: NpuPort) -> Option<IfIndex> {
        self.ports
            .iter()
            .find(|(_, loc)| **loc == location)
            .map(|(ifindex, _)| *ifindex)
    }

    fn admin_state(&self, ifindex: IfIndex) -> CfgMgrResult<bool> {
        self.check("admin_state")?;
        Ok(self.admin(ifindex))
    }

    fn set_admin_state(&self, ifindex: IfIndex, up: bool) -> CfgMgrResult<()> {
        self.check("set_admin_state")?;
        self.admin.lock().insert(ifindex, up);
        self.record(KernelCall::SetAdmin(ifindex, up));
        Ok(())
    }

    fn set_mac_address(&self, ifindex: IfIndex, mac: &MacAddress) -> CfgMgrResult<()> {
        self.check("set_mac_address")?;
        self.record(KernelCall::SetMac(ifindex, mac.to_string()));
        Ok(())
    }

    fn set_mac_learning(&self, ifindex: IfIndex, enabled: bool) -> CfgMgrResult<()> {
        self.check("set_mac_learning")?;
        self.record(KernelCall::SetLearning(ifindex, enabled));
        Ok(())
    }
}

// ---- publisher ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    Group(GroupEvent, IfIndex),
    Oper(IfIndex, bool),
}

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Published>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<Published> {
        self.events.lock().clone()
    }

    pub fn oper_events(&self) -> Vec<Published> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Published::Oper(..)))
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl LagPublisher for RecordingPublisher {
    fn publish_group_state(&self, event: GroupEvent, group: &LagGroup) {
        self.events.lock().push(Published::Group(event, group.ifindex));
    }

    fn publish_oper_status(&self, group: &LagGroup, up: bool) {
        self.events.lock().push(Published::Oper(group.ifindex, up));
    }
}

// ---- fixture ----

pub struct Fixture {
    pub hw: Arc<MockHardware>,
    pub kernel: Arc<MockKernel>,
    pub publisher: Arc<RecordingPublisher>,
    pub orch: LagOrch,
}

impl Fixture {
    pub fn new() -> Self {
        let hw = Arc::new(MockHardware::new());
        let kernel = Arc::new(MockKernel::with_ports(8));
        let publisher = Arc::new(RecordingPublisher::default());
        let orch = LagOrch::new(NPU, hw.clone(), kernel.clone(), publisher.clone());
        Self {
            hw,
            kernel,
            publisher,
            orch,
        }
    }

    /// Fixture with `PortChannel1` (ifindex 100) created and logs cleared.
    pub fn with_lag() -> Self {
        let fx = Self::new();
        fx.orch.create_group(LAG, "PortChannel1", None).unwrap();
        fx.clear();
        fx
    }

    pub fn clear(&self) {
        self.hw.clear_calls();
        self.kernel.clear_calls();
        self.publisher.clear();
    }

    pub fn lag_handle(&self, ifindex: IfIndex) -> LagOid {
        self.orch.lookup_group(ifindex).unwrap().hardware_handle
    }

    pub fn member_handle(&self, port: IfIndex) -> LagMemberOid {
        self.orch.lookup_member(port).unwrap().hardware_member_handle
    }

    /// Hardware egress-disable state as held by the virtual NPU.
    pub fn egress_disabled(&self, port: IfIndex) -> bool {
        self.hw
            .npu()
            .member(self.member_handle(port))
            .unwrap()
            .egress_disabled
    }
}
