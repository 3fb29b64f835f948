//! Configuration table processing over the virtual NPU and a dry-run kernel

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use sonic_lagmgrd::{
    build_attach_cmd, build_detach_cmd, build_set_mac_cmd, fields, ChannelPublisher, ConfigRequest,
    EventWorkers, GroupEvent, IfIndex, KernelGateway, LagConfigTable, LagMgrConfig, LagNotification,
    LagOrch, PortMapping, ShellKernelGateway, GLOBAL_KEY,
};
use sonic_orch_common::{KeyOpFieldsValues, TaskStatus};
use sonic_sai::{LinkState, MacLearnMode, NpuPort, VirtualLagApi};

const PORTS: [&str; 4] = ["Ethernet0", "Ethernet4", "Ethernet8", "Ethernet12"];

fn eth(n: usize) -> IfIndex {
    IfIndex::new(10 + n as u32)
}

struct Daemon {
    npu: Arc<VirtualLagApi>,
    kernel: Arc<ShellKernelGateway>,
    table: LagConfigTable,
    notifications: UnboundedReceiver<LagNotification>,
}

impl Daemon {
    fn new() -> Self {
        let npu = Arc::new(VirtualLagApi::new(0, 16));
        let mappings: Vec<PortMapping> = PORTS
            .iter()
            .enumerate()
            .map(|(n, name)| PortMapping {
                name: name.to_string(),
                ifindex: eth(n),
                location: NpuPort::new(0, n as u32 + 1),
            })
            .collect();
        let names: Vec<(String, IfIndex)> =
            mappings.iter().map(|m| (m.name.clone(), m.ifindex)).collect();
        let kernel = Arc::new(ShellKernelGateway::new(mappings, true));
        let (tx, notifications) = mpsc::unbounded_channel();
        let orch = Arc::new(LagOrch::new(
            0,
            npu.clone(),
            kernel.clone(),
            Arc::new(ChannelPublisher::new(tx)),
        ));
        Self {
            npu,
            kernel,
            table: LagConfigTable::new(orch, names),
            notifications,
        }
    }

    fn orch(&self) -> &LagOrch {
        self.table.orch()
    }

    fn apply(&self, key: &str, fvs: &[(&str, &str)]) -> TaskStatus {
        let fvs = fvs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect();
        self.table
            .process(&ConfigRequest::Lag(KeyOpFieldsValues::set(key, fvs)))
    }

    fn remove(&self, key: &str) -> TaskStatus {
        self.table
            .process(&ConfigRequest::Lag(KeyOpFieldsValues::del(key)))
    }

    fn drain(&mut self) -> Vec<LagNotification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }
}

#[test]
fn test_set_creates_group_with_members() {
    let mut d = Daemon::new();
    d.npu.set_link_state(NpuPort::new(0, 1), LinkState::Up);

    let status = d.apply(
        "PortChannel1",
        &[
            (fields::IFINDEX, "100"),
            (fields::ADMIN_STATUS, "up"),
            (fields::MEMBERS, "Ethernet0,Ethernet4"),
        ],
    );
    assert_eq!(status, TaskStatus::Success);

    let group = d.orch().lookup_group_by_name("PortChannel1").unwrap();
    assert_eq!(group.ifindex, IfIndex::new(100));
    assert_eq!(group.lag_id.as_u32(), 1);
    assert!(group.admin_status);
    assert!(group.oper_status);
    assert_eq!(
        group.members.iter().copied().collect::<Vec<_>>(),
        vec![eth(0), eth(1)]
    );

    let commands = d.kernel.recorded_commands();
    assert!(commands.contains(&build_attach_cmd("Ethernet0", "PortChannel1")));
    assert!(commands.contains(&build_attach_cmd("Ethernet4", "PortChannel1")));

    let notifications = d.drain();
    assert!(matches!(
        notifications.first(),
        Some(LagNotification::GroupState {
            event: GroupEvent::Created,
            ..
        })
    ));
    assert!(notifications.contains(&LagNotification::OperStatus {
        ifindex: IfIndex::new(100),
        name: "PortChannel1".to_string(),
        up: true,
    }));
}

#[test]
fn test_member_list_update() {
    let d = Daemon::new();
    d.apply(
        "PortChannel1",
        &[(fields::IFINDEX, "100"), (fields::MEMBERS, "Ethernet0,Ethernet4")],
    );

    let status = d.apply("PortChannel1", &[(fields::MEMBERS, "Ethernet4,Ethernet8")]);
    assert_eq!(status, TaskStatus::Success);

    let group = d.orch().lookup_group(IfIndex::new(100)).unwrap();
    assert_eq!(
        group.members.iter().copied().collect::<Vec<_>>(),
        vec![eth(1), eth(2)]
    );
    assert!(d
        .kernel
        .recorded_commands()
        .contains(&build_detach_cmd("Ethernet0")));

    // Numeric ifindexes are accepted in member lists.
    let status = d.apply("PortChannel1", &[(fields::MEMBERS, "13")]);
    assert_eq!(status, TaskStatus::Success);
    assert_eq!(d.orch().owner_of(eth(3)), Some(IfIndex::new(100)));
    assert_eq!(d.orch().owner_of(eth(1)), None);
}

#[test]
fn test_blocked_members_join_blocked() {
    let d = Daemon::new();
    let status = d.apply(
        "PortChannel1",
        &[
            (fields::IFINDEX, "100"),
            (fields::BLOCKED_MEMBERS, "Ethernet4"),
            (fields::MEMBERS, "Ethernet0,Ethernet4"),
        ],
    );
    assert_eq!(status, TaskStatus::Success);

    let group = d.orch().lookup_group(IfIndex::new(100)).unwrap();
    assert!(group.is_blocked(eth(1)));
    assert!(!group.is_blocked(eth(0)));
    let commands = d.kernel.recorded_commands();
    assert!(!commands.contains(&build_attach_cmd("Ethernet4", "PortChannel1")));

    let status = d.apply("PortChannel1", &[(fields::UNBLOCKED_MEMBERS, "Ethernet4")]);
    assert_eq!(status, TaskStatus::Success);
    assert!(!d.orch().lookup_group(IfIndex::new(100)).unwrap().is_blocked(eth(1)));
    assert!(d
        .kernel
        .recorded_commands()
        .contains(&build_attach_cmd("Ethernet4", "PortChannel1")));
}

#[test]
fn test_attributes_applied() {
    let d = Daemon::new();
    let status = d.apply(
        "PortChannel1",
        &[
            (fields::IFINDEX, "100"),
            (fields::LAG_ID, "42"),
            (fields::MAC, "00:AA:BB:CC:DD:EE"),
            (fields::MAC_LEARN_MODE, "disable"),
        ],
    );
    assert_eq!(status, TaskStatus::Success);

    let group = d.orch().lookup_group(IfIndex::new(100)).unwrap();
    assert_eq!(group.lag_id.as_u32(), 42);
    assert_eq!(group.mac_address, "00:aa:bb:cc:dd:ee");
    assert_eq!(group.mac_learn_mode, MacLearnMode::Disable);
    assert!(d
        .kernel
        .recorded_commands()
        .contains(&build_set_mac_cmd("PortChannel1", "00:aa:bb:cc:dd:ee")));
    let hw = d.npu.lag(group.hardware_handle).unwrap();
    assert_eq!(hw.learn_mode, MacLearnMode::Disable);
}

#[test]
fn test_invalid_entries() {
    let d = Daemon::new();
    assert_eq!(
        d.apply("PortChannel1", &[(fields::MEMBERS, "Ethernet0")]),
        TaskStatus::InvalidEntry
    );
    assert_eq!(
        d.apply("PortChannel1", &[(fields::IFINDEX, "abc")]),
        TaskStatus::InvalidEntry
    );
    assert!(d.orch().all_groups().is_empty());

    assert_eq!(
        d.apply("PortChannel1", &[(fields::IFINDEX, "100")]),
        TaskStatus::Success
    );
    assert_eq!(
        d.apply("PortChannel1", &[(fields::IFINDEX, "101")]),
        TaskStatus::InvalidEntry
    );
    assert_eq!(
        d.apply("PortChannel1", &[(fields::MAC, "01:00:5e:00:00:01")]),
        TaskStatus::InvalidEntry
    );
    assert_eq!(
        d.apply("PortChannel1", &[(fields::MAC_LEARN_MODE, "sometimes")]),
        TaskStatus::InvalidEntry
    );
    assert_eq!(
        d.apply("PortChannel1", &[(fields::ADMIN_STATUS, "sideways")]),
        TaskStatus::InvalidEntry
    );
}

#[test]
fn test_unknown_port_needs_retry() {
    let d = Daemon::new();
    d.apply("PortChannel1", &[(fields::IFINDEX, "100")]);

    assert_eq!(
        d.apply("PortChannel1", &[(fields::MEMBERS, "Ethernet96")]),
        TaskStatus::NeedRetry
    );
    // A numeric ifindex the kernel does not know is not ready yet either.
    assert_eq!(
        d.apply("PortChannel1", &[(fields::MEMBERS, "77")]),
        TaskStatus::NeedRetry
    );
    assert!(d
        .orch()
        .lookup_group(IfIndex::new(100))
        .unwrap()
        .members
        .is_empty());
}

#[test]
fn test_del_removes_group() {
    let mut d = Daemon::new();
    d.apply(
        "PortChannel1",
        &[(fields::IFINDEX, "100"), (fields::MEMBERS, "Ethernet0")],
    );
    d.drain();

    assert_eq!(d.remove("PortChannel1"), TaskStatus::Success);
    assert!(d.orch().lookup_group_by_name("PortChannel1").is_none());
    assert_eq!(d.orch().owner_of(eth(0)), None);
    assert!(!d.kernel.interface_registered("PortChannel1"));
    assert_eq!(d.npu.lag_count(), 0);
    assert!(matches!(
        d.drain().last(),
        Some(LagNotification::GroupState {
            event: GroupEvent::Deleted,
            ..
        })
    ));

    assert_eq!(d.remove("PortChannel1"), TaskStatus::Ignore);
}

#[test]
fn test_global_resilient_hash() {
    let d = Daemon::new();
    d.apply("PortChannel1", &[(fields::IFINDEX, "100")]);
    let handle = d.orch().lookup_group(IfIndex::new(100)).unwrap().hardware_handle;

    let set = |value: &str| {
        d.table.process(&ConfigRequest::Global(KeyOpFieldsValues::set(
            GLOBAL_KEY,
            vec![(fields::RESILIENT_HASH.to_string(), value.to_string())],
        )))
    };
    assert_eq!(set("true"), TaskStatus::Success);
    assert!(d.orch().resilient_hash());
    assert!(d.npu.lag(handle).unwrap().resilient_hash);

    assert_eq!(set("bogus"), TaskStatus::InvalidEntry);
    assert!(d.orch().resilient_hash());

    let status = d
        .table
        .process(&ConfigRequest::Global(KeyOpFieldsValues::del(GLOBAL_KEY)));
    assert_eq!(status, TaskStatus::Success);
    assert!(!d.npu.lag(handle).unwrap().resilient_hash);

    let status = d
        .table
        .process(&ConfigRequest::Global(KeyOpFieldsValues::del("OTHER")));
    assert_eq!(status, TaskStatus::Ignore);
}

fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_event_workers_apply_bootstrap_and_link_events() {
    let config = LagMgrConfig::parse(
        r#"
[daemon]
dry_run = true
resilient_hash = true
event_queue_depth = 8

[[ports]]
name = "Ethernet0"
ifindex = 10
npu_port = 1

[[ports]]
name = "Ethernet4"
ifindex = 11
npu_port = 2

[[lags]]
name = "PortChannel5"
ifindex = 105
members = ["Ethernet0", "Ethernet4"]
blocked_members = ["Ethernet4"]
"#,
    )
    .unwrap();
    config.validate().unwrap();

    let npu = Arc::new(VirtualLagApi::new(0, 4));
    let kernel = Arc::new(ShellKernelGateway::new(config.port_mappings(), true));
    let (tx, _rx) = mpsc::unbounded_channel();
    let orch = Arc::new(LagOrch::new(
        0,
        npu.clone(),
        kernel.clone(),
        Arc::new(ChannelPublisher::new(tx)),
    ));
    let names = config.ports.iter().map(|p| (p.name.clone(), p.ifindex));
    let table = Arc::new(LagConfigTable::new(orch.clone(), names));

    let (senders, workers) = EventWorkers::spawn(table, config.daemon.event_queue_depth).unwrap();
    npu.set_link_listener(senders.link_listener(orch.clone()));

    for request in config.bootstrap_requests() {
        senders.config.blocking_send(request).unwrap();
    }
    let lag = IfIndex::new(105);
    wait_for("bootstrap", || {
        orch.lookup_group(lag).is_some_and(|g| g.members.len() == 2)
    });

    let group = orch.lookup_group(lag).unwrap();
    assert_eq!(group.lag_id.as_u32(), 5);
    assert!(group.is_blocked(IfIndex::new(11)));
    assert!(orch.resilient_hash());
    assert!(npu.lag(group.hardware_handle).unwrap().resilient_hash);

    npu.set_link_state(NpuPort::new(0, 1), LinkState::Up);
    wait_for("oper up", || {
        orch.lookup_group(lag).is_some_and(|g| g.oper_status)
    });

    npu.clear_link_listener();
    drop(senders);
    workers.join();

    assert_eq!(orch.stats().events_dropped, 0);
    orch.check_invariants().unwrap();
}
