//! Event workers.
//!
//! Configuration requests, kernel association changes and hardware link
//! callbacks each arrive on their own bounded channel and are drained by a
//! dedicated OS thread. The threads only meet inside [`LagOrch`], whose lock
//! serializes them.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tracing::{debug, info, warn};

use sonic_sai::{LinkState, LinkStateListener, NpuId, NpuPort};

use crate::config_table::{ConfigRequest, LagConfigTable};
use crate::orch::LagOrch;
use crate::types::{IfIndex, PortAssociation};

/// Kernel bond association change for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelEvent {
    pub port: IfIndex,
    pub association: PortAssociation,
}

/// Link state change reported by an NPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareEvent {
    pub npu: NpuId,
    pub port_id: u32,
    pub state: LinkState,
}

/// Producer ends of the three event channels.
#[derive(Debug, Clone)]
pub struct EventSenders {
    pub config: Sender<ConfigRequest>,
    pub kernel: Sender<KernelEvent>,
    pub hardware: Sender<HardwareEvent>,
}

impl EventSenders {
    /// Link-state listener that feeds the hardware channel without blocking.
    pub fn link_listener(&self, orch: Arc<LagOrch>) -> LinkStateListener {
        let tx = self.hardware.clone();
        Arc::new(move |port: NpuPort, state: LinkState| {
            let event = HardwareEvent {
                npu: port.npu_id,
                port_id: port.port_id,
                state,
            };
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!(?event, "Hardware event queue full, dropping link event");
                    orch.record_dropped_event();
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%port, "Hardware event queue closed");
                }
            }
        })
    }
}

/// Handles of the running worker threads.
pub struct EventWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl EventWorkers {
    /// Creates the channels and starts one thread per channel.
    pub fn spawn(table: Arc<LagConfigTable>, queue_depth: usize) -> io::Result<(EventSenders, Self)> {
        let (config_tx, config_rx) = mpsc::channel(queue_depth);
        let (kernel_tx, kernel_rx) = mpsc::channel(queue_depth);
        let (hardware_tx, hardware_rx) = mpsc::channel(queue_depth);

        let orch = Arc::clone(table.orch());
        let handles = vec![
            spawn_worker("lagmgrd-config", config_rx, move |request: ConfigRequest| {
                table.process(&request);
            })?,
            spawn_worker("lagmgrd-kernel", kernel_rx, {
                let orch = Arc::clone(&orch);
                move |event: KernelEvent| orch.on_kernel_port_association(event.port, event.association)
            })?,
            spawn_worker("lagmgrd-hw", hardware_rx, move |event: HardwareEvent| {
                orch.on_hardware_link_state_change(event.npu, event.port_id, event.state)
            })?,
        ];

        let senders = EventSenders {
            config: config_tx,
            kernel: kernel_tx,
            hardware: hardware_tx,
        };
        Ok((senders, Self { handles }))
    }

    /// Waits for every worker to drain its channel and exit.
    ///
    /// Workers exit once all senders of their channel are dropped.
    pub fn join(self) {
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!(thread = %name, "Event worker panicked");
            }
        }
    }
}

fn spawn_worker<T, F>(name: &str, mut rx: Receiver<T>, mut handler: F) -> io::Result<JoinHandle<()>>
where
    T: Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new().name(thread_name.clone()).spawn(move || {
        info!(thread = %thread_name, "Event worker started");
        while let Some(event) = rx.blocking_recv() {
            handler(event);
        }
        info!(thread = %thread_name, "Event worker stopped");
    })
}
