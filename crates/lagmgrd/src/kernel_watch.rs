//! Kernel bond association watcher.
//!
//! Listens on a NETLINK_ROUTE socket subscribed to RTMGRP_LINK and turns
//! changes of a port's controller (`IFLA_MASTER`) into [`KernelEvent`]s.
//! A link dump is requested on start, so enslavements that already exist
//! are reported once. Every RTM_NEWLINK is seen, including a release and
//! re-enslavement in quick succession.

use std::collections::HashMap;
use std::sync::Arc;

use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
use netlink_packet_route::link::{LinkAttribute, LinkMessage};
use netlink_packet_route::RouteNetlinkMessage;
use tokio::sync::{mpsc::Sender, watch};
use tracing::{debug, info, trace, warn};

use crate::error::{LagError, Result};
use crate::events::KernelEvent;
use crate::kernel::ShellKernelGateway;
use crate::types::{IfIndex, PortAssociation};

pub use socket::LinkSocket;

/// Controller state of one interface as carried by RTM_NEWLINK/RTM_DELLINK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkUpdate {
    pub ifindex: IfIndex,
    pub master: Option<IfIndex>,
    /// RTM_DELLINK: the interface is gone.
    pub removed: bool,
}

impl LinkUpdate {
    pub fn from_message(link: &LinkMessage, removed: bool) -> Self {
        let master = link.attributes.iter().find_map(|attr| match attr {
            LinkAttribute::Controller(index) if *index != 0 => Some(IfIndex::new(*index)),
            _ => None,
        });
        Self {
            ifindex: IfIndex::new(link.header.index),
            master,
            removed,
        }
    }

    /// Controller after this update.
    pub fn current_master(&self) -> Option<IfIndex> {
        if self.removed {
            None
        } else {
            self.master
        }
    }
}

/// Decodes every link message in one datagram.
///
/// Non-link messages (dump terminators, other route families) are skipped.
pub fn parse_link_updates(buffer: &[u8]) -> Result<Vec<LinkUpdate>> {
    let mut updates = Vec::new();
    let mut offset = 0;

    while offset < buffer.len() {
        let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buffer[offset..])
            .map_err(|e| LagError::Netlink(format!("Failed to parse message: {}", e)))?;

        let length = msg.header.length as usize;
        if length == 0 {
            break;
        }
        offset += length;
        // Netlink messages are 4-byte aligned.
        offset = (offset + 3) & !3;

        match msg.payload {
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link)) => {
                updates.push(LinkUpdate::from_message(&link, false))
            }
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelLink(link)) => {
                updates.push(LinkUpdate::from_message(&link, true))
            }
            _ => {}
        }
    }

    trace!(count = updates.len(), "Decoded link updates");
    Ok(updates)
}

/// Link notification consumer feeding the kernel event channel.
pub struct KernelWatcher {
    gateway: Arc<ShellKernelGateway>,
    events: Sender<KernelEvent>,
    /// Last seen controller of every known port that has one.
    masters: HashMap<IfIndex, IfIndex>,
}

impl KernelWatcher {
    pub fn new(gateway: Arc<ShellKernelGateway>, events: Sender<KernelEvent>) -> Self {
        Self {
            gateway,
            events,
            masters: HashMap::new(),
        }
    }

    /// Folds one update into the tracked state and returns the resulting
    /// events.
    ///
    /// Only front-panel ports are tracked. Moves to or from a bond the
    /// gateway does not manage (a bridge, say) produce no event for that
    /// side, and repeated notifications with an unchanged controller produce
    /// nothing.
    pub fn events_for(&mut self, update: LinkUpdate) -> Vec<KernelEvent> {
        let port = update.ifindex;
        if !self.gateway.is_port(port) {
            return Vec::new();
        }

        let current = update.current_master();
        let previous = match current {
            Some(master) => self.masters.insert(port, master),
            None => self.masters.remove(&port),
        };
        if previous == current {
            return Vec::new();
        }

        let mut events = Vec::new();
        if previous.is_some_and(|m| self.gateway.is_bond(m)) {
            events.push(KernelEvent {
                port,
                association: PortAssociation::Detached,
            });
        }
        if let Some(master) = current {
            if self.gateway.is_bond(master) {
                events.push(KernelEvent {
                    port,
                    association: PortAssociation::Attached { master },
                });
            } else {
                debug!(%port, %master, "Ignoring unmanaged master");
            }
        }
        events
    }

    /// Sends the events for a batch of updates; false once the queue is gone.
    async fn dispatch(&mut self, updates: Vec<LinkUpdate>) -> bool {
        for update in updates {
            for event in self.events_for(update) {
                debug!(?event, "Kernel association change");
                if self.events.send(event).await.is_err() {
                    debug!("Kernel event queue closed");
                    return false;
                }
            }
        }
        true
    }

    /// Reads notifications until `shutdown` turns true or its sender is
    /// dropped.
    pub async fn run(mut self, mut socket: LinkSocket, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = socket.request_dump() {
            warn!(error = %e, "Failed to request link dump");
        }
        info!("Kernel watcher started");

        loop {
            tokio::select! {
                received = socket.recv() => match received {
                    Ok(updates) => {
                        if !self.dispatch(updates).await {
                            break;
                        }
                    }
                    Err(e) => {
                        // Usually a receive buffer overrun; resync from a dump.
                        warn!(error = %e, "Lost link notifications, resynchronizing");
                        if let Err(e) = socket.request_dump() {
                            warn!(error = %e, "Failed to request link dump");
                        }
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Kernel watcher stopped");
    }
}

#[cfg(target_os = "linux")]
mod socket {
    use netlink_packet_core::{NLM_F_DUMP, NLM_F_REQUEST, NetlinkHeader, NetlinkMessage, NetlinkPayload};
    use netlink_packet_route::link::LinkMessage;
    use netlink_packet_route::RouteNetlinkMessage;
    use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
    use tokio::io::unix::AsyncFd;
    use tracing::debug;

    use super::{parse_link_updates, LinkUpdate};
    use crate::error::{LagError, Result};

    /// Multicast group for link notifications.
    const RTMGRP_LINK: u32 = 1;

    const RECV_BUFFER_SIZE: usize = 65536;

    /// Non-blocking RTMGRP_LINK subscription driven by the tokio reactor.
    pub struct LinkSocket {
        inner: AsyncFd<Socket>,
        buffer: Vec<u8>,
    }

    impl LinkSocket {
        pub fn open() -> Result<Self> {
            let mut socket = Socket::new(NETLINK_ROUTE)
                .map_err(|e| LagError::Netlink(format!("Failed to create socket: {}", e)))?;
            socket
                .bind(&SocketAddr::new(0, RTMGRP_LINK))
                .map_err(|e| LagError::Netlink(format!("Failed to bind socket: {}", e)))?;
            socket
                .set_non_blocking(true)
                .map_err(|e| LagError::Netlink(format!("Failed to set non-blocking: {}", e)))?;
            let inner = AsyncFd::new(socket)
                .map_err(|e| LagError::Netlink(format!("Failed to register socket: {}", e)))?;

            debug!("Netlink socket bound to RTMGRP_LINK");
            Ok(Self {
                inner,
                buffer: Vec::with_capacity(RECV_BUFFER_SIZE),
            })
        }

        /// Asks the kernel for every link; replies arrive through [`recv`](Self::recv).
        pub fn request_dump(&self) -> Result<()> {
            let mut header = NetlinkHeader::default();
            header.flags = NLM_F_REQUEST | NLM_F_DUMP;

            let payload = RouteNetlinkMessage::GetLink(LinkMessage::default());
            let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(payload));
            packet.finalize();

            let mut buf = vec![0u8; packet.buffer_len()];
            packet.serialize(&mut buf);

            self.inner
                .get_ref()
                .send(&buf, 0)
                .map_err(|e| LagError::Netlink(format!("Failed to send dump request: {}", e)))?;
            debug!("Requested link dump");
            Ok(())
        }

        /// Waits for the next datagram and decodes it.
        pub async fn recv(&mut self) -> Result<Vec<LinkUpdate>> {
            loop {
                let mut guard = self
                    .inner
                    .readable()
                    .await
                    .map_err(|e| LagError::Netlink(format!("Socket readiness failed: {}", e)))?;

                self.buffer.clear();
                let buffer = &mut self.buffer;
                match guard.try_io(|inner| inner.get_ref().recv(buffer, 0)) {
                    Ok(Ok(_)) => return parse_link_updates(&self.buffer),
                    Ok(Err(e)) => {
                        return Err(LagError::Netlink(format!("Failed to receive: {}", e)))
                    }
                    Err(_would_block) => continue,
                }
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod socket {
    use super::LinkUpdate;
    use crate::error::{LagError, Result};

    /// Link notifications need a Linux kernel.
    pub struct LinkSocket;

    impl LinkSocket {
        pub fn open() -> Result<Self> {
            Err(LagError::Netlink(
                "link notifications are only available on Linux".to_string(),
            ))
        }

        pub fn request_dump(&self) -> Result<()> {
            Ok(())
        }

        pub async fn recv(&mut self) -> Result<Vec<LinkUpdate>> {
            std::future::pending().await
        }
    }
}
