//! [`LagPublisher`] implementations.

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::gateway::LagPublisher;
use crate::group::{LagGroup, LagState};
use crate::types::{GroupEvent, IfIndex};

/// Notification emitted to consumers outside the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LagNotification {
    GroupState {
        event: GroupEvent,
        state: LagState,
    },
    OperStatus {
        ifindex: IfIndex,
        name: String,
        up: bool,
    },
}

impl LagNotification {
    pub fn group_state(event: GroupEvent, group: &LagGroup) -> Self {
        LagNotification::GroupState {
            event,
            state: group.state(),
        }
    }

    pub fn oper_status(group: &LagGroup, up: bool) -> Self {
        LagNotification::OperStatus {
            ifindex: group.ifindex,
            name: group.name.clone(),
            up,
        }
    }
}

/// Logs every notification.
#[derive(Debug, Default)]
pub struct TracingPublisher;

impl LagPublisher for TracingPublisher {
    fn publish_group_state(&self, event: GroupEvent, group: &LagGroup) {
        debug!(lag = %group.name, ?event, members = group.members.len(), "LAG state");
    }

    fn publish_oper_status(&self, group: &LagGroup, up: bool) {
        info!(lag = %group.name, up, "LAG oper status");
    }
}

/// Forwards notifications onto an unbounded channel.
///
/// Sending never blocks, so it is safe under the coordinator lock. A closed
/// receiver drops notifications.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: UnboundedSender<LagNotification>,
}

impl ChannelPublisher {
    pub fn new(tx: UnboundedSender<LagNotification>) -> Self {
        Self { tx }
    }

    fn send(&self, notification: LagNotification) {
        if self.tx.send(notification).is_err() {
            debug!("Notification receiver closed, dropping notification");
        }
    }
}

impl LagPublisher for ChannelPublisher {
    fn publish_group_state(&self, event: GroupEvent, group: &LagGroup) {
        self.send(LagNotification::group_state(event, group));
    }

    fn publish_oper_status(&self, group: &LagGroup, up: bool) {
        self.send(LagNotification::oper_status(group, up));
    }
}
