//! Device connections.
//!
//! A connection binds one device (root or embedded) of a Ready descriptor to
//! the control point. It owns the device's tree of services and actions, its
//! event subscriptions, the renewal timer and every request it has in flight.
//! The state lives in the shared arena; [`DeviceConnection`] is the handle
//! callers use.

mod action;
mod eventing;


use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::descriptor::{RootDescriptor, RootId};
use crate::device_tree::{
    ActionHandle, ActionNode, DeviceHandle, DeviceNode, DeviceTree, ServiceHandle, ServiceNode,
    StateVariable,
};
use crate::error::{ControlPointError, Result};
use crate::events::ConnectionEvent;
use crate::renewal::{next_deadline, RenewalTimer};
use crate::shared::SharedState;
use crate::subscription::EventSubscription;
use crate::transport;

pub use action::{ActionOutput, PendingAction};
pub(crate) use eventing::{handle_event_notification, on_device_rebooted, renew_due_subscriptions};

/// Identifies one connection for its whole life. A device that is
/// disconnected and connected again gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

/// Locates a connection in the arena and checks it is still the same one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConnectionKey {
    pub id: ConnectionId,
    pub udn: String,
}

/// Arena record of an open connection.
pub(crate) struct ConnectionState {
    pub id: ConnectionId,
    pub udn: String,
    pub root: RootId,
    pub tree: DeviceTree,
    /// Path prefix the callback server routes to this connection
    pub callback_path: String,
    /// Full URL sent in CALLBACK headers
    pub callback_url: String,
    pub user_agent: String,
    /// Subscriptions keyed by SID
    pub subscriptions: HashMap<String, EventSubscription>,
    /// Services with a SUBSCRIBE request in flight
    pub pending_subscribes: HashSet<ServiceHandle>,
    /// Outstanding request tasks keyed by request id
    pub in_flight: HashMap<u64, AbortHandle>,
    pub renewal: RenewalTimer,
    pub events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionState {
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            id: self.id,
            udn: self.udn.clone(),
        }
    }

    pub fn subscription_for(&self, service: ServiceHandle) -> Option<&EventSubscription> {
        self.subscriptions.values().find(|s| s.service() == service)
    }

    /// Point the renewal timer at the earliest subscription that needs it.
    pub fn rearm_renewal(&mut self, gap: std::time::Duration) {
        let deadline = next_deadline(self.subscriptions.values(), Instant::now(), gap);
        self.renewal.arm(deadline);
    }

    pub fn track(&mut self, request_id: u64, task: AbortHandle) {
        self.in_flight.insert(request_id, task);
    }
}

/// Handle to an open device connection.
///
/// Handles are cheap to clone. Once the connection is closed every query
/// returns [`ControlPointError::NotConnected`].
#[derive(Clone)]
pub struct DeviceConnection {
    key: ConnectionKey,
    shared: Arc<SharedState>,
}

impl DeviceConnection {
    pub(crate) fn new(key: ConnectionKey, shared: Arc<SharedState>) -> Self {
        Self { key, shared }
    }

    pub fn id(&self) -> ConnectionId {
        self.key.id
    }

    pub fn udn(&self) -> &str {
        &self.key.udn
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connection(&self.key).is_some()
    }

    fn with_state<R>(&self, f: impl FnOnce(&ConnectionState) -> R) -> Result<R> {
        let data = self.shared.lock();
        let state = data.connection(&self.key).ok_or(ControlPointError::NotConnected)?;
        Ok(f(state))
    }

    /// Descriptor of the root device this connection belongs to.
    pub fn descriptor(&self) -> Result<RootDescriptor> {
        let data = self.shared.lock();
        let state = data.connection(&self.key).ok_or(ControlPointError::NotConnected)?;
        // A bound connection keeps its root record in the arena.
        let record = data.roots.get(&state.root).ok_or(ControlPointError::NotConnected)?;
        Ok(RootDescriptor::new(state.root, record, self.shared.clone()))
    }

    /// The connected device itself.
    pub fn root_device(&self) -> Result<DeviceHandle> {
        self.with_state(|s| s.tree.root())
    }

    pub fn device(&self, device: DeviceHandle) -> Result<DeviceNode> {
        self.with_state(|s| s.tree.device(device).cloned())?
            .ok_or_else(|| ControlPointError::InvalidArgument("unknown device handle".into()))
    }

    pub fn service(&self, service: ServiceHandle) -> Result<ServiceNode> {
        self.with_state(|s| s.tree.service(service).cloned())?
            .ok_or_else(|| ControlPointError::InvalidArgument("unknown service handle".into()))
    }

    pub fn action(&self, action: ActionHandle) -> Result<ActionNode> {
        self.with_state(|s| s.tree.action(action).cloned())?
            .ok_or_else(|| ControlPointError::InvalidArgument("unknown action handle".into()))
    }

    /// Services of the device and its embedded devices.
    pub fn services(&self) -> Result<Vec<ServiceHandle>> {
        self.with_state(|s| s.tree.service_handles())
    }

    pub fn find_service(&self, service_type: &str) -> Result<Option<ServiceHandle>> {
        self.with_state(|s| s.tree.find_service(service_type))
    }

    pub fn find_action(&self, service: ServiceHandle, name: &str) -> Result<Option<ActionHandle>> {
        self.with_state(|s| s.tree.find_action(service, name))
    }

    /// Last known value of a state variable.
    pub fn state_variable(
        &self,
        service: ServiceHandle,
        name: &str,
    ) -> Result<Option<StateVariable>> {
        self.with_state(|s| {
            s.tree
                .service(service)
                .and_then(|node| node.variables.get(name).cloned())
        })
    }

    pub fn is_subscribed(&self, service: ServiceHandle) -> Result<bool> {
        self.with_state(|s| s.subscription_for(service).is_some())
    }

    pub fn subscriptions(&self) -> Result<Vec<EventSubscription>> {
        self.with_state(|s| s.subscriptions.values().cloned().collect())
    }

    /// When the renewal timer fires next, if it is armed.
    pub fn renewal_deadline(&self) -> Result<Option<Instant>> {
        self.with_state(|s| s.renewal.deadline())
    }

    /// URL devices deliver this connection's events to.
    pub fn callback_url(&self) -> Result<String> {
        self.with_state(|s| s.callback_url.clone())
    }

    /// Close the connection, unsubscribing from its services first.
    ///
    /// Returns false when it was already closed.
    pub async fn disconnect(&self) -> bool {
        close(&self.shared, &self.key, true).await
    }
}

impl std::fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("id", &self.key.id)
            .field("udn", &self.key.udn)
            .finish()
    }
}

/// Tear a connection down.
///
/// The record leaves the arena and its callback route is removed before
/// anything else happens, so late NOTIFY requests are refused. In-flight
/// requests and the renewal timer are then cancelled. With `unsubscribe`, a
/// best-effort UNSUBSCRIBE round bounded by the configured timeout follows.
pub(crate) async fn close(
    shared: &Arc<SharedState>,
    key: &ConnectionKey,
    unsubscribe: bool,
) -> bool {
    let mut state = {
        let mut guard = shared.lock();
        let data = &mut *guard;
        if data.connection(key).is_none() {
            return false;
        }
        let Some(state) = data.control_point.connections.remove(&key.udn) else {
            return false;
        };
        data.control_point.routes.remove(&state.callback_path);
        data.purge_if_unreferenced(state.root);
        state
    };

    for (_, task) in state.in_flight.drain() {
        task.abort();
    }
    state.renewal.dispose();
    state.tree.disconnect_all();
    state.pending_subscribes.clear();

    if unsubscribe && !state.subscriptions.is_empty() {
        unsubscribe_all(shared, &state).await;
    }
    state.subscriptions.clear();

    info!(udn = %state.udn, "device disconnected");
    let _ = state.events.send(ConnectionEvent::Disconnected {
        udn: state.udn.clone(),
    });
    true
}

async fn unsubscribe_all(shared: &SharedState, state: &ConnectionState) {
    let config = shared.config();
    let requests: Vec<_> = state
        .subscriptions
        .values()
        .filter_map(|sub| {
            let url = state.tree.service(sub.service())?.descriptor.event_sub_url.clone()?;
            eventing::unsubscribe_request(url, sub.sid(), &state.user_agent).ok()
        })
        .collect();
    debug!(udn = %state.udn, count = requests.len(), "unsubscribing before disconnect");

    let timeout = config.subscription_request_timeout;
    let round = join_all(
        requests
            .into_iter()
            .map(|request| transport::send(shared.http(), request, timeout)),
    );
    match tokio::time::timeout(config.unsubscribe_timeout, round).await {
        Ok(results) => {
            for result in results {
                match result {
                    Ok(response) if response.status.is_success() => {}
                    Ok(response) => {
                        debug!(udn = %state.udn, status = response.status.as_u16(), "UNSUBSCRIBE refused")
                    }
                    Err(e) => debug!(udn = %state.udn, error = %e, "UNSUBSCRIBE failed"),
                }
            }
        }
        Err(_) => warn!(udn = %state.udn, "UNSUBSCRIBE round timed out"),
    }
}
