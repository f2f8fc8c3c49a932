//! The control point: owns the callback listener and the set of open device
//! connections.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use callback_server::{detect_local_ip, CallbackServer, InboundRequest, RequestHandler, StatusCode};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use upnp_description::normalize_udn;
use url::Host;
use uuid::Uuid;

use crate::config::ControlPointConfig;
use crate::connection::{self, ConnectionId, ConnectionKey, ConnectionState, DeviceConnection};
use crate::descriptor::{RootDescriptor, RootState};
use crate::device_tree::DeviceTree;
use crate::discovery::RootEntry;
use crate::error::{ControlPointError, Result};
use crate::events::{ConnectionEvent, TrackerEvent};
use crate::renewal::RenewalTimer;
use crate::shared::SharedState;
use crate::tracker::NetworkTracker;
use crate::transport::user_agent;

/// Connects to devices found by a [`NetworkTracker`], subscribes to their
/// events and invokes their actions.
///
/// Connection events for every device are delivered on the channel passed to
/// [`ControlPoint::new`].
pub struct ControlPoint {
    shared: Arc<SharedState>,
    tracker_events: broadcast::Sender<TrackerEvent>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ControlPoint {
    pub fn new(
        shared: Arc<SharedState>,
        tracker: &NetworkTracker,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            shared,
            tracker_events: tracker.event_sender(),
            events,
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().control_point.active
    }

    /// Port of the callback listener while active.
    pub fn callback_port(&self) -> Option<u16> {
        self.shared.callback_port()
    }

    /// Bind the callback listener and start following the tracker.
    pub async fn start(&self) -> Result<()> {
        {
            let mut data = self.shared.lock();
            if data.control_point.active {
                return Err(ControlPointError::AlreadyActive("control point"));
            }
            data.control_point.active = true;
        }

        let dispatcher = Arc::new(NotifyDispatcher {
            shared: Arc::downgrade(&self.shared),
        });
        let bind_addr = self.shared.config().callback_bind_addr;
        let server = match CallbackServer::bind(bind_addr, dispatcher).await {
            Ok(server) => server,
            Err(e) => {
                self.shared.lock().control_point.active = false;
                return Err(ControlPointError::Transport(e.to_string()));
            }
        };
        self.shared.set_callback_port(Some(server.port()));

        let forwarder = tokio::spawn(follow_tracker(
            Arc::downgrade(&self.shared),
            self.tracker_events.subscribe(),
        ));

        info!(addr = %server.local_addr(), "control point started");
        let mut data = self.shared.lock();
        data.control_point.server = Some(server);
        data.control_point.forwarder = Some(forwarder.abort_handle());
        Ok(())
    }

    /// Close every connection, unsubscribing first, and shut the listener
    /// down.
    pub async fn stop(&self) -> Result<()> {
        let (keys, server, forwarder) = {
            let mut data = self.shared.lock();
            if !data.control_point.active {
                return Ok(());
            }
            data.control_point.active = false;
            let keys: Vec<ConnectionKey> = data
                .control_point
                .connections
                .values()
                .map(ConnectionState::key)
                .collect();
            (
                keys,
                data.control_point.server.take(),
                data.control_point.forwarder.take(),
            )
        };

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        for key in keys {
            connection::close(&self.shared, &key, true).await;
        }
        self.shared.set_callback_port(None);
        if let Some(server) = server {
            server
                .shutdown()
                .await
                .map_err(|e| ControlPointError::Transport(e.to_string()))?;
        }
        info!("control point stopped");
        Ok(())
    }

    /// Open a connection to device `udn` of `descriptor`.
    ///
    /// The device may be the root device or any embedded device. One
    /// connection per device is allowed at a time.
    pub fn connect(&self, descriptor: &RootDescriptor, udn: &str) -> Result<DeviceConnection> {
        let udn = normalize_udn(udn);
        let port = self
            .shared
            .callback_port()
            .ok_or(ControlPointError::NotActive("control point"))?;
        let config = self.shared.config();
        let host = callback_host(config, descriptor.entry());
        let callback_path = format!("/{}/", Uuid::new_v4().simple());
        let callback_url = format!("http://{}{}", SocketAddr::new(host, port), callback_path);

        let mut guard = self.shared.lock();
        let data = &mut *guard;
        if !data.control_point.active {
            return Err(ControlPointError::NotActive("control point"));
        }
        let record = data
            .roots
            .get(&descriptor.id())
            .ok_or(ControlPointError::DescriptorInvalid)?;
        match record.state {
            RootState::Erroneous => return Err(ControlPointError::DescriptorErroneous),
            RootState::Invalid => return Err(ControlPointError::DescriptorInvalid),
            _ => {}
        }
        if !record.devices.contains_key(&udn) {
            return Err(ControlPointError::DeviceNotFound(udn));
        }
        if data.control_point.connections.contains_key(&udn) {
            return Err(ControlPointError::AlreadyConnected(udn));
        }

        let id = ConnectionId(self.shared.next_id());
        let tree = DeviceTree::build(id, record, &udn)?;
        let key = ConnectionKey { id, udn: udn.clone() };
        let state = ConnectionState {
            id,
            udn: udn.clone(),
            root: descriptor.id(),
            tree,
            callback_path: callback_path.clone(),
            callback_url,
            user_agent: user_agent(record.entry.upnp_version, &config.product_token),
            subscriptions: Default::default(),
            pending_subscribes: Default::default(),
            in_flight: Default::default(),
            renewal: RenewalTimer::spawn(Arc::downgrade(&self.shared), key.clone()),
            events: self.events.clone(),
        };

        info!(%udn, callback = %state.callback_url, "device connected");
        data.control_point.routes.insert(&callback_path, udn.clone());
        data.control_point.connections.insert(udn, state);
        Ok(DeviceConnection::new(key, self.shared.clone()))
    }

    /// Close the connection to `udn`, unsubscribing first. Returns false when
    /// there was none.
    pub async fn disconnect(&self, udn: &str) -> bool {
        let udn = normalize_udn(udn);
        let key = self
            .shared
            .lock()
            .control_point
            .connections
            .get(&udn)
            .map(ConnectionState::key);
        match key {
            Some(key) => connection::close(&self.shared, &key, true).await,
            None => false,
        }
    }

    pub async fn disconnect_all(&self) {
        let keys: Vec<ConnectionKey> = self
            .shared
            .lock()
            .control_point
            .connections
            .values()
            .map(ConnectionState::key)
            .collect();
        for key in keys {
            connection::close(&self.shared, &key, true).await;
        }
    }

    /// Handle to the open connection of `udn`, if any.
    pub fn connection(&self, udn: &str) -> Option<DeviceConnection> {
        let udn = normalize_udn(udn);
        let key = self.shared.lock().control_point.connections.get(&udn).map(ConnectionState::key)?;
        Some(DeviceConnection::new(key, self.shared.clone()))
    }

    /// UDNs of all connected devices.
    pub fn connected_devices(&self) -> Vec<String> {
        let mut udns: Vec<String> = self
            .shared
            .lock()
            .control_point
            .connections
            .keys()
            .cloned()
            .collect();
        udns.sort();
        udns
    }
}

impl std::fmt::Debug for ControlPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPoint")
            .field("active", &self.is_active())
            .field("callback_port", &self.callback_port())
            .finish_non_exhaustive()
    }
}

/// Host placed in CALLBACK URLs: the configured one, else the interface
/// discovery saw the device on, else the local address routing toward the
/// device, else loopback.
fn callback_host(config: &ControlPointConfig, entry: &RootEntry) -> IpAddr {
    config
        .callback_host
        .or(entry.endpoint)
        .or_else(|| {
            let ip = match entry.location.host()? {
                Host::Ipv4(ip) => IpAddr::V4(ip),
                Host::Ipv6(ip) => IpAddr::V6(ip),
                Host::Domain(_) => return None,
            };
            let port = entry.location.port_or_known_default().unwrap_or(80);
            detect_local_ip(SocketAddr::new(ip, port))
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Routes inbound requests to the connection owning the callback path.
struct NotifyDispatcher {
    shared: Weak<SharedState>,
}

#[async_trait]
impl RequestHandler for NotifyDispatcher {
    async fn handle(&self, request: InboundRequest) -> StatusCode {
        let Some(shared) = self.shared.upgrade() else {
            return StatusCode::SERVICE_UNAVAILABLE;
        };
        let route = {
            let data = shared.lock();
            if !data.control_point.active {
                None
            } else {
                Some(data.control_point.routes.route(&request.path).cloned())
            }
        };
        match route {
            None => StatusCode::SERVICE_UNAVAILABLE,
            Some(None) => {
                debug!(path = %request.path, "no connection for callback path");
                StatusCode::NOT_FOUND
            }
            Some(Some(udn)) => connection::handle_event_notification(&shared, &udn, &request),
        }
    }
}

/// Apply tracker events to open connections: a reboot renews their
/// subscriptions, a removal closes them without unsubscribing.
async fn follow_tracker(shared: Weak<SharedState>, mut events: broadcast::Receiver<TrackerEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "control point lagged behind tracker events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let Some(shared) = shared.upgrade() else {
            return;
        };

        let root = event.descriptor().id();
        let keys: Vec<ConnectionKey> = shared
            .lock()
            .control_point
            .connections
            .values()
            .filter(|state| state.root == root)
            .map(ConnectionState::key)
            .collect();

        match event {
            TrackerEvent::DeviceRebooted(_) => {
                for key in &keys {
                    connection::on_device_rebooted(&shared, key);
                }
            }
            TrackerEvent::RootDeviceRemoved(_) => {
                for key in &keys {
                    connection::close(&shared, key, false).await;
                }
            }
            TrackerEvent::RootDeviceAdded(_) => {}
        }
    }
}
