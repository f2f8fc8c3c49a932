//! State shared by the network tracker, the control point and every device
//! connection.
//!
//! All mutable protocol state sits behind one [`parking_lot::Mutex`]. The lock
//! is never held across an `.await`: operations lock, mutate, collect the
//! notifications they owe, unlock, and only then emit.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use callback_server::{CallbackServer, PrefixRouter};
use parking_lot::{Mutex, MutexGuard};
use tokio::task::AbortHandle;

use crate::config::ControlPointConfig;
use crate::connection::{ConnectionKey, ConnectionState};
use crate::descriptor::{RootId, RootRecord};
use crate::error::{ControlPointError, Result};
use crate::transport::{HttpClient, ReqwestClient};

/// Lock, configuration and HTTP client shared by the whole control point.
///
/// Create one per control point and hand the same `Arc` to the
/// [`NetworkTracker`](crate::NetworkTracker) and the
/// [`ControlPoint`](crate::ControlPoint).
pub struct SharedState {
    data: Mutex<SharedData>,
    config: ControlPointConfig,
    http: Arc<dyn HttpClient>,
    /// 0 while the callback listener is down
    callback_port: AtomicU16,
    next_id: AtomicU64,
}

impl SharedState {
    /// Shared state with the default `reqwest` transport.
    pub fn new(config: ControlPointConfig) -> Result<Arc<Self>> {
        let http = ReqwestClient::new().map_err(|e| ControlPointError::Transport(e.to_string()))?;
        Self::with_http_client(config, Arc::new(http))
    }

    /// Shared state with a caller-supplied transport.
    pub fn with_http_client(
        config: ControlPointConfig,
        http: Arc<dyn HttpClient>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            data: Mutex::new(SharedData::default()),
            config,
            http,
            callback_port: AtomicU16::new(0),
            next_id: AtomicU64::new(1),
        }))
    }

    pub fn config(&self) -> &ControlPointConfig {
        &self.config
    }

    /// Port of the callback listener while the control point is active.
    pub fn callback_port(&self) -> Option<u16> {
        match self.callback_port.load(Ordering::Acquire) {
            0 => None,
            port => Some(port),
        }
    }

    pub(crate) fn set_callback_port(&self, port: Option<u16>) {
        self.callback_port.store(port.unwrap_or(0), Ordering::Release);
    }

    pub(crate) fn http(&self) -> &dyn HttpClient {
        self.http.as_ref()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SharedData> {
        self.data.lock()
    }
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedState")
            .field("config", &self.config)
            .field("callback_port", &self.callback_port())
            .finish_non_exhaustive()
    }
}

/// Everything guarded by the shared lock.
#[derive(Default)]
pub(crate) struct SharedData {
    /// Descriptor arena
    pub roots: HashMap<RootId, RootRecord>,
    pub tracker: TrackerData,
    pub control_point: ControlPointData,
}

#[derive(Default)]
pub(crate) struct TrackerData {
    pub active: bool,
    /// Root device id to the descriptor discovery currently advertises
    pub advertised: HashMap<String, RootId>,
    /// Description fetch task per root
    pub fetches: HashMap<RootId, AbortHandle>,
    pub listener: Option<AbortHandle>,
}

#[derive(Default)]
pub(crate) struct ControlPointData {
    pub active: bool,
    /// Open connections keyed by device UDN
    pub connections: HashMap<String, ConnectionState>,
    /// Callback path to device UDN
    pub routes: PrefixRouter<String>,
    pub server: Option<CallbackServer>,
    pub forwarder: Option<AbortHandle>,
}

impl SharedData {
    pub fn connection(&self, key: &ConnectionKey) -> Option<&ConnectionState> {
        self.control_point
            .connections
            .get(&key.udn)
            .filter(|state| state.id == key.id)
    }

    pub fn connection_mut(&mut self, key: &ConnectionKey) -> Option<&mut ConnectionState> {
        self.control_point
            .connections
            .get_mut(&key.udn)
            .filter(|state| state.id == key.id)
    }

    /// Drop a root record once discovery no longer advertises it and no
    /// connection is bound to it.
    pub fn purge_if_unreferenced(&mut self, id: RootId) {
        let advertised = self.tracker.advertised.values().any(|r| *r == id);
        let connected = self.control_point.connections.values().any(|c| c.root == id);
        if !advertised && !connected {
            self.roots.remove(&id);
        }
    }
}
