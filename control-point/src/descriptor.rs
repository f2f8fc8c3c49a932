//! Descriptors: what the control point knows about root devices and their
//! services.
//!
//! Descriptor records live in the arena inside [`SharedState`]. Callers hold a
//! [`RootDescriptor`], a cheap handle that reads the record under the shared
//! lock, and receive [`ServiceDescriptor`] snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use upnp_description::{DeviceDescription, ServiceDescription, ServiceTypeUrn};
use url::Url;

use crate::discovery::RootEntry;
use crate::error::FetchError;
use crate::shared::SharedState;

/// Stable id of a root descriptor in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootId(pub(crate) u64);

/// Lifecycle of a root device descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootState {
    Initializing,
    AwaitingDeviceDescription,
    AwaitingServiceDescriptions,
    Ready,
    /// The device disappeared from the network
    Invalid,
    /// A description could not be fetched or parsed
    Erroneous,
}

impl RootState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RootState::Invalid | RootState::Erroneous)
    }

    /// Whether moving from `self` to `next` is a legal step.
    ///
    /// States only move forward; `Invalid` and `Erroneous` are reachable from
    /// every non-terminal state and are never left.
    pub fn can_transition_to(self, next: RootState) -> bool {
        use RootState::*;
        match (self, next) {
            (Invalid | Erroneous, _) => false,
            (_, Invalid | Erroneous) => true,
            (Initializing, AwaitingDeviceDescription)
            | (AwaitingDeviceDescription, AwaitingServiceDescriptions)
            | (AwaitingServiceDescriptions, Ready) => true,
            _ => false,
        }
    }
}

/// Lifecycle of a service descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Initializing,
    AwaitingDescription,
    Ready,
    Invalid,
    Erroneous,
}

impl ServiceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceState::Invalid | ServiceState::Erroneous)
    }

    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        match (self, next) {
            (Invalid | Erroneous, _) => false,
            (_, Invalid | Erroneous) => true,
            (Initializing, AwaitingDescription) | (AwaitingDescription, Ready) => true,
            _ => false,
        }
    }
}

/// A service of some device, with URLs already resolved against the
/// document's base.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub service_type: ServiceTypeUrn,
    pub service_id: String,
    pub scpd_url: Url,
    pub control_url: Url,
    /// `None` when the service does not publish events
    pub event_sub_url: Option<Url>,
    pub description: Option<Arc<ServiceDescription>>,
    pub state: ServiceState,
}

impl ServiceDescriptor {
    pub(crate) fn transition(&mut self, next: ServiceState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }
}

/// Arena record behind a [`RootDescriptor`].
#[derive(Debug)]
pub(crate) struct RootRecord {
    pub entry: Arc<RootEntry>,
    pub state: RootState,
    pub document: Option<Arc<DeviceDescription>>,
    /// Services keyed by device UDN, then by service type. Every device of the
    /// document has an entry, even when it offers no services.
    pub devices: BTreeMap<String, BTreeMap<ServiceTypeUrn, ServiceDescriptor>>,
    /// Set once on the move to Erroneous. Handles share it so the failure
    /// outlives the record.
    pub failure: Arc<OnceLock<FetchError>>,
}

impl RootRecord {
    pub fn new(entry: Arc<RootEntry>) -> Self {
        Self {
            entry,
            state: RootState::Initializing,
            document: None,
            devices: BTreeMap::new(),
            failure: Arc::new(OnceLock::new()),
        }
    }

    pub fn transition(&mut self, next: RootState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    pub fn service_mut(
        &mut self,
        udn: &str,
        urn: &ServiceTypeUrn,
    ) -> Option<&mut ServiceDescriptor> {
        self.devices.get_mut(udn)?.get_mut(urn)
    }

    /// Mark the root and every service Invalid.
    pub fn invalidate(&mut self) {
        self.transition(RootState::Invalid);
        for service in self.devices.values_mut().flat_map(|s| s.values_mut()) {
            service.transition(ServiceState::Invalid);
        }
    }

    /// Mark the root Erroneous and keep the reason.
    pub fn fail(&mut self, error: FetchError) {
        if self.transition(RootState::Erroneous) {
            let _ = self.failure.set(error);
        }
    }
}

/// Handle to a root device descriptor.
///
/// Handles stay valid after the record is purged from the arena; they then
/// report no devices, and [`RootState::Erroneous`] if loading failed or
/// [`RootState::Invalid`] otherwise.
#[derive(Clone)]
pub struct RootDescriptor {
    id: RootId,
    entry: Arc<RootEntry>,
    failure: Arc<OnceLock<FetchError>>,
    shared: Arc<SharedState>,
}

impl RootDescriptor {
    pub(crate) fn new(id: RootId, record: &RootRecord, shared: Arc<SharedState>) -> Self {
        Self {
            id,
            entry: record.entry.clone(),
            failure: record.failure.clone(),
            shared,
        }
    }

    pub fn id(&self) -> RootId {
        self.id
    }

    pub fn entry(&self) -> &RootEntry {
        &self.entry
    }

    pub fn root_device_id(&self) -> &str {
        &self.entry.root_device_id
    }

    pub fn location(&self) -> &Url {
        &self.entry.location
    }

    pub fn state(&self) -> RootState {
        self.shared
            .lock()
            .roots
            .get(&self.id)
            .map(|r| r.state)
            .unwrap_or_else(|| match self.failure.get() {
                Some(_) => RootState::Erroneous,
                None => RootState::Invalid,
            })
    }

    /// Why the descriptor became Erroneous.
    pub fn failure(&self) -> Option<FetchError> {
        self.failure.get().cloned()
    }

    /// The parsed device description, once fetched.
    pub fn document(&self) -> Option<Arc<DeviceDescription>> {
        self.shared
            .lock()
            .roots
            .get(&self.id)
            .and_then(|r| r.document.clone())
    }

    /// UDNs of the root device and all embedded devices.
    pub fn device_udns(&self) -> Vec<String> {
        self.shared
            .lock()
            .roots
            .get(&self.id)
            .map(|r| r.devices.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn services(&self, udn: &str) -> Vec<ServiceDescriptor> {
        let udn = upnp_description::normalize_udn(udn);
        self.shared
            .lock()
            .roots
            .get(&self.id)
            .and_then(|r| r.devices.get(&udn))
            .map(|services| services.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Look up a service by device UDN and service type URN.
    pub fn service(&self, udn: &str, service_type: &str) -> Option<ServiceDescriptor> {
        let udn = upnp_description::normalize_udn(udn);
        let urn = ServiceTypeUrn::parse(service_type).ok()?;
        self.shared
            .lock()
            .roots
            .get(&self.id)
            .and_then(|r| r.devices.get(&udn))
            .and_then(|services| services.get(&urn))
            .cloned()
    }
}

impl PartialEq for RootDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for RootDescriptor {}

impl fmt::Debug for RootDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootDescriptor")
            .field("id", &self.id)
            .field("root_device_id", &self.entry.root_device_id)
            .field("location", &self.entry.location.as_str())
            .finish()
    }
}
