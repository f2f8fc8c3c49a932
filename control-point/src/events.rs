//! Notifications emitted by the tracker and by device connections.

use soap_client::PropertyChange;

use crate::descriptor::RootDescriptor;
use crate::device_tree::ServiceHandle;
use crate::error::SubscriptionFailure;

/// Root device lifecycle, broadcast by the
/// [`NetworkTracker`](crate::NetworkTracker).
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// All descriptions of the root device were fetched; it is Ready.
    RootDeviceAdded(RootDescriptor),
    /// A root device that had reached Ready left the network.
    RootDeviceRemoved(RootDescriptor),
    /// The root device restarted; its subscriptions are gone on the device side.
    DeviceRebooted(RootDescriptor),
}

impl TrackerEvent {
    pub fn descriptor(&self) -> &RootDescriptor {
        match self {
            TrackerEvent::RootDeviceAdded(d)
            | TrackerEvent::RootDeviceRemoved(d)
            | TrackerEvent::DeviceRebooted(d) => d,
        }
    }
}

/// Events from open device connections.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Subscribed {
        udn: String,
        service: ServiceHandle,
        sid: String,
    },
    SubscriptionRenewed {
        udn: String,
        service: ServiceHandle,
        sid: String,
    },
    /// A subscribe or renewal attempt failed. After a failed renewal the
    /// subscription is gone.
    SubscriptionFailed {
        udn: String,
        service: ServiceHandle,
        failure: SubscriptionFailure,
    },
    Unsubscribed {
        udn: String,
        service: ServiceHandle,
        sid: String,
    },
    /// Evented state variables changed, in the order the device reported them.
    PropertiesChanged {
        udn: String,
        service: ServiceHandle,
        changes: Vec<PropertyChange>,
    },
    Disconnected {
        udn: String,
    },
}

impl ConnectionEvent {
    pub fn udn(&self) -> &str {
        match self {
            ConnectionEvent::Subscribed { udn, .. }
            | ConnectionEvent::SubscriptionRenewed { udn, .. }
            | ConnectionEvent::SubscriptionFailed { udn, .. }
            | ConnectionEvent::Unsubscribed { udn, .. }
            | ConnectionEvent::PropertiesChanged { udn, .. }
            | ConnectionEvent::Disconnected { udn } => udn,
        }
    }
}
