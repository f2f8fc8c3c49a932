//! Discovery seam.
//!
//! SSDP itself lives outside this crate. Whatever finds root devices on the
//! network implements [`Discovery`] and reports [`DiscoveryEvent`]s; the
//! [`NetworkTracker`](crate::NetworkTracker) consumes them.

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{ControlPointError, Result};

/// UPnP architecture version a root device advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpnpVersion {
    pub major: u8,
    pub minor: u8,
}

impl UpnpVersion {
    pub const V1_0: UpnpVersion = UpnpVersion { major: 1, minor: 0 };
    pub const V1_1: UpnpVersion = UpnpVersion { major: 1, minor: 1 };
    pub const V2_0: UpnpVersion = UpnpVersion { major: 2, minor: 0 };
}

impl Default for UpnpVersion {
    fn default() -> Self {
        Self::V1_0
    }
}

impl fmt::Display for UpnpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UPnP/{}.{}", self.major, self.minor)
    }
}

/// A root device as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootEntry {
    /// Unique id of the root device (its UDN without `uuid:`)
    pub root_device_id: String,
    /// Where the device description is served
    pub location: Url,
    /// Local interface address on which the device was seen, if known
    pub endpoint: Option<IpAddr>,
    pub upnp_version: UpnpVersion,
    /// BOOTID.UPNP.ORG of the latest advertisement (UPnP 1.1 and later)
    pub boot_id: Option<u32>,
}

impl RootEntry {
    pub fn new(root_device_id: impl Into<String>, location: Url) -> Self {
        Self {
            root_device_id: upnp_description::normalize_udn(&root_device_id.into()),
            location,
            endpoint: None,
            upnp_version: UpnpVersion::default(),
            boot_id: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: IpAddr) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_upnp_version(mut self, version: UpnpVersion) -> Self {
        self.upnp_version = version;
        self
    }

    pub fn with_boot_id(mut self, boot_id: u32) -> Self {
        self.boot_id = Some(boot_id);
        self
    }
}

/// Root device lifecycle notifications from the discovery layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    RootDeviceAdded(RootEntry),
    RootDeviceRemoved { root_device_id: String },
    DeviceRebooted { root_device_id: String },
}

/// A source of discovery events.
#[async_trait]
pub trait Discovery: Send + Sync + 'static {
    /// Begin discovery and return the stream of events.
    async fn start(&mut self) -> Result<mpsc::UnboundedReceiver<DiscoveryEvent>>;

    /// Stop discovery. The stream returned by `start` ends.
    async fn stop(&mut self);
}

/// Discovery driven by hand through a [`DiscoveryFeed`].
///
/// Useful when devices are known up front, when another component already
/// runs SSDP, and in tests.
pub struct ChannelDiscovery {
    receiver: Option<mpsc::UnboundedReceiver<DiscoveryEvent>>,
}

/// Sending half of a [`ChannelDiscovery`].
#[derive(Debug, Clone)]
pub struct DiscoveryFeed {
    sender: mpsc::UnboundedSender<DiscoveryEvent>,
}

impl ChannelDiscovery {
    pub fn new() -> (Self, DiscoveryFeed) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                receiver: Some(receiver),
            },
            DiscoveryFeed { sender },
        )
    }
}

#[async_trait]
impl Discovery for ChannelDiscovery {
    async fn start(&mut self) -> Result<mpsc::UnboundedReceiver<DiscoveryEvent>> {
        self.receiver
            .take()
            .ok_or_else(|| {
                ControlPointError::Discovery(
                    "channel discovery can only be started once".to_string(),
                )
            })
    }

    async fn stop(&mut self) {
        // The consumer drops the receiver; feeds report false from then on
    }
}

impl DiscoveryFeed {
    /// Report a root device. Returns false once the tracker is gone.
    pub fn add(&self, entry: RootEntry) -> bool {
        self.sender.send(DiscoveryEvent::RootDeviceAdded(entry)).is_ok()
    }

    pub fn remove(&self, root_device_id: impl Into<String>) -> bool {
        self.sender
            .send(DiscoveryEvent::RootDeviceRemoved {
                root_device_id: upnp_description::normalize_udn(&root_device_id.into()),
            })
            .is_ok()
    }

    pub fn rebooted(&self, root_device_id: impl Into<String>) -> bool {
        self.sender
            .send(DiscoveryEvent::DeviceRebooted {
                root_device_id: upnp_description::normalize_udn(&root_device_id.into()),
            })
            .is_ok()
    }
}
