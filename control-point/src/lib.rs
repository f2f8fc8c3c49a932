//! UPnP control point.
//!
//! This crate tracks root devices on the network, loads their device and
//! service descriptions, connects to devices, keeps GENA event subscriptions
//! alive and invokes SOAP actions.
//!
//! # Overview
//!
//! - [`SharedState`]: the one lock, configuration and HTTP client shared by
//!   everything below. Create it first and hand the same `Arc` around.
//! - [`NetworkTracker`]: consumes [`Discovery`] notifications and turns them
//!   into [`RootDescriptor`]s, broadcasting [`TrackerEvent`]s.
//! - [`ControlPoint`]: runs the callback listener and opens
//!   [`DeviceConnection`]s.
//! - [`DeviceConnection`]: the device tree, event subscriptions with automatic
//!   renewal, and action calls.
//!
//! Discovery itself (SSDP) is not part of this crate. Feed root devices in
//! through any [`Discovery`] implementation, such as [`ChannelDiscovery`].
//!
//! # Example
//!
//! ```no_run
//! use upnp_control_point::{
//!     ChannelDiscovery, ControlPoint, ControlPointConfig, NetworkTracker, RootEntry, SharedState,
//!     TrackerEvent,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let shared = SharedState::new(ControlPointConfig::default())?;
//!     let (discovery, feed) = ChannelDiscovery::new();
//!     let tracker = NetworkTracker::new(shared.clone(), discovery);
//!     let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
//!     let control_point = ControlPoint::new(shared.clone(), &tracker, events_tx);
//!
//!     let mut tracker_events = tracker.subscribe();
//!     tracker.start().await?;
//!     control_point.start().await?;
//!
//!     feed.add(RootEntry::new("uuid:renderer-1", "http://192.168.1.20:1400/xml/device_description.xml".parse()?));
//!
//!     if let Ok(TrackerEvent::RootDeviceAdded(descriptor)) = tracker_events.recv().await {
//!         let connection = control_point.connect(&descriptor, descriptor.root_device_id())?;
//!         for service in connection.services()? {
//!             let _ = connection.subscribe_events(service);
//!         }
//!         while let Some(event) = events.recv().await {
//!             println!("{event:?}");
//!         }
//!     }
//!
//!     control_point.stop().await?;
//!     tracker.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod control_point;
pub mod descriptor;
pub mod device_tree;
pub mod discovery;
pub mod error;
pub mod events;
pub mod logging;
pub mod subscription;
pub mod tracker;
pub mod transport;

mod renewal;
mod shared;

#[cfg(test)]
mod test_support;

pub use config::ControlPointConfig;
pub use connection::{ActionOutput, ConnectionId, DeviceConnection, PendingAction};
pub use control_point::ControlPoint;
pub use descriptor::{RootDescriptor, RootId, RootState, ServiceDescriptor, ServiceState};
pub use device_tree::{
    ActionHandle, ActionNode, ArgumentDirection, ArgumentSpec, DeviceHandle, DeviceNode,
    ServiceHandle, ServiceNode, StateVariable,
};
pub use discovery::{
    ChannelDiscovery, Discovery, DiscoveryEvent, DiscoveryFeed, RootEntry, UpnpVersion,
};
pub use error::{
    ActionError, ControlPointError, FetchError, Result, SubscriptionFailure, TransportError,
};
pub use events::{ConnectionEvent, TrackerEvent};
pub use logging::{init_logging, init_logging_from_env, LoggingMode};
pub use shared::SharedState;
pub use soap_client::PropertyChange;
pub use subscription::{EventSubscription, SubscriptionPhase};
pub use tracker::NetworkTracker;
pub use transport::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
