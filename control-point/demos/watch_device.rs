//! Watch a Device Example
//!
//! Loads the descriptions of one root device, connects to it, subscribes to
//! every evented service and prints state variable changes until Ctrl-C.
//!
//! Run with:
//! `cargo run -p upnp-control-point --example watch_device -- http://192.168.1.20:1400/xml/device_description.xml`
//!
//! The root device id defaults to the location; pass it as the second
//! argument when you know the UDN. Set `RUST_LOG=debug` for protocol logs.

use std::env;

use tokio::sync::mpsc;
use upnp_control_point::{
    init_logging_from_env, ChannelDiscovery, ConnectionEvent, ControlPoint, ControlPointConfig,
    NetworkTracker, RootEntry, SharedState, TrackerEvent,
};
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;

    let mut args = env::args().skip(1);
    let location: Url = match args.next() {
        Some(location) => location.parse()?,
        None => {
            eprintln!("usage: watch_device <description-url> [root-device-id]");
            std::process::exit(2);
        }
    };
    let root_id = args.next().unwrap_or_else(|| location.to_string());

    let shared = SharedState::new(ControlPointConfig::default())?;
    let (discovery, feed) = ChannelDiscovery::new();
    let tracker = NetworkTracker::new(shared.clone(), discovery);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let control_point = ControlPoint::new(shared.clone(), &tracker, events_tx);

    let mut tracker_events = tracker.subscribe();
    tracker.start().await?;
    control_point.start().await?;
    println!("Callback listener on port {:?}", control_point.callback_port());

    feed.add(RootEntry::new(root_id, location));

    let descriptor = loop {
        tokio::select! {
            event = tracker_events.recv() => match event? {
                TrackerEvent::RootDeviceAdded(descriptor) => break descriptor,
                other => println!("Tracker: {other:?}"),
            },
            _ = tokio::signal::ctrl_c() => {
                tracker.stop().await?;
                return Ok(());
            }
        }
    };

    let udn = match descriptor.document() {
        Some(document) => document.device.udn.clone(),
        None => descriptor.root_device_id().to_string(),
    };
    let connection = control_point.connect(&descriptor, &udn)?;
    let root = connection.device(connection.root_device()?)?;
    println!("Connected to {} ({})", root.friendly_name, connection.udn());

    for service in connection.services()? {
        let node = connection.service(service)?;
        match connection.subscribe_events(service) {
            Ok(()) => println!("Subscribing to {}", node.descriptor.service_type),
            Err(e) => println!("Not subscribing to {}: {e}", node.descriptor.service_type),
        }
    }

    loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                ConnectionEvent::PropertiesChanged { changes, .. } => {
                    for change in changes {
                        println!("  {} = {}", change.name, change.value);
                    }
                }
                ConnectionEvent::Disconnected { udn } => {
                    println!("Disconnected from {udn}");
                    break;
                }
                other => println!("{other:?}"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    control_point.stop().await?;
    tracker.stop().await?;
    Ok(())
}
