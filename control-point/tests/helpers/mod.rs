//! Test helpers for the mock-device integration tests

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use mockito::{Mock, Server, ServerGuard};
use upnp_control_point::{RootEntry, TrackerEvent};

pub const RENDERING_CONTROL: &str = "urn:schemas-upnp-org:service:RenderingControl:1";

/// Load a description document from the fixtures directory
pub fn fixture(filename: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/fixtures");
    path.push(filename);

    fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", filename, e))
}

/// A media renderer served by a mockito server.
pub struct MockDevice {
    pub server: ServerGuard,
    description: Vec<Mock>,
}

impl MockDevice {
    /// Serve the device description and both SCPDs.
    pub async fn start() -> Self {
        Self::with_scpd_status(200).await
    }

    /// Serve the device description, answering the RenderingControl SCPD with
    /// `status`. The AVTransport SCPD is expected only when `status` is 200.
    pub async fn with_scpd_status(status: usize) -> Self {
        let mut server = Server::new_async().await;

        let device = server
            .mock("GET", "/desc.xml")
            .with_status(200)
            .with_header("content-type", "text/xml")
            .with_body(fixture("media_renderer.xml"))
            .create_async()
            .await;

        let rendering_control = server
            .mock("GET", "/rc/scpd.xml")
            .with_status(status)
            .with_header("content-type", "text/xml")
            .with_body(if status == 200 { fixture("rendering_control.xml") } else { String::new() })
            .create_async()
            .await;

        let av_transport = server
            .mock("GET", "/avt/scpd.xml")
            .with_status(200)
            .with_header("content-type", "text/xml")
            .with_body(fixture("av_transport.xml"))
            .expect(if status == 200 { 1 } else { 0 })
            .create_async()
            .await;

        Self {
            server,
            description: vec![device, rendering_control, av_transport],
        }
    }

    pub fn entry(&self) -> RootEntry {
        let location = format!("{}/desc.xml", self.server.url()).parse().unwrap();
        RootEntry::new("uuid:renderer-1", location)
    }

    /// Check that every description document was fetched as expected.
    pub async fn assert_descriptions_fetched(&self) {
        for mock in &self.description {
            mock.assert_async().await;
        }
    }
}

/// Wait for the next tracker event, failing the test after five seconds.
pub async fn next_tracker_event(
    events: &mut tokio::sync::broadcast::Receiver<TrackerEvent>,
) -> TrackerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no tracker event")
        .expect("tracker channel closed")
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
