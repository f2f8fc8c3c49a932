//! Network tracker: turns discovery notifications into root device
//! descriptors.
//!
//! For every root device discovery reports, the tracker fetches the device
//! description and then each service description in document order. A root
//! becomes Ready once every description is in; the first failure makes it
//! Erroneous and stops the remaining fetches.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use reqwest::Method;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};
use upnp_description::{
    normalize_udn, resolve_url, DeviceDescription, ServiceDescription, ServiceTypeUrn,
};
use url::Url;

use crate::descriptor::{
    RootDescriptor, RootId, RootRecord, RootState, ServiceDescriptor, ServiceState,
};
use crate::discovery::{Discovery, DiscoveryEvent, RootEntry};
use crate::error::{ControlPointError, FetchError, Result};
use crate::events::TrackerEvent;
use crate::shared::SharedState;
use crate::transport::{self, user_agent, HttpRequest};

/// Services of every device in a description, keyed by UDN then service type.
pub(crate) type ServiceMap = BTreeMap<String, BTreeMap<ServiceTypeUrn, ServiceDescriptor>>;

/// Service descriptions still to fetch, in document order.
pub(crate) type PendingFetches = Vec<(String, ServiceTypeUrn, Url)>;

/// Tracks root devices announced by a [`Discovery`] source.
pub struct NetworkTracker {
    shared: Arc<SharedState>,
    discovery: Mutex<Box<dyn Discovery>>,
    events: broadcast::Sender<TrackerEvent>,
}

impl NetworkTracker {
    pub fn new(shared: Arc<SharedState>, discovery: impl Discovery) -> Self {
        let (events, _) = broadcast::channel(shared.config().event_channel_capacity);
        Self {
            shared,
            discovery: Mutex::new(Box::new(discovery)),
            events,
        }
    }

    /// Receive root device lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<TrackerEvent> {
        self.events.clone()
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().tracker.active
    }

    /// Start discovery and begin tracking root devices.
    pub async fn start(&self) -> Result<()> {
        {
            let mut data = self.shared.lock();
            if data.tracker.active {
                return Err(ControlPointError::AlreadyActive("network tracker"));
            }
            data.tracker.active = true;
        }

        let notifications = match self.discovery.lock().await.start().await {
            Ok(notifications) => notifications,
            Err(e) => {
                self.shared.lock().tracker.active = false;
                return Err(e);
            }
        };

        let listener = tokio::spawn(listen(
            Arc::downgrade(&self.shared),
            self.events.clone(),
            notifications,
        ));
        self.shared.lock().tracker.listener = Some(listener.abort_handle());
        info!("network tracker started");
        Ok(())
    }

    /// Stop tracking. Every descriptor becomes Invalid and pending
    /// description fetches are cancelled. No removal events are sent.
    pub async fn stop(&self) -> Result<()> {
        let tasks = {
            let mut guard = self.shared.lock();
            let data = &mut *guard;
            if !data.tracker.active {
                return Ok(());
            }
            data.tracker.active = false;

            let mut tasks: Vec<_> = data.tracker.fetches.drain().map(|(_, task)| task).collect();
            tasks.extend(data.tracker.listener.take());

            let ids: Vec<RootId> = data.tracker.advertised.drain().map(|(_, id)| id).collect();
            for id in ids {
                if let Some(record) = data.roots.get_mut(&id) {
                    record.invalidate();
                }
                data.purge_if_unreferenced(id);
            }
            tasks
        };

        for task in tasks {
            task.abort();
        }
        self.discovery.lock().await.stop().await;
        info!("network tracker stopped");
        Ok(())
    }

    /// Descriptors of every root device discovery currently advertises,
    /// whatever their state.
    pub fn descriptors(&self) -> Vec<RootDescriptor> {
        let data = self.shared.lock();
        data.tracker
            .advertised
            .values()
            .filter_map(|id| {
                data.roots
                    .get(id)
                    .map(|record| RootDescriptor::new(*id, record, self.shared.clone()))
            })
            .collect()
    }

    /// Descriptor of one advertised root device.
    pub fn descriptor(&self, root_device_id: &str) -> Option<RootDescriptor> {
        let root_device_id = normalize_udn(root_device_id);
        let data = self.shared.lock();
        let id = *data.tracker.advertised.get(&root_device_id)?;
        let record = data.roots.get(&id)?;
        Some(RootDescriptor::new(id, record, self.shared.clone()))
    }
}

impl std::fmt::Debug for NetworkTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkTracker")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

async fn listen(
    shared: Weak<SharedState>,
    events: broadcast::Sender<TrackerEvent>,
    mut notifications: mpsc::UnboundedReceiver<DiscoveryEvent>,
) {
    while let Some(notification) = notifications.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match notification {
            DiscoveryEvent::RootDeviceAdded(entry) => on_root_added(&shared, &events, entry),
            DiscoveryEvent::RootDeviceRemoved { root_device_id } => {
                on_root_removed(&shared, &events, &root_device_id)
            }
            DiscoveryEvent::DeviceRebooted { root_device_id } => {
                on_device_rebooted(&shared, &events, &root_device_id)
            }
        }
    }
    debug!("discovery stream ended");
}

fn on_root_added(
    shared: &Arc<SharedState>,
    events: &broadcast::Sender<TrackerEvent>,
    entry: RootEntry,
) {
    let entry = Arc::new(entry);
    let mut guard = shared.lock();
    let data = &mut *guard;
    if !data.tracker.active {
        return;
    }

    if let Some(existing) = data.tracker.advertised.get(&entry.root_device_id) {
        let in_progress = data
            .roots
            .get(existing)
            .is_some_and(|record| !record.state.is_terminal());
        if in_progress {
            debug!(root = %entry.root_device_id, "root device already tracked");
            return;
        }
    }

    let id = RootId(shared.next_id());
    let mut record = RootRecord::new(entry.clone());
    record.transition(RootState::AwaitingDeviceDescription);
    let descriptor = RootDescriptor::new(id, &record, shared.clone());
    data.roots.insert(id, record);
    if let Some(previous) = data.tracker.advertised.insert(entry.root_device_id.clone(), id) {
        data.purge_if_unreferenced(previous);
    }

    info!(root = %entry.root_device_id, location = %entry.location, "root device discovered");
    let task = tokio::spawn(fetch_descriptions(shared.clone(), events.clone(), descriptor));
    data.tracker.fetches.insert(id, task.abort_handle());
}

fn on_root_removed(
    shared: &Arc<SharedState>,
    events: &broadcast::Sender<TrackerEvent>,
    root_device_id: &str,
) {
    let root_device_id = normalize_udn(root_device_id);
    let removed = {
        let mut guard = shared.lock();
        let data = &mut *guard;
        let Some(id) = data.tracker.advertised.remove(&root_device_id) else {
            debug!(root = %root_device_id, "removal of unknown root device");
            return;
        };
        if let Some(task) = data.tracker.fetches.remove(&id) {
            task.abort();
        }
        let removed = data.roots.get_mut(&id).and_then(|record| {
            let was_ready = record.state == RootState::Ready;
            record.invalidate();
            was_ready.then(|| RootDescriptor::new(id, record, shared.clone()))
        });
        data.purge_if_unreferenced(id);
        removed
    };

    info!(root = %root_device_id, "root device left the network");
    if let Some(descriptor) = removed {
        let _ = events.send(TrackerEvent::RootDeviceRemoved(descriptor));
    }
}

fn on_device_rebooted(
    shared: &Arc<SharedState>,
    events: &broadcast::Sender<TrackerEvent>,
    root_device_id: &str,
) {
    let root_device_id = normalize_udn(root_device_id);
    let descriptor = {
        let data = shared.lock();
        data.tracker
            .advertised
            .get(&root_device_id)
            .and_then(|id| data.roots.get(id).map(|record| (*id, record)))
            .filter(|(_, record)| record.state == RootState::Ready)
            .map(|(id, record)| RootDescriptor::new(id, record, shared.clone()))
    };

    if let Some(descriptor) = descriptor {
        info!(root = %root_device_id, "root device rebooted");
        let _ = events.send(TrackerEvent::DeviceRebooted(descriptor));
    }
}

/// Fetch the device description, then every service description in order.
async fn fetch_descriptions(
    shared: Arc<SharedState>,
    events: broadcast::Sender<TrackerEvent>,
    descriptor: RootDescriptor,
) {
    let id = descriptor.id();
    let location = descriptor.location().clone();
    let agent = user_agent(descriptor.entry().upnp_version, &shared.config().product_token);

    let document = fetch_text(&shared, &location, &agent)
        .await
        .and_then(|xml| DeviceDescription::from_xml(&xml).map_err(FetchError::from));
    let document = match document {
        Ok(document) => document,
        Err(e) => return fail(&shared, id, e),
    };
    let base = document.base_url(&location);
    let (devices, pending) = match build_service_map(&document, &base) {
        Ok(built) => built,
        Err(e) => return fail(&shared, id, e),
    };

    {
        let mut data = shared.lock();
        let Some(record) = data.roots.get_mut(&id) else {
            return;
        };
        if record.state != RootState::AwaitingDeviceDescription {
            return;
        }
        record.document = Some(Arc::new(document));
        record.devices = devices;
        record.transition(RootState::AwaitingServiceDescriptions);
    }
    debug!(root = %descriptor.root_device_id(), services = pending.len(), "device description loaded");

    for (udn, urn, scpd_url) in pending {
        let description = fetch_text(&shared, &scpd_url, &agent)
            .await
            .and_then(|xml| ServiceDescription::from_xml(&xml).map_err(FetchError::from));

        let mut guard = shared.lock();
        let data = &mut *guard;
        let Some(record) = data.roots.get_mut(&id) else {
            return;
        };
        if record.state != RootState::AwaitingServiceDescriptions {
            return;
        }
        match description {
            Ok(description) => {
                if let Some(service) = record.service_mut(&udn, &urn) {
                    service.description = Some(Arc::new(description));
                    service.transition(ServiceState::Ready);
                }
            }
            Err(e) => {
                warn!(root = %descriptor.root_device_id(), service = %urn, error = %e, "service description failed");
                if let Some(service) = record.service_mut(&udn, &urn) {
                    service.transition(ServiceState::Erroneous);
                }
                record.fail(e);
                data.tracker.fetches.remove(&id);
                return;
            }
        }
    }

    let ready = {
        let mut guard = shared.lock();
        let data = &mut *guard;
        data.tracker.fetches.remove(&id);
        data.roots
            .get_mut(&id)
            .is_some_and(|record| record.transition(RootState::Ready))
    };
    if ready {
        info!(root = %descriptor.root_device_id(), "root device ready");
        let _ = events.send(TrackerEvent::RootDeviceAdded(descriptor));
    }
}

fn fail(shared: &SharedState, id: RootId, error: FetchError) {
    let mut data = shared.lock();
    data.tracker.fetches.remove(&id);
    if let Some(record) = data.roots.get_mut(&id) {
        warn!(root = %record.entry.root_device_id, error = %error, "device description failed");
        record.fail(error);
    }
}

async fn fetch_text(
    shared: &SharedState,
    url: &Url,
    agent: &str,
) -> std::result::Result<String, FetchError> {
    let request = HttpRequest::new(Method::GET, url.clone()).header("USER-AGENT", agent);
    let response =
        transport::send(shared.http(), request, shared.config().description_timeout).await?;
    if !response.status.is_success() {
        return Err(FetchError::HttpStatus(response.status.as_u16()));
    }
    Ok(response.text())
}

/// Create a service descriptor for every service in the document, with URLs
/// resolved against `base`.
///
/// A device listing the same service type twice keeps the first entry.
pub(crate) fn build_service_map(
    document: &DeviceDescription,
    base: &Url,
) -> std::result::Result<(ServiceMap, PendingFetches), FetchError> {
    let mut devices = ServiceMap::new();
    let mut pending = PendingFetches::new();

    for device in document.devices() {
        let services = devices.entry(device.udn.clone()).or_default();
        for element in device.services() {
            let urn = ServiceTypeUrn::parse(&element.service_type)?;
            if element.scpd_url.trim().is_empty() {
                return Err(FetchError::Parse(format!("service {urn} has no SCPDURL")));
            }
            if services.contains_key(&urn) {
                warn!(udn = %device.udn, service = %urn, "duplicate service type ignored");
                continue;
            }

            let scpd_url = resolve_url(base, &element.scpd_url)?;
            let control_url = resolve_url(base, &element.control_url)?;
            let event_sub_url = match element.event_sub_url.trim() {
                "" => None,
                url => Some(resolve_url(base, url)?),
            };

            let mut descriptor = ServiceDescriptor {
                service_type: urn.clone(),
                service_id: element.service_id.clone(),
                scpd_url: scpd_url.clone(),
                control_url,
                event_sub_url,
                description: None,
                state: ServiceState::Initializing,
            };
            descriptor.transition(ServiceState::AwaitingDescription);
            pending.push((device.udn.clone(), urn.clone(), scpd_url));
            services.insert(urn, descriptor);
        }
    }

    Ok((devices, pending))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlPointConfig;
    use crate::discovery::{ChannelDiscovery, DiscoveryFeed};
    use crate::test_support::{self, AV_TRANSPORT_SCPD, DEVICE_XML, RENDERING_CONTROL_SCPD};
    use crate::transport::mock::MockHttp;
    use crate::transport::HttpResponse;
    use reqwest::StatusCode;
    use std::time::Duration;

    fn serve(http: &MockHttp, path: &str, body: &'static str) {
        http.on("GET", path, move |_| {
            Ok(HttpResponse::new(StatusCode::OK)
                .with_header("content-type", "text/xml")
                .with_body(body))
        });
    }

    fn serve_device(http: &MockHttp) {
        serve(http, "/desc.xml", DEVICE_XML);
        serve(http, "/rc/scpd.xml", RENDERING_CONTROL_SCPD);
        serve(http, "/avt/scpd.xml", AV_TRANSPORT_SCPD);
    }

    async fn started(
        http: &Arc<MockHttp>) -> (NetworkTracker, DiscoveryFeed, broadcast::Receiver<TrackerEvent>,
    ) {
        let shared =
            SharedState::with_http_client(ControlPointConfig::loopback(), http.clone()).unwrap();
        let (discovery, feed) = ChannelDiscovery::new();
        let tracker = NetworkTracker::new(shared, discovery);
        let events = tracker.subscribe();
        tracker.start().await.unwrap();
        (tracker, feed, events)
    }

    async fn next_event(events: &mut broadcast::Receiver<TrackerEvent>) -> TrackerEvent {
        tokio::time::timeout(Duration::from_secs(60), events.recv())
            .await
            .expect("no tracker event")
            .expect("tracker channel closed")
    }

    /// Let spawned fetch tasks run to completion against the mock.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_becomes_ready_after_every_description() {
        let http = MockHttp::new();
        serve_device(&http);
        let (tracker, feed, mut events) = started(&http).await;

        feed.add(test_support::entry());
        let descriptor = match next_event(&mut events).await {
            TrackerEvent::RootDeviceAdded(descriptor) => descriptor,
            other => panic!("expected RootDeviceAdded, got {other:?}"),
        };

        assert_eq!(descriptor.state(), RootState::Ready);
        assert_eq!(descriptor.root_device_id(), "renderer-1");
        assert!(descriptor.failure().is_none());
        assert!(descriptor
            .services("renderer-1")
            .iter()
            .all(|s| s.state == ServiceState::Ready && s.description.is_some()));
        assert_eq!(tracker.descriptor("uuid:renderer-1").map(|d| d.id()), Some(descriptor.id()));

        let paths: Vec<_> = http.requests().iter().map(|r| r.url.path().to_string()).collect();
        assert_eq!(paths, vec!["/desc.xml", "/rc/scpd.xml", "/avt/scpd.xml"]);
        let agent = http.requests()[0].header_value("user-agent").unwrap().to_string();
        assert!(agent.contains(" UPnP/1.0 upnp-control-point/"), "{agent}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_service_description_stops_the_pipeline() {
        let http = MockHttp::new();
        serve(&http, "/desc.xml", DEVICE_XML);
        http.on("GET", "/rc/scpd.xml", |_| {
            Ok(HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR))
        });
        serve(&http, "/avt/scpd.xml", AV_TRANSPORT_SCPD);
        let (tracker, feed, mut events) = started(&http).await;

        feed.add(test_support::entry());
        settle().await;

        let descriptor = tracker.descriptor("renderer-1").unwrap();
        assert_eq!(descriptor.state(), RootState::Erroneous);
        assert_eq!(descriptor.failure(), Some(FetchError::HttpStatus(500)));
        let rendering = descriptor
            .service("renderer-1", test_support::RENDERING_CONTROL)
            .unwrap();
        assert_eq!(rendering.state, ServiceState::Erroneous);
        assert_eq!(http.count("GET", "/avt/scpd.xml"), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparsable_device_description() {
        let http = MockHttp::new();
        serve(&http, "/desc.xml", "<root><device>");
        let (tracker, feed, _events) = started(&http).await;

        feed.add(test_support::entry());
        settle().await;

        let descriptor = tracker.descriptor("renderer-1").unwrap();
        assert_eq!(descriptor.state(), RootState::Erroneous);
        assert!(matches!(descriptor.failure(), Some(FetchError::Parse(_))));
        assert_eq!(http.count("GET", "/rc/scpd.xml"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_is_reported_only_for_ready_roots() {
        let http = MockHttp::new();
        serve_device(&http);
        let (tracker, feed, mut events) = started(&http).await;

        // Never answers with a description, so the root ends Erroneous.
        let broken = RootEntry::new(
            "uuid:broken",
            "http://127.0.0.1:49152/missing.xml".parse().unwrap(),
        );
        feed.add(broken);
        feed.add(test_support::entry());
        let ready = match next_event(&mut events).await {
            TrackerEvent::RootDeviceAdded(descriptor) => descriptor,
            other => panic!("expected RootDeviceAdded, got {other:?}"),
        };
        settle().await;
        let erroneous = tracker.descriptor("broken").unwrap();
        assert_eq!(erroneous.state(), RootState::Erroneous);

        feed.remove("uuid:broken");
        feed.remove("uuid:renderer-1");
        match next_event(&mut events).await {
            TrackerEvent::RootDeviceRemoved(descriptor) => assert_eq!(descriptor.id(), ready.id()),
            other => panic!("expected RootDeviceRemoved, got {other:?}"),
        }
        assert!(events.try_recv().is_err());
        assert!(tracker.descriptors().is_empty());
        assert_eq!(ready.state(), RootState::Invalid);
        assert!(ready.failure().is_none());
        // Purged from the arena, the failed root still reports why it failed.
        assert_eq!(erroneous.state(), RootState::Erroneous);
        assert!(erroneous.failure().is_some());
        assert!(erroneous.device_udns().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reannouncement_while_loading_is_ignored() {
        let http = MockHttp::new();
        serve_device(&http);
        http.stall("GET", "/avt/scpd.xml");
        let (tracker, feed, _events) = started(&http).await;

        feed.add(test_support::entry());
        settle().await;
        let first = tracker.descriptor("renderer-1").unwrap();
        assert_eq!(first.state(), RootState::AwaitingServiceDescriptions);

        feed.add(test_support::entry());
        settle().await;
        assert_eq!(tracker.descriptor("renderer-1").unwrap().id(), first.id());
        assert_eq!(http.count("GET", "/desc.xml"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_is_reported_for_ready_roots() {
        let http = MockHttp::new();
        serve_device(&http);
        let (_tracker, feed, mut events) = started(&http).await;

        feed.rebooted("uuid:renderer-1");
        feed.add(test_support::entry());
        let added = next_event(&mut events).await;
        assert!(matches!(added, TrackerEvent::RootDeviceAdded(_)));

        feed.rebooted("uuid:renderer-1");
        match next_event(&mut events).await {
            TrackerEvent::DeviceRebooted(descriptor) => {
                assert_eq!(descriptor.id(), added.descriptor().id());
                assert_eq!(descriptor.state(), RootState::Ready);
            }
            other => panic!("expected DeviceRebooted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_lifecycle() {
        let http = MockHttp::new();
        serve_device(&http);
        http.stall("GET", "/avt/scpd.xml");
        let (tracker, feed, mut events) = started(&http).await;
        assert!(tracker.is_active());
        assert_eq!(
            tracker.start().await.unwrap_err(),
            ControlPointError::AlreadyActive("network tracker")
        );

        feed.add(test_support::entry());
        settle().await;
        let loading = tracker.descriptor("renderer-1").unwrap();

        tracker.stop().await.unwrap();
        assert!(!tracker.is_active());
        assert_eq!(loading.state(), RootState::Invalid);
        assert!(tracker.descriptors().is_empty());
        assert!(events.try_recv().is_err());

        // Idempotent.
        tracker.stop().await.unwrap();
    }

    #[test]
    fn test_service_map_resolves_urls_in_document_order() {
        let document = DeviceDescription::from_xml(DEVICE_XML).unwrap();
        let base = test_support::location();
        let (devices, pending) = build_service_map(&document, &base).unwrap();

        assert_eq!(devices.len(), 2);
        assert!(devices["renderer-1-sub"].is_empty());

        let order: Vec<_> = pending.iter().map(|(_, urn, _)| urn.name().to_string()).collect();
        assert_eq!(order, vec!["RenderingControl", "AVTransport"]);

        let urn = ServiceTypeUrn::parse(test_support::RENDERING_CONTROL).unwrap();
        let rendering = &devices["renderer-1"][&urn];
        assert_eq!(rendering.control_url.as_str(), "http://127.0.0.1:49152/rc/control");
        assert_eq!(
            rendering.event_sub_url.as_ref().map(Url::as_str),
            Some("http://127.0.0.1:49152/rc/event")
        );
        assert_eq!(rendering.state, ServiceState::AwaitingDescription);
    }

    #[test]
    fn test_duplicate_service_type_keeps_first() {
        let xml = DEVICE_XML.replace(
            "urn:schemas-upnp-org:service:AVTransport:1",
            test_support::RENDERING_CONTROL,
        );
        let document = DeviceDescription::from_xml(&xml).unwrap();
        let (devices, pending) = build_service_map(&document, &test_support::location()).unwrap();

        assert_eq!(devices["renderer-1"].len(), 1);
        assert_eq!(pending.len(), 1);
        let kept = devices["renderer-1"].values().next().unwrap();
        assert_eq!(kept.scpd_url.path(), "/rc/scpd.xml");
    }

    #[test]
    fn test_missing_scpd_url_fails() {
        let xml = DEVICE_XML.replace("<SCPDURL>/avt/scpd.xml</SCPDURL>", "");
        let document = DeviceDescription::from_xml(&xml).unwrap();
        assert!(matches!(
            build_service_map(&document, &test_support::location()),
            Err(FetchError::Parse(_))
        ));
    }

    #[test]
    fn test_url_base_overrides_location() {
        let xml = DEVICE_XML.replace(
            "<specVersion>",
            "<URLBase>http://10.0.0.9:1400/</URLBase><specVersion>",
        );
        let document = DeviceDescription::from_xml(&xml).unwrap();
        let base = document.base_url(&test_support::location());
        let (devices, _) = build_service_map(&document, &base).unwrap();
        let rendering = devices["renderer-1"].values().next().unwrap();
        assert_eq!(rendering.scpd_url.as_str(), "http://10.0.0.9:1400/rc/scpd.xml");
    }
}
