//! Fixtures shared by the unit tests.

use std::sync::Arc;

use upnp_description::{DeviceDescription, ServiceDescription};
use url::Url;

use crate::connection::ConnectionId;
use crate::descriptor::{RootDescriptor, RootId, RootRecord, RootState, ServiceState};
use crate::device_tree::{DeviceTree, ServiceHandle};
use crate::discovery::RootEntry;
use crate::shared::SharedState;
use crate::tracker::build_service_map;

pub const RENDERING_CONTROL: &str = "urn:schemas-upnp-org:service:RenderingControl:1";
pub const AV_TRANSPORT: &str = "urn:schemas-upnp-org:service:AVTransport:1";

pub const DEVICE_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>1</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Living Room</friendlyName>
    <manufacturer>Acme</manufacturer>
    <UDN>uuid:renderer-1</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <SCPDURL>/rc/scpd.xml</SCPDURL>
        <controlURL>/rc/control</controlURL>
        <eventSubURL>/rc/event</eventSubURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <SCPDURL>/avt/scpd.xml</SCPDURL>
        <controlURL>/avt/control</controlURL>
        <eventSubURL></eventSubURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:Speaker:1</deviceType>
        <friendlyName>Living Room Sub</friendlyName>
        <UDN>uuid:renderer-1-sub</UDN>
      </device>
    </deviceList>
  </device>
</root>"#;

pub const RENDERING_CONTROL_SCPD: &str = r#"<?xml version="1.0"?>
<scpd xmlns="urn:schemas-upnp-org:service-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <actionList>
    <action>
      <name>GetVolume</name>
      <argumentList>
        <argument><name>InstanceID</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_InstanceID</relatedStateVariable></argument>
        <argument><name>Channel</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_Channel</relatedStateVariable></argument>
        <argument><name>CurrentVolume</name><direction>out</direction><relatedStateVariable>Volume</relatedStateVariable></argument>
      </argumentList>
    </action>
    <action>
      <name>SetVolume</name>
      <argumentList>
        <argument><name>InstanceID</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_InstanceID</relatedStateVariable></argument>
        <argument><name>Channel</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_Channel</relatedStateVariable></argument>
        <argument><name>DesiredVolume</name><direction>in</direction><relatedStateVariable>Volume</relatedStateVariable></argument>
      </argumentList>
    </action>
  </actionList>
  <serviceStateTable>
    <stateVariable sendEvents="yes">
      <name>Volume</name>
      <dataType>ui2</dataType>
      <defaultValue>10</defaultValue>
    </stateVariable>
    <stateVariable sendEvents="no">
      <name>A_ARG_TYPE_Channel</name>
      <dataType>string</dataType>
      <allowedValueList><allowedValue>Master</allowedValue></allowedValueList>
    </stateVariable>
    <stateVariable sendEvents="no">
      <name>A_ARG_TYPE_InstanceID</name>
      <dataType>ui4</dataType>
    </stateVariable>
  </serviceStateTable>
</scpd>"#;

pub const AV_TRANSPORT_SCPD: &str = r#"<?xml version="1.0"?>
<scpd xmlns="urn:schemas-upnp-org:service-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <actionList>
    <action>
      <name>Stop</name>
      <argumentList>
        <argument><name>InstanceID</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_InstanceID</relatedStateVariable></argument>
      </argumentList>
    </action>
  </actionList>
  <serviceStateTable>
    <stateVariable sendEvents="no">
      <name>A_ARG_TYPE_InstanceID</name>
      <dataType>ui4</dataType>
    </stateVariable>
  </serviceStateTable>
</scpd>"#;

pub fn location() -> Url {
    Url::parse("http://127.0.0.1:49152/desc.xml").unwrap()
}

pub fn entry() -> RootEntry {
    RootEntry::new("uuid:renderer-1", location())
}

/// A root record as the tracker leaves it once every description is in.
pub fn ready_record() -> RootRecord {
    record_for(Arc::new(entry()))
}

fn record_for(entry: Arc<RootEntry>) -> RootRecord {
    let document = DeviceDescription::from_xml(DEVICE_XML).unwrap();
    let base = document.base_url(&entry.location);
    let (devices, _) = build_service_map(&document, &base).unwrap();

    let mut record = RootRecord::new(entry);
    record.transition(RootState::AwaitingDeviceDescription);
    record.document = Some(Arc::new(document));
    record.devices = devices;
    record.transition(RootState::AwaitingServiceDescriptions);

    for service in record.devices.values_mut().flat_map(|s| s.values_mut()) {
        let xml = match service.scpd_url.path() {
            "/rc/scpd.xml" => RENDERING_CONTROL_SCPD,
            _ => AV_TRANSPORT_SCPD,
        };
        service.description = Some(Arc::new(ServiceDescription::from_xml(xml).unwrap()));
        service.transition(ServiceState::Ready);
    }
    record.transition(RootState::Ready);
    record
}

/// A service handle of some connection, for tests that only need one.
pub fn service_handle() -> ServiceHandle {
    let tree = DeviceTree::build(ConnectionId(0), &ready_record(), "renderer-1").unwrap();
    tree.find_service(RENDERING_CONTROL).unwrap()
}

/// Put a Ready root into the arena as if the tracker had loaded it.
pub fn insert_ready_root(shared: &Arc<SharedState>) -> RootDescriptor {
    insert_ready_root_from(shared, entry())
}

pub fn insert_ready_root_from(shared: &Arc<SharedState>, entry: RootEntry) -> RootDescriptor {
    let entry = Arc::new(entry);
    let id = RootId(shared.next_id());
    let record = record_for(entry.clone());
    let descriptor = RootDescriptor::new(id, &record, shared.clone());
    let mut data = shared.lock();
    data.roots.insert(id, record);
    data.tracker
        .advertised
        .insert(entry.root_device_id.clone(), id);
    descriptor
}
