//! Device description parsing.
//!
//! This module handles the UPnP device description document served at a root
//! device's location: the root device, its embedded devices and the services
//! each device offers.

use serde::Deserialize;
use url::Url;

use crate::error::{DescriptionError, Result};

/// Device description document root element.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDescription {
    #[serde(rename = "specVersion")]
    pub spec_version: Option<SpecVersion>,
    /// Base for relative URLs; deprecated since UPnP 1.1 but still served by
    /// older stacks
    #[serde(rename = "URLBase")]
    pub url_base: Option<String>,
    pub device: DeviceElement,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct SpecVersion {
    pub major: u32,
    pub minor: u32,
}

/// A `<device>` element, root or embedded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceElement {
    pub device_type: String,
    #[serde(default)]
    pub friendly_name: String,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    #[serde(rename = "UDN")]
    pub udn: String,
    pub service_list: Option<ServiceList>,
    pub device_list: Option<DeviceList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceList {
    #[serde(rename = "service", default)]
    pub services: Vec<ServiceElement>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceList {
    #[serde(rename = "device", default)]
    pub devices: Vec<DeviceElement>,
}

/// A `<service>` entry of a device's service list. URLs are kept as written
/// in the document; resolve them with [`resolve_url`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceElement {
    pub service_type: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(rename = "SCPDURL", default)]
    pub scpd_url: String,
    #[serde(rename = "controlURL", default)]
    pub control_url: String,
    #[serde(rename = "eventSubURL", default)]
    pub event_sub_url: String,
}

impl DeviceDescription {
    /// Parse a device description from XML.
    ///
    /// # Errors
    ///
    /// Returns `DescriptionError::Parse` if the XML is malformed or misses
    /// required fields.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut description: DeviceDescription = quick_xml::de::from_str(xml)
            .map_err(|e| DescriptionError::Parse(format!("Failed to parse device XML: {e}")))?;
        description.device.normalize();
        Ok(description)
    }

    /// Base URL for the relative URLs of this document.
    ///
    /// `URLBase` wins when present and valid; otherwise the location the
    /// document was fetched from is used.
    pub fn base_url(&self, location: &Url) -> Url {
        self.url_base
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .and_then(|base| Url::parse(base).ok())
            .unwrap_or_else(|| location.clone())
    }

    /// All devices in document order, root first.
    pub fn devices(&self) -> Vec<&DeviceElement> {
        let mut devices = Vec::new();
        self.device.collect(&mut devices);
        devices
    }

    /// Find a device by UDN, with or without the `uuid:` prefix.
    pub fn find_device(&self, udn: &str) -> Option<&DeviceElement> {
        let udn = normalize_udn(udn);
        self.devices().into_iter().find(|d| d.udn == udn)
    }
}

impl DeviceElement {
    pub fn services(&self) -> &[ServiceElement] {
        self.service_list
            .as_ref()
            .map(|l| l.services.as_slice())
            .unwrap_or_default()
    }

    pub fn embedded_devices(&self) -> &[DeviceElement] {
        self.device_list
            .as_ref()
            .map(|l| l.devices.as_slice())
            .unwrap_or_default()
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a DeviceElement>) {
        out.push(self);
        for child in self.embedded_devices() {
            child.collect(out);
        }
    }

    fn normalize(&mut self) {
        self.udn = normalize_udn(&self.udn);
        if let Some(list) = self.device_list.as_mut() {
            for child in &mut list.devices {
                child.normalize();
            }
        }
    }
}

/// Canonical form of a UDN: trimmed, without the `uuid:` prefix.
pub fn normalize_udn(udn: &str) -> String {
    let udn = udn.trim();
    match udn.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("uuid:") => udn[5..].to_string(),
        _ => udn.to_string(),
    }
}

/// Resolve a URL from a description document against `base`.
pub fn resolve_url(base: &Url, relative: &str) -> Result<Url> {
    base.join(relative.trim())
        .map_err(|e| DescriptionError::InvalidUrl {
            url: relative.to_string(),
            reason: e.to_string(),
        })
}
