//! UPnP description documents
//!
//! Typed models for the two documents a control point fetches before it can
//! talk to a device:
//!
//! - the device description served at a root device's location, listing the
//!   root device, its embedded devices and their services ([`DeviceDescription`])
//! - the service description (SCPD) of each service, listing its actions and
//!   state variables ([`ServiceDescription`])
//!
//! # Example
//!
//! ```
//! use upnp_description::{DeviceDescription, ServiceTypeUrn};
//!
//! let xml = r#"<root xmlns="urn:schemas-upnp-org:device-1-0">
//!   <device>
//!     <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
//!     <friendlyName>Kitchen</friendlyName>
//!     <UDN>uuid:1234</UDN>
//!   </device>
//! </root>"#;
//!
//! let description = DeviceDescription::from_xml(xml).unwrap();
//! assert_eq!(description.device.udn, "1234");
//!
//! let urn = ServiceTypeUrn::parse("urn:schemas-upnp-org:service:AVTransport:1").unwrap();
//! assert_eq!(urn.version(), 1);
//! ```

pub mod device;
mod error;
pub mod scpd;
mod urn;

pub use device::{normalize_udn, resolve_url, DeviceDescription, DeviceElement, ServiceElement};
pub use error::{DescriptionError, Result};
pub use scpd::{ActionElement, ArgumentElement, ServiceDescription, StateVariableElement};
pub use urn::ServiceTypeUrn;
