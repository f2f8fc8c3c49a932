//! SOAP and GENA codec for UPnP control points
//!
//! This crate builds and parses the message bodies a control point exchanges
//! with UPnP devices: SOAP action envelopes and faults, and GENA property sets
//! and header values. It performs no I/O; callers own the HTTP transport.

mod envelope;
mod error;
pub mod gena;

pub use envelope::{
    decode_action_response, decode_fault, encode_action_call, soap_action_header, CONTENT_TYPE_XML,
    SOAP_ENCODING_STYLE, SOAP_ENVELOPE_NS,
};
pub use error::{SoapError, UpnpFault};
pub use gena::{PropertyChange, SubscriptionTimeout};
