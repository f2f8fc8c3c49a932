//! Error types for the SOAP client

use thiserror::Error;

/// A `<UPnPError>` carried in the detail of a SOAP fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpFault {
    pub code: u16,
    pub description: String,
}

/// Errors that can occur while decoding SOAP and GENA messages
#[derive(Debug, Clone, Error)]
pub enum SoapError {
    /// XML parsing error
    #[error("XML parsing error: {0}")]
    Parse(String),

    /// A required element is absent
    #[error("missing element: {0}")]
    MissingElement(String),

    /// SOAP fault returned by the device
    #[error("SOAP fault: error code {} ({})", .0.code, .0.description)]
    Fault(UpnpFault),
}
