//! Service type URNs.

use std::fmt;
use std::str::FromStr;

use crate::error::{DescriptionError, Result};

/// A service type such as `urn:schemas-upnp-org:service:AVTransport:1`,
/// split into its type and its version.
///
/// Two services of one device are told apart by the `(service_type, version)`
/// pair, so the URN doubles as a lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceTypeUrn {
    /// Everything between `urn:` and the version, e.g.
    /// `schemas-upnp-org:service:AVTransport`
    service_type: String,
    version: u32,
}

impl ServiceTypeUrn {
    pub fn parse(urn: &str) -> Result<Self> {
        let invalid = || DescriptionError::InvalidServiceType(urn.to_string());

        let rest = urn.trim().strip_prefix("urn:").ok_or_else(invalid)?;
        let (service_type, version) = rest.rsplit_once(':').ok_or_else(invalid)?;
        if service_type.split(':').count() < 3 || service_type.split(':').any(str::is_empty) {
            return Err(invalid());
        }
        let version = version.parse::<u32>().map_err(|_| invalid())?;

        Ok(Self {
            service_type: service_type.to_string(),
            version,
        })
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Short name of the service, e.g. `AVTransport`.
    pub fn name(&self) -> &str {
        self.service_type
            .rsplit(':')
            .next()
            .unwrap_or(&self.service_type)
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Display for ServiceTypeUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "urn:{}:{}", self.service_type, self.version)
    }
}

impl FromStr for ServiceTypeUrn {
    type Err = DescriptionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
