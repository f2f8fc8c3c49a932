//! Configuration for the control point
//!
//! This module defines the knobs that control the callback listener, request
//! timeouts and the GENA subscription lifecycle.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{ControlPointError, Result};

/// Configuration shared by the network tracker, the control point and every
/// device connection.
#[derive(Debug, Clone)]
pub struct ControlPointConfig {
    /// Address the callback listener binds to
    /// Default: 0.0.0.0:0 (any interface, OS-assigned port)
    pub callback_bind_addr: SocketAddr,

    /// Host advertised in CALLBACK URLs. When unset, the local address that
    /// routes toward the device is used.
    /// Default: None
    pub callback_host: Option<IpAddr>,

    /// Timeout for fetching a device or service description
    /// Default: 30 seconds
    pub description_timeout: Duration,

    /// Timeout for a single action invocation
    /// Default: 30 seconds
    pub action_timeout: Duration,

    /// Timeout for a SUBSCRIBE, renewal or UNSUBSCRIBE request
    /// Default: 30 seconds
    pub subscription_request_timeout: Duration,

    /// Subscription duration requested from devices
    /// Default: 1800 seconds
    pub subscription_duration: Duration,

    /// How long before expiry a subscription is renewed
    /// Default: 30 seconds
    pub renewal_gap: Duration,

    /// Largest forward jump in event keys that is still accepted
    /// Default: 100
    pub event_key_gap_threshold: u64,

    /// Upper bound on the best-effort UNSUBSCRIBE round at disconnect
    /// Default: 5 seconds
    pub unsubscribe_timeout: Duration,

    /// Capacity of the tracker's broadcast channel
    /// Default: 64
    pub event_channel_capacity: usize,

    /// Product token appended to the USER-AGENT header
    /// Default: "upnp-control-point/<crate version>"
    pub product_token: String,
}

impl Default for ControlPointConfig {
    fn default() -> Self {
        Self {
            callback_bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            callback_host: None,
            description_timeout: Duration::from_secs(30),
            action_timeout: Duration::from_secs(30),
            subscription_request_timeout: Duration::from_secs(30),
            subscription_duration: Duration::from_secs(1800),
            renewal_gap: Duration::from_secs(30),
            event_key_gap_threshold: 100,
            unsubscribe_timeout: Duration::from_secs(5),
            event_channel_capacity: 64,
            product_token: format!("upnp-control-point/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ControlPointConfig {
    /// Create a ControlPointConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ControlPointConfig that listens on loopback only, for tests
    /// and single-host setups
    pub fn loopback() -> Self {
        Self {
            callback_bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            callback_host: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ..Default::default()
        }
    }

    /// Requested subscription duration in whole seconds, as sent in TIMEOUT
    pub fn subscription_seconds(&self) -> u32 {
        u32::try_from(self.subscription_duration.as_secs()).unwrap_or(u32::MAX)
    }

    pub fn with_callback_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.callback_bind_addr = addr;
        self
    }

    pub fn with_callback_host(mut self, host: IpAddr) -> Self {
        self.callback_host = Some(host);
        self
    }

    pub fn with_request_timeouts(
        mut self,
        description: Duration,
        action: Duration,
        subscription: Duration,
    ) -> Self {
        self.description_timeout = description;
        self.action_timeout = action;
        self.subscription_request_timeout = subscription;
        self
    }

    pub fn with_subscription_duration(mut self, duration: Duration, renewal_gap: Duration) -> Self {
        self.subscription_duration = duration;
        self.renewal_gap = renewal_gap;
        self
    }

    pub fn with_event_key_gap_threshold(mut self, threshold: u64) -> Self {
        self.event_key_gap_threshold = threshold;
        self
    }

    pub fn with_unsubscribe_timeout(mut self, timeout: Duration) -> Self {
        self.unsubscribe_timeout = timeout;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_product_token(mut self, token: impl Into<String>) -> Self {
        self.product_token = token.into();
        self
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.description_timeout.is_zero()
            || self.action_timeout.is_zero()
            || self.subscription_request_timeout.is_zero()
        {
            return Err(ControlPointError::Config(
                "Request timeouts must be greater than 0".to_string(),
            ));
        }

        if self.subscription_duration.as_secs() == 0 {
            return Err(ControlPointError::Config(
                "Subscription duration must be at least one second".to_string(),
            ));
        }

        if self.renewal_gap >= self.subscription_duration {
            return Err(ControlPointError::Config(
                "Renewal gap must be shorter than the subscription duration".to_string(),
            ));
        }

        if self.event_key_gap_threshold == 0 {
            return Err(ControlPointError::Config(
                "Event key gap threshold must be greater than 0".to_string(),
            ));
        }

        if self.event_channel_capacity == 0 {
            return Err(ControlPointError::Config(
                "Event channel capacity must be greater than 0".to_string(),
            ));
        }

        if self.product_token.trim().is_empty() {
            return Err(ControlPointError::Config(
                "Product token must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
