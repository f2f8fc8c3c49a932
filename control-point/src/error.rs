//! Error types for the control point.

use thiserror::Error;

/// Errors returned synchronously by control point operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlPointError {
    #[error("{0} is already active")]
    AlreadyActive(&'static str),

    #[error("{0} is not active")]
    NotActive(&'static str),

    #[error("service is not connected")]
    ServiceNotConnected,

    #[error("service already has a subscription")]
    AlreadySubscribed,

    #[error("service has no subscription")]
    NotSubscribed,

    #[error("root device description failed to load")]
    DescriptorErroneous,

    #[error("root device is no longer available")]
    DescriptorInvalid,

    #[error("device {0} not found in root device description")]
    DeviceNotFound(String),

    #[error("device {0} is already connected")]
    AlreadyConnected(String),

    #[error("device connection is closed")]
    NotConnected,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("discovery error: {0}")]
    Discovery(String),
}

/// Failures of a single HTTP exchange.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Why a device or service description could not be loaded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("invalid description: {0}")]
    Parse(String),
}

impl From<upnp_description::DescriptionError> for FetchError {
    fn from(err: upnp_description::DescriptionError) -> Self {
        FetchError::Parse(err.to_string())
    }
}

/// Why a SUBSCRIBE or renewal request did not produce a subscription.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriptionFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("device answered with HTTP status {0}")]
    HttpStatus(u16),

    #[error("response carried no SID header")]
    MissingSid,

    #[error("service can no longer be reached for renewal")]
    ServiceUnreachable,
}

/// Outcome of an action invocation that did not return output arguments.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("{action} failed with UPnP error {code}: {description}")]
    Remote {
        action: String,
        code: u16,
        description: String,
    },

    #[error("{action} failed with HTTP status {status}")]
    Http { action: String, status: u16 },

    #[error("{action} failed: {source}")]
    Transport {
        action: String,
        source: TransportError,
    },

    #[error("{action} returned unexpected content type {content_type:?}")]
    ContentType { action: String, content_type: String },

    #[error("{action} returned an undecodable response: {reason}")]
    Decode { action: String, reason: String },

    #[error("{action} was aborted")]
    Aborted { action: String },
}

impl ActionError {
    pub fn action(&self) -> &str {
        match self {
            ActionError::Remote { action, .. }
            | ActionError::Http { action, .. }
            | ActionError::Transport { action, .. }
            | ActionError::ContentType { action, .. }
            | ActionError::Decode { action, .. }
            | ActionError::Aborted { action } => action,
        }
    }
}

/// Convenience Result type alias for control point operations.
pub type Result<T> = std::result::Result<T, ControlPointError>;
