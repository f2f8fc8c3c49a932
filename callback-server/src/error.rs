//! Error types for the callback server.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised while starting or stopping the listener.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind callback server to {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },

    #[error("callback server task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
