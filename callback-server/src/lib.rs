//! Inbound HTTP listener for UPnP event notifications.
//!
//! This crate provides a small HTTP server that accepts GENA `NOTIFY` requests
//! and hands them to a single [`RequestHandler`]. It knows nothing about
//! subscriptions or devices: the handler decides which status code each request
//! earns.
//!
//! # Overview
//!
//! - [`CallbackServer`]: binds a local address, forwards every inbound request to
//!   the handler and answers with the status code the handler returns.
//! - [`PrefixRouter`]: longest-prefix table used by handlers to map a request path
//!   onto whatever owns that callback path.
//! - [`InboundRequest`]: method, path, headers and raw body of a request.
//!
//! A handler that panics yields `500 Internal Server Error`; the server keeps
//! running.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use callback_server::{CallbackServer, InboundRequest, RequestHandler, StatusCode};
//!
//! struct AcceptAll;
//!
//! #[async_trait]
//! impl RequestHandler for AcceptAll {
//!     async fn handle(&self, request: InboundRequest) -> StatusCode {
//!         println!("{} {}", request.method, request.path);
//!         StatusCode::OK
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callback_server::ServerError> {
//!     let server = CallbackServer::bind("0.0.0.0:0".parse().unwrap(), Arc::new(AcceptAll)).await?;
//!     println!("listening on port {}", server.port());
//!     server.shutdown().await
//! }
//! ```

pub mod error;
pub mod router;
pub mod server;

pub use error::{Result, ServerError};
pub use router::PrefixRouter;
pub use server::{detect_local_ip, CallbackServer, InboundRequest, RequestHandler};
pub use warp::http::{HeaderMap, Method, StatusCode};
