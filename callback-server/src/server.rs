//! HTTP server for receiving UPnP event notifications.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use warp::http::{HeaderMap, Method, StatusCode};
use warp::Filter;

use crate::error::{Result, ServerError};

/// An inbound HTTP request as seen by a [`RequestHandler`].
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Request path without the query string
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    /// Value of a header as text, if present and valid UTF-8.
    ///
    /// Header names are matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Decides the response status for every inbound request.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: InboundRequest) -> StatusCode;
}

/// HTTP callback server for receiving UPnP event notifications.
///
/// The server accepts any method on any path and delegates the response status
/// to its [`RequestHandler`]. Responses carry no body.
pub struct CallbackServer {
    local_addr: SocketAddr,
    /// Shutdown signal sender
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Server task handle
    server_handle: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind the listener and start serving requests in a background task.
    ///
    /// Binding port `0` lets the OS pick a free port; read it back with
    /// [`CallbackServer::port`].
    pub async fn bind(addr: SocketAddr, handler: Arc<dyn RequestHandler>) -> Result<Self> {
        let routes = warp::method()
            .and(warp::path::full())
            .and(warp::header::headers_cloned())
            .and(warp::body::bytes())
            .then(
                move |method: Method,
                      path: warp::path::FullPath,
                      headers: HeaderMap,
                      body: Bytes| {
                    let handler = handler.clone();
                    let request = InboundRequest {
                        method,
                        path: path.as_str().to_string(),
                        headers,
                        body,
                    };
                    async move {
                        let status = dispatch(handler, request).await;
                        warp::reply::with_status(warp::reply(), status)
                    }
                },
            );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (local_addr, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, async move {
                let _ = shutdown_rx.await;
            })
            .map_err(|e| ServerError::Bind {
                addr,
                reason: e.to_string(),
            })?;

        let server_handle = tokio::spawn(server);
        info!(%local_addr, "callback server listening");

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the port the server is bound to.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Shutdown the callback server gracefully.
    ///
    /// Waits for in-flight requests to complete.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| ServerError::Task(e.to_string()))?;
        }

        info!(local_addr = %self.local_addr, "callback server stopped");
        Ok(())
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn dispatch(handler: Arc<dyn RequestHandler>, request: InboundRequest) -> StatusCode {
    let method = request.method.clone();
    let path = request.path.clone();
    debug!(%method, %path, body_len = request.body.len(), "inbound request");

    match AssertUnwindSafe(handler.handle(request)).catch_unwind().await {
        Ok(status) => {
            debug!(%method, %path, status = status.as_u16(), "inbound request handled");
            status
        }
        Err(_) => {
            error!(%method, %path, "request handler panicked");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Detect the local IP address used to reach `target`.
///
/// This uses a UDP socket connection to ask the OS for the route; no data is
/// actually sent.
pub fn detect_local_ip(target: SocketAddr) -> Option<IpAddr> {
    let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).ok()?;
    socket.connect(target).ok()?;
    let local_addr = socket.local_addr().ok()?;
    if local_addr.ip().is_unspecified() {
        return None;
    }
    Some(local_addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct Fixed(StatusCode);

    #[async_trait]
    impl RequestHandler for Fixed {
        async fn handle(&self, _request: InboundRequest) -> StatusCode {
            self.0
        }
    }

    struct Panics;

    #[async_trait]
    impl RequestHandler for Panics {
        async fn handle(&self, _request: InboundRequest) -> StatusCode {
            panic!("handler failure");
        }
    }

    fn request(method: &str, path: &str) -> InboundRequest {
        let mut headers = HeaderMap::new();
        headers.insert("sid", "uuid:sub-1".parse().unwrap());
        InboundRequest {
            method: Method::from_bytes(method.as_bytes()).unwrap(),
            path: path.to_string(),
            headers,
            body: Bytes::from_static(b"<e:propertyset/>"),
        }
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = request("NOTIFY", "/a/");
        assert_eq!(req.header("sid"), Some("uuid:sub-1"));
        assert_eq!(req.header("Sid"), Some("uuid:sub-1"));
        assert_eq!(req.header("NT"), None);
        assert_eq!(req.body_text(), "<e:propertyset/>");
    }

    #[tokio::test]
    async fn test_dispatch_returns_handler_status() {
        let handler = Arc::new(Fixed(StatusCode::PRECONDITION_FAILED));
        let status = dispatch(handler, request("NOTIFY", "/x/")).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn test_dispatch_maps_panic_to_internal_error() {
        let status = dispatch(Arc::new(Panics), request("NOTIFY", "/x/")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_detect_local_ip_towards_loopback() {
        let ip = detect_local_ip(SocketAddr::from((Ipv4Addr::LOCALHOST, 1900)));
        assert_eq!(ip, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[tokio::test]
    async fn test_bind_on_ephemeral_port_and_shutdown() {
        let server = CallbackServer::bind(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            Arc::new(Fixed(StatusCode::OK)),
        )
        .await
        .unwrap();

        assert_ne!(server.port(), 0);
        assert_eq!(server.local_addr().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = CallbackServer::bind(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            Arc::new(Fixed(StatusCode::OK)),
        )
        .await
        .unwrap();

        let second =
            CallbackServer::bind(first.local_addr(), Arc::new(Fixed(StatusCode::OK))).await;
        assert!(matches!(second, Err(ServerError::Bind { .. })));

        first.shutdown().await.unwrap();
    }
}
