//! Outbound HTTP.
//!
//! Every request the control point sends (description fetches, GENA
//! subscription traffic, SOAP actions) goes through the [`HttpClient`] trait
//! so the transport can be swapped out. [`ReqwestClient`] is the production
//! implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::discovery::UpnpVersion;
use crate::error::TransportError;

/// An outbound request. Headers are kept as text until they reach the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Build a request with one of the GENA methods (`SUBSCRIBE`, `UNSUBSCRIBE`).
    pub fn extension(method: &'static str, url: Url) -> Result<Self, TransportError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self::new(method, url))
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response with its body read to completion.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// `name` must be lowercase.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_xml(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.to_ascii_lowercase().contains("xml"))
            .unwrap_or(false)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends requests and reads responses.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
            headers.append(name, value);
        }

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

/// Run `request` on `client`, giving up after `timeout`.
pub(crate) async fn send(
    client: &dyn HttpClient,
    request: HttpRequest,
    timeout: Duration,
) -> Result<HttpResponse, TransportError> {
    tokio::time::timeout(timeout, client.execute(request))
        .await
        .map_err(|_| TransportError::Timeout)?
}

/// Value of the USER-AGENT header: `<os>/<arch> UPnP/<major>.<minor> <product>`.
pub fn user_agent(version: UpnpVersion, product_token: &str) -> String {
    format!(
        "{}/{} {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        version,
        product_token
    )
}
