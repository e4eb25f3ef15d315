//! HTTP client seam
//!
//! The core never talks to a socket directly. Hosts hand the session an
//! [`HttpClient`] (the bundled [`super::ReqwestHttpClient`], the in-process
//! [`crate::demo::DemoHardware`], or a test double).

use serde_json::Value;
use std::fmt;

use super::TransportError;

/// HTTP verbs used against the tester API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw response as seen by the client: status code plus decoded JSON body
/// (if the body was JSON at all)
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl HttpResponse {
    /// Build a response from a status code and JSON body
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }

    /// Response with no (or undecodable) body
    pub fn empty(status: u16) -> Self {
        Self { status, body: None }
    }

    /// 2xx check
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstraction over the HTTP stack.
///
/// `path` is absolute and already carries the API base (for example
/// `/api/hardware/robot/status`). Implementations must not retry on their
/// own; retry policy belongs to the poller.
#[allow(async_fn_in_trait)]
pub trait HttpClient {
    /// Perform one request and return the raw response
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError>;
}

impl<T: HttpClient> HttpClient for &T {
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError> {
        (**self).request(method, path, body).await
    }
}

impl<T: HttpClient> HttpClient for std::rc::Rc<T> {
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError> {
        (**self).request(method, path, body).await
    }
}
