//! Envelope normalization
//!
//! Every server answer is reduced to `{ok, value, error}` before anything
//! else in the core looks at it. The server is inconsistent about the
//! success flag (`ok` on newer routes, `success` on the hardware routes) and
//! some status routes return the bare resource without any wrapper, so the
//! accept/reject decision is made here once.

use serde_json::{Map, Value};
use tracing::debug;

use super::{HttpClient, HttpMethod, HttpResponse, TransportError};

/// Normalized server answer
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Whether the server reported success (always false for non-2xx)
    pub ok: bool,
    /// The `data` member when `ok`, or the whole body for bare resources
    pub value: Option<Value>,
    /// Server-supplied reason, or `HTTP <status>` when none was given
    pub error: Option<String>,
    /// HTTP status code the envelope came from
    pub status: u16,
}

impl Envelope {
    /// Successful envelope carrying `value`
    pub fn success(value: Option<Value>) -> Self {
        Self {
            ok: true,
            value,
            error: None,
            status: 200,
        }
    }

    /// Failed envelope carrying `reason`
    pub fn failure(status: u16, reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            value: None,
            error: Some(reason.into()),
            status,
        }
    }

    /// Normalize a raw HTTP response.
    ///
    /// Returns `Err` only when the envelope is absent or malformed on a 2xx
    /// response; every non-2xx answer becomes `ok = false`.
    pub fn from_response(response: HttpResponse) -> Result<Self, TransportError> {
        let status = response.status;
        let success_status = response.is_success();

        match response.body {
            None if success_status => Err(TransportError::MalformedEnvelope(format!(
                "empty body on HTTP {status}"
            ))),
            None => Ok(Self::failure(status, format!("HTTP {status}"))),
            Some(Value::Object(map)) => Ok(Self::from_object(status, success_status, map)),
            Some(other) if success_status => Err(TransportError::MalformedEnvelope(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
            Some(_) => Ok(Self::failure(status, format!("HTTP {status}"))),
        }
    }

    fn from_object(status: u16, success_status: bool, mut map: Map<String, Value>) -> Self {
        let flag = map
            .get("ok")
            .or_else(|| map.get("success"))
            .and_then(Value::as_bool);

        match (success_status, flag) {
            (true, Some(true)) => Self {
                ok: true,
                value: map.remove("data").filter(|v| !v.is_null()),
                error: None,
                status,
            },
            // Bare resource such as `GET /hardware/robot/status`
            (true, None) => Self {
                ok: true,
                value: Some(Value::Object(map)),
                error: None,
                status,
            },
            _ => {
                let reason = error_text(&map).unwrap_or_else(|| format!("HTTP {status}"));
                Self::failure(status, reason)
            }
        }
    }

    /// Convert into a plain `Result`, keeping the server reason on failure
    pub fn into_result(self) -> Result<Option<Value>, String> {
        if self.ok {
            Ok(self.value)
        } else {
            Err(self.error.unwrap_or_else(|| format!("HTTP {}", self.status)))
        }
    }
}

fn error_text(map: &Map<String, Value>) -> Option<String> {
    ["error", "detail", "message"]
        .iter()
        .filter_map(|key| map.get(*key))
        .find(|v| !v.is_null())
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A request against the tester API, relative to the API base
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Put,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// Transport adapter: prefixes the API base and normalizes envelopes
pub struct ApiClient<H> {
    http: H,
    base: String,
}

impl<H: HttpClient> ApiClient<H> {
    /// Create an adapter over `http` rooted at `base` (for example `/api`)
    pub fn new(http: H, base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { http, base }
    }

    /// Access the underlying client
    pub fn http(&self) -> &H {
        &self.http
    }

    /// API base path
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Absolute path for an API-relative path
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base, path)
        } else {
            format!("{}/{}", self.base, path)
        }
    }

    /// Perform `request` and normalize the answer
    pub async fn call(&self, request: &ApiRequest) -> Result<Envelope, TransportError> {
        let url = self.url(&request.path);
        debug!(method = %request.method, path = %url, "api request");
        let response = self
            .http
            .request(request.method, &url, request.body.as_ref())
            .await?;
        let envelope = Envelope::from_response(response)?;
        if !envelope.ok {
            debug!(path = %url, error = ?envelope.error, "api request rejected");
        }
        Ok(envelope)
    }

    /// Convenience GET
    pub async fn get(&self, path: &str) -> Result<Envelope, TransportError> {
        self.call(&ApiRequest::get(path)).await
    }
}
