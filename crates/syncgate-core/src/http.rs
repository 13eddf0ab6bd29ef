//! HTTP-style request and response descriptors
//!
//! The gateway only speaks HTTP semantics with JSON bodies. These types are
//! what application code hands to `execute` and what the transport seam
//! returns; they are also persisted verbatim inside queued operations.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictId;
use crate::operation::Priority;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// HEAD
    Head,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Methods that change server state and are eligible for queuing
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
    }

    /// Canonical upper-case name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unsupported method '{other}'")),
        }
    }
}

/// Header map with case-insensitive, unique keys.
///
/// Keys are stored lower-cased so that `Content-Type` and `content-type`
/// collapse into one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Headers(BTreeMap<String, String>);

impl From<BTreeMap<String, String>> for Headers {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<Headers> for BTreeMap<String, String> {
    fn from(headers: Headers) -> Self {
        headers.0
    }
}

impl Headers {
    /// Empty header map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header, returning the previous value
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), value.into())
    }

    /// Look up a header by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Remove a header by name
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    /// Whether a header is present
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(name, value)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// Request or response payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Body {
    /// No payload
    #[default]
    Empty,
    /// JSON document
    Json(serde_json::Value),
    /// Opaque bytes, base64 in persisted form
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl Body {
    /// Whether there is no payload
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::Json(_) => false,
        }
    }

    /// Wire encoding of the payload
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Empty => Vec::new(),
            Self::Json(value) => serde_json::to_vec(value).unwrap_or_default(),
            Self::Bytes(bytes) => bytes.clone(),
        }
    }

    /// Decode a wire payload, preferring JSON when the content type says so
    pub fn from_wire(bytes: Vec<u8>, content_type: Option<&str>) -> Self {
        if bytes.is_empty() {
            return Self::Empty;
        }
        let is_json = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false);
        if is_json {
            if let Ok(value) = serde_json::from_slice(&bytes) {
                return Self::Json(value);
            }
        }
        Self::Bytes(bytes)
    }

    /// The JSON document, if this is a JSON body
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A request as issued by application code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    /// HTTP method
    pub method: Method,
    /// Same-origin path (with optional query) or absolute URL on the configured origin
    pub url: String,
    /// Request headers
    #[serde(default)]
    pub headers: Headers,
    /// Optional payload
    #[serde(default)]
    pub body: Body,
    /// POST that only reads (GraphQL-style query); routed like a GET
    #[serde(default)]
    pub query_operation: bool,
    /// Delivery tier if the request ends up queued
    #[serde(default)]
    pub priority: Priority,
}

impl GatewayRequest {
    /// Request with no headers or body
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: Body::Empty,
            query_operation: false,
            priority: Priority::default(),
        }
    }

    /// GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// POST request with a JSON body
    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Post, url).with_body(Body::Json(body))
    }

    /// PUT request with a JSON body
    pub fn put(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Put, url).with_body(Body::Json(body))
    }

    /// DELETE request
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    /// Set a header
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replace the body
    pub fn with_body(mut self, body: Body) -> Self {
        if matches!(body, Body::Json(_)) && !self.headers.contains("content-type") {
            self.headers.insert("content-type", "application/json");
        }
        self.body = body;
        self
    }

    /// Set the queue priority tier
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Tag a POST as a read-only query
    pub fn as_query(mut self) -> Self {
        self.query_operation = true;
        self
    }
}

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Fresh network exchange
    Network,
    /// Cache entry within its max age
    Cache,
    /// Last-known-good entry served because the network failed
    StaleCache,
}

/// A response returned to application code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// HTTP status
    pub status: u16,
    /// Response headers
    #[serde(default)]
    pub headers: Headers,
    /// Response payload
    #[serde(default)]
    pub body: Body,
    /// Network or cache
    pub source: ResponseSource,
    /// Conflict record created for this response, if the server reported a
    /// stale base version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictId>,
}

impl GatewayResponse {
    /// Network response with the given status and body
    pub fn new(status: u16, body: Body) -> Self {
        let mut headers = Headers::new();
        if matches!(body, Body::Json(_)) {
            headers.insert("content-type", "application/json");
        }
        Self {
            status,
            headers,
            body,
            source: ResponseSource::Network,
            conflict: None,
        }
    }

    /// Network response with a JSON body
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self::new(status, Body::Json(value))
    }

    /// Set a header
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Copy of this response marked as served from cache
    pub fn served_from(&self, source: ResponseSource) -> Self {
        let mut response = self.clone();
        response.source = source;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headers_are_case_insensitive_and_unique() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        headers.insert("content-type", "application/json");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn test_deserialized_headers_are_normalised() {
        let headers: Headers =
            serde_json::from_value(json!({"Content-Type": "text/plain", "X-Trace": "a"})).unwrap();
        assert!(headers.contains("content-type"));
        assert_eq!(
            serde_json::to_value(&headers).unwrap(),
            json!({"content-type": "text/plain", "x-trace": "a"})
        );
    }

    #[test]
    fn test_bytes_body_persists_as_base64() {
        let body = Body::Bytes(vec![0, 1, 2, 255]);
        let encoded = serde_json::to_value(&body).unwrap();
        assert_eq!(encoded, json!({"kind": "bytes", "value": "AAEC/w=="}));
        let decoded: Body = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_wire_body_prefers_json_when_declared() {
        let body = Body::from_wire(br#"{"id":7}"#.to_vec(), Some("application/json; charset=utf-8"));
        assert_eq!(body.as_json(), Some(&json!({"id": 7})));

        let body = Body::from_wire(b"plain".to_vec(), Some("text/plain"));
        assert_eq!(body, Body::Bytes(b"plain".to_vec()));

        assert_eq!(Body::from_wire(Vec::new(), None), Body::Empty);
    }

    #[test]
    fn test_method_classification() {
        assert!(Method::Post.is_mutating());
        assert!(Method::Delete.is_mutating());
        assert!(!Method::Get.is_mutating());
        assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
        assert!("TRACE".parse::<Method>().is_err());
    }

    #[test]
    fn test_json_request_gets_content_type() {
        let request = GatewayRequest::post("/api/care-plans", json!({"name": "a"}));
        assert_eq!(request.headers.get("content-type"), Some("application/json"));
        assert!(!request.query_operation);
        assert!(request.as_query().query_operation);
    }
}
