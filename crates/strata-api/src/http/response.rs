//! Envelope response format for all API responses.
//!
//! Every response is wrapped in a consistent envelope:
//! ```json
//! {
//!   "data": { ... },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 5 },
//!   "errors": [],
//!   "_links": { "self": "..." }
//! }
//! ```
//! Errors use the same shape with `data: null`; see [`AppError`](super::error::AppError).

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

/// Envelope response wrapping all API data.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,

    pub meta: ApiMeta,

    /// Always empty on success; kept so clients can rely on the key.
    pub errors: Vec<serde_json::Value>,

    #[serde(rename = "_links", skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ApiMeta {
    pub request_id: String,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
    pub response_time_ms: u64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn with_link(mut self, rel: &str, href: impl Into<String>) -> Self {
        self.links.insert(rel.to_string(), href.into());
        self
    }
}

/// Started at the top of a handler; stamps the envelope when the data is ready.
pub struct RequestTimer {
    request_id: String,
    started: Instant,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self {
            request_id: uuid::Uuid::now_v7().to_string(),
            started: Instant::now(),
        }
    }

    pub fn finish<T: Serialize>(self, data: T) -> ApiResponse<T> {
        ApiResponse {
            data,
            meta: ApiMeta {
                request_id: self.request_id,
                timestamp: chrono::Utc::now().to_rfc3339(),
                response_time_ms: self.started.elapsed().as_millis() as u64,
            },
            errors: Vec::new(),
            links: BTreeMap::new(),
        }
    }
}
