//! Transport events and the snapshot format they are cached in.

use std::collections::BTreeMap;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::CacheError;
use super::keys::StateKey;
use super::store::{StateStore, StateStoreExt};

/// Snapshots with a status at or above this value replay as failures.
pub const ERROR_STATUS_THRESHOLD: u16 = 400;

/// Event emitted by a transport while a request is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpEvent {
    /// The request was dispatched.
    Sent,
    /// Body bytes received so far.
    Progress { loaded: u64, total: Option<u64> },
    /// Terminal success value.
    Response(TransferResponse),
}

/// Successful response delivered by a transport or replayed from cache.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResponse {
    pub body: Option<Value>,
    pub headers: HeaderMap,
    pub status: StatusCode,
    pub status_text: String,
    pub url: Option<String>,
}

impl TransferResponse {
    pub fn new(status: StatusCode, body: Option<Value>) -> Self {
        Self {
            body,
            headers: HeaderMap::new(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            status,
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// Terminal failure value of a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpErrorResponse {
    pub error: Option<Value>,
    pub headers: HeaderMap,
    /// `0` when the request never produced an HTTP response.
    pub status: u16,
    pub status_text: String,
    pub url: Option<String>,
}

impl HttpErrorResponse {
    pub fn new(status: u16, status_text: impl Into<String>, error: Option<Value>) -> Self {
        Self {
            error,
            headers: HeaderMap::new(),
            status,
            status_text: status_text.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Whether replaying a snapshot of this failure reproduces a failure.
    pub fn is_replayable(&self) -> bool {
        self.status >= ERROR_STATUS_THRESHOLD
    }
}

/// Serialized response or failure captured by the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub url: String,
}

impl CachedSnapshot {
    pub fn from_response(response: &TransferResponse) -> Self {
        Self {
            body: response.body.clone(),
            error: None,
            headers: headers_to_map(&response.headers),
            status: response.status.as_u16(),
            status_text: response.status_text.clone(),
            url: response.url.clone().unwrap_or_default(),
        }
    }

    pub fn from_failure(failure: &HttpErrorResponse) -> Self {
        Self {
            body: None,
            error: failure.error.clone(),
            headers: headers_to_map(&failure.headers),
            status: failure.status,
            status_text: failure.status_text.clone(),
            url: failure.url.clone().unwrap_or_default(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status >= ERROR_STATUS_THRESHOLD
    }

    /// Rebuild the value the transport originally delivered.
    ///
    /// `key` only labels the error when the stored status is not a valid
    /// HTTP status code.
    pub fn replay(self, key: &str) -> Result<Result<TransferResponse, HttpErrorResponse>, CacheError> {
        let headers = map_to_headers(&self.headers);
        let is_failure = self.is_failure();
        let url = (!self.url.is_empty()).then_some(self.url);

        if is_failure {
            return Ok(Err(HttpErrorResponse {
                error: self.error,
                headers,
                status: self.status,
                status_text: self.status_text,
                url,
            }));
        }

        let status = StatusCode::from_u16(self.status).map_err(|_| CacheError::InvalidSnapshot {
            key: key.to_string(),
            status: self.status,
        })?;

        Ok(Ok(TransferResponse {
            body: self.body,
            headers,
            status,
            status_text: self.status_text,
            url,
        }))
    }
}

/// Snapshot view over a shared state store.
pub struct ResponseCache<'a> {
    store: &'a dyn StateStore,
}

impl<'a> ResponseCache<'a> {
    pub fn new(store: &'a dyn StateStore) -> Self {
        Self { store }
    }

    pub fn has(&self, key: &StateKey<CachedSnapshot>) -> bool {
        self.store.has_key(key)
    }

    pub fn get(&self, key: &StateKey<CachedSnapshot>) -> Result<Option<CachedSnapshot>, CacheError> {
        self.store.read(key)
    }

    pub fn put(&self, key: &StateKey<CachedSnapshot>, snapshot: &CachedSnapshot) -> Result<(), CacheError> {
        self.store.write(key, snapshot)
    }
}

/// Collect a header map into name → all values, names sorted.
pub fn headers_to_map(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(name.as_str().to_string()).or_default().push(value);
    }
    map
}

fn map_to_headers(map: &BTreeMap<String, Vec<String>>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, values) in map {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use http::header::{CONTENT_TYPE, SET_COOKIE};
    use serde_json::json;

    use super::*;

    #[test]
    fn snapshot_serializes_with_payload_field_names() {
        let response = TransferResponse::new(StatusCode::OK, Some(json!([1, 2])))
            .with_url("/items?id=1");
        let snapshot = CachedSnapshot::from_response(&response);

        let value = serde_json::to_value(&snapshot).expect("snapshot serializes");
        assert_eq!(
            value,
            json!({
                "body": [1, 2],
                "headers": {},
                "status": 200,
                "statusText": "OK",
                "url": "/items?id=1",
            })
        );
    }

    #[test]
    fn success_snapshot_replays_as_response() {
        let response = TransferResponse::new(StatusCode::CREATED, Some(json!({"id": 7})))
            .with_url("https://api.example.com/items")
            .with_header(SET_COOKIE, HeaderValue::from_static("a=1"))
            .with_header(SET_COOKIE, HeaderValue::from_static("b=2"))
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let replayed = CachedSnapshot::from_response(&response)
            .replay("k")
            .expect("valid snapshot")
            .expect("success replay");

        assert_eq!(replayed.status, StatusCode::CREATED);
        assert_eq!(replayed.status_text, "Created");
        assert_eq!(replayed.body, Some(json!({"id": 7})));
        assert_eq!(replayed.url.as_deref(), Some("https://api.example.com/items"));
        let cookies: Vec<_> = replayed.headers.get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn failure_snapshot_replays_as_error() {
        let failure = HttpErrorResponse::new(404, "Not Found", Some(json!({"reason": "gone"})))
            .with_url("/items?id=9");

        let replayed = CachedSnapshot::from_failure(&failure)
            .replay("k")
            .expect("valid snapshot")
            .expect_err("failure replay");

        assert_eq!(replayed, failure);
    }

    #[test]
    fn non_http_status_below_threshold_is_rejected() {
        let snapshot = CachedSnapshot {
            body: None,
            error: None,
            headers: BTreeMap::new(),
            status: 0,
            status_text: "Unknown Error".to_string(),
            url: String::new(),
        };

        let err = snapshot.replay("k").expect_err("status 0 cannot be a response");
        assert!(matches!(err, CacheError::InvalidSnapshot { status: 0, .. }));
    }

    #[test]
    fn response_cache_stores_snapshots_under_typed_keys() {
        let store = crate::cache::store::MemoryStateStore::new();
        let cache = ResponseCache::new(&store);
        let key = crate::cache::keys::snapshot_state_key("fp", 1);
        let snapshot = CachedSnapshot::from_response(&TransferResponse::new(StatusCode::OK, None));

        assert!(!cache.has(&key));
        assert_eq!(cache.get(&key).expect("readable"), None);
        cache.put(&key, &snapshot).expect("writable");
        assert!(cache.has(&key));
        assert_eq!(cache.get(&key).expect("readable"), Some(snapshot));
    }

    #[test]
    fn network_failures_are_not_replayable() {
        assert!(!HttpErrorResponse::new(0, "Unknown Error", None).is_replayable());
        assert!(HttpErrorResponse::new(500, "Internal Server Error", None).is_replayable());
    }
}
