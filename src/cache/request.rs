//! Request description as seen by the cache.

use std::collections::BTreeMap;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde_json::Value;

use super::response::headers_to_map;

/// How the caller expects the response body to be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Json,
    Text,
}

/// Outgoing request handed to the interceptor.
///
/// Only the description is hashed; what the transport sends is never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub method: Method,
    /// URL without the query parameters held in `params`.
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub response_type: ResponseType,
    pub with_credentials: bool,
}

impl TransferRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            response_type: ResponseType::default(),
            with_credentials: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = with_credentials;
        self
    }

    /// `url` with `params` appended as an encoded query string.
    pub fn url_with_params(&self) -> String {
        if self.params.is_empty() {
            return self.url.clone();
        }

        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish();

        let separator = match self.url.find('?') {
            None => '?',
            Some(index) if index + 1 < self.url.len() && !self.url.ends_with('&') => '&',
            Some(_) => return format!("{}{query}", self.url),
        };
        format!("{}{separator}{query}", self.url)
    }

    /// Last value sent for `name`, if any.
    pub fn last_header_value(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(name)
            .iter()
            .last()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
    }

    pub(crate) fn describe(&self) -> RequestDescription {
        RequestDescription {
            method: self.method.as_str().to_string(),
            url: self.url.clone(),
            url_with_params: self.url_with_params(),
            params: self.params.clone(),
            headers: headers_to_map(&self.headers),
            body: self.body.as_ref().map(sorted_keys),
            response_type: self.response_type,
            with_credentials: self.with_credentials,
        }
    }
}

/// Canonical, hash-ready view of a [`TransferRequest`].
///
/// Field order is fixed and header names are sorted, so the serialized form is
/// identical in every environment for the same logical request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RequestDescription {
    pub method: String,
    pub url: String,
    pub url_with_params: String,
    pub params: Vec<(String, String)>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: Option<Value>,
    pub response_type: ResponseType,
    pub with_credentials: bool,
}

impl RequestDescription {
    pub fn canonical(&self) -> String {
        // A struct of strings, maps and JSON values cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Rebuild `value` with every object's keys in lexicographic order.
fn sorted_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), sorted_keys(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_keys).collect()),
        other => other.clone(),
    }
}
