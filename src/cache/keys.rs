//! Store key definitions and request fingerprinting.

use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;

use url::{Position, Url};

use super::error::CacheError;
use super::hash::hash;
use super::ledger::LedgerEntry;
use super::request::{RequestDescription, TransferRequest};
use super::response::CachedSnapshot;

/// Key into the shared state store, tagged with the type stored under it.
pub struct StateKey<T> {
    name: Cow<'static, str>,
    phantom: PhantomData<fn() -> T>,
}

impl<T> StateKey<T> {
    pub const fn new_static(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            phantom: PhantomData,
        }
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            phantom: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for StateKey<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            phantom: PhantomData,
        }
    }
}

impl<T> fmt::Debug for StateKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateKey").field(&self.name).finish()
    }
}

impl<T> PartialEq for StateKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for StateKey<T> {}

/// Ordered ledger of fingerprints seen by the producer.
pub static LEDGER_KEY: StateKey<Vec<LedgerEntry>> = StateKey::new_static("server_state_data");
/// Highest sequence id recorded by the producer.
pub static LAST_ID_KEY: StateKey<u64> = StateKey::new_static("server_state_last_id");
/// Whether the producer ran with caching active.
pub static ACTIVATION_KEY: StateKey<bool> = StateKey::new_static("is_cache_activated");

/// Key of the snapshot stored for `fingerprint` at sequence `id`.
pub fn snapshot_state_key(fingerprint: &str, id: u64) -> StateKey<CachedSnapshot> {
    StateKey::new(super::hash::snapshot_key(fingerprint, id))
}

/// Turns requests into fingerprints that agree across environments.
#[derive(Debug, Clone, Default)]
pub struct RequestKeyBuilder {
    override_header: Option<String>,
}

impl RequestKeyBuilder {
    /// `override_header` names a header whose last value replaces the URL
    /// authority before hashing.
    pub fn new(override_header: Option<String>) -> Self {
        Self {
            override_header: override_header.filter(|name| !name.trim().is_empty()),
        }
    }

    pub fn override_header(&self) -> Option<&str> {
        self.override_header.as_deref()
    }

    pub fn fingerprint(&self, request: &TransferRequest) -> Result<String, CacheError> {
        let description = self.describe(request)?;
        Ok(hash(description.canonical()))
    }

    fn describe(&self, request: &TransferRequest) -> Result<RequestDescription, CacheError> {
        let mut description = request.describe();
        let Some(header) = self.override_header.as_deref() else {
            return Ok(description);
        };

        let value = request
            .last_header_value(header)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| CacheError::MissingKeyHeader {
                header: header.to_string(),
            })?;

        description.url = replace_authority(&description.url, &value)?;
        description.url_with_params = replace_authority(&description.url_with_params, &value)?;
        Ok(description)
    }
}

/// Drop the scheme of `url` and put `authority` in place of its host.
fn replace_authority(url: &str, authority: &str) -> Result<String, CacheError> {
    let parsed = Url::parse(url).map_err(|err| CacheError::InvalidUrl {
        url: url.to_string(),
        reason: err.to_string(),
    })?;
    if !parsed.has_host() {
        return Err(CacheError::InvalidUrl {
            url: url.to_string(),
            reason: "url has no host".to_string(),
        });
    }
    Ok(format!("{authority}{}", &parsed[Position::BeforePath..]))
}

#[cfg(test)]
mod tests {
    use http::{HeaderName, HeaderValue, Method};
    use serde_json::json;

    use super::*;

    fn x_host(value: &'static str) -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-host"),
            HeaderValue::from_static(value),
        )
    }

    #[test]
    fn well_known_keys_match_payload_names() {
        assert_eq!(LEDGER_KEY.name(), "server_state_data");
        assert_eq!(LAST_ID_KEY.name(), "server_state_last_id");
        assert_eq!(ACTIVATION_KEY.name(), "is_cache_activated");
    }

    #[test]
    fn identical_requests_share_a_fingerprint() {
        let builder = RequestKeyBuilder::default();
        let a = TransferRequest::get("/items").with_param("id", "1");
        let b = TransferRequest::get("/items").with_param("id", "1");
        assert_eq!(
            builder.fingerprint(&a).expect("fingerprint"),
            builder.fingerprint(&b).expect("fingerprint")
        );
    }

    #[test]
    fn method_url_params_and_body_change_the_fingerprint() {
        let builder = RequestKeyBuilder::default();
        let base = TransferRequest::new(Method::POST, "/items").with_body(json!({"q": 1}));
        let variants = [
            TransferRequest::new(Method::PUT, "/items").with_body(json!({"q": 1})),
            TransferRequest::new(Method::POST, "/things").with_body(json!({"q": 1})),
            TransferRequest::new(Method::POST, "/items")
                .with_param("id", "1")
                .with_body(json!({"q": 1})),
            TransferRequest::new(Method::POST, "/items").with_body(json!({"q": 2})),
        ];

        let base_fp = builder.fingerprint(&base).expect("fingerprint");
        for variant in &variants {
            assert_ne!(base_fp, builder.fingerprint(variant).expect("fingerprint"));
        }
    }

    #[test]
    fn override_header_normalizes_scheme_and_host() {
        let builder = RequestKeyBuilder::new(Some("x-host".to_string()));
        let (name, value) = x_host("api.example.com");

        let internal = TransferRequest::get("http://backend.internal:8080/items")
            .with_param("id", "1")
            .with_header(name.clone(), value.clone());
        let public = TransferRequest::get("https://api.example.com/items")
            .with_param("id", "1")
            .with_header(name, value);

        assert_eq!(
            builder.fingerprint(&internal).expect("fingerprint"),
            builder.fingerprint(&public).expect("fingerprint")
        );
    }

    #[test]
    fn override_uses_the_last_header_value() {
        let builder = RequestKeyBuilder::new(Some("x-host".to_string()));
        let (name, first) = x_host("first.example.com");
        let (_, last) = x_host("last.example.com");
        let request = TransferRequest::get("https://a.example.com/items")
            .with_header(name.clone(), first)
            .with_header(name, last);

        let description = builder.describe(&request).expect("description");
        assert_eq!(description.url, "last.example.com/items");
    }

    #[test]
    fn non_ascii_override_values_are_used_as_sent() {
        let builder = RequestKeyBuilder::new(Some("x-host".to_string()));
        let value = HeaderValue::from_bytes(b"caf\xc3\xa9.example").expect("opaque bytes");
        let request = TransferRequest::get("https://a.example.com/items")
            .with_header(HeaderName::from_static("x-host"), value);

        let description = builder.describe(&request).expect("description");
        assert_eq!(description.url, "caf\u{e9}.example/items");
    }

    #[test]
    fn missing_or_empty_override_header_fails() {
        let builder = RequestKeyBuilder::new(Some("x-host".to_string()));

        let err = builder
            .fingerprint(&TransferRequest::get("https://a.example.com/items"))
            .expect_err("header is required");
        assert!(matches!(err, CacheError::MissingKeyHeader { ref header } if header == "x-host"));

        let (name, empty) = x_host("");
        let request = TransferRequest::get("https://a.example.com/items").with_header(name, empty);
        assert!(matches!(
            builder.fingerprint(&request),
            Err(CacheError::MissingKeyHeader { .. })
        ));
    }

    #[test]
    fn relative_urls_cannot_be_rewritten() {
        let builder = RequestKeyBuilder::new(Some("x-host".to_string()));
        let (name, value) = x_host("api.example.com");
        let request = TransferRequest::get("/items").with_header(name, value);

        assert!(matches!(
            builder.fingerprint(&request),
            Err(CacheError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn blank_override_header_name_disables_rewriting() {
        let builder = RequestKeyBuilder::new(Some("  ".to_string()));
        assert_eq!(builder.override_header(), None);
        assert!(builder.fingerprint(&TransferRequest::get("/items")).is_ok());
    }
}
