//! Cache configuration.
//!
//! Controls whether the consumer replays cached responses and how request
//! fingerprints are normalized across environments.

use serde::Deserialize;

/// Options recognized by the transfer cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false the consumer never replays from cache.
    pub production_mode: bool,
    /// Header whose last value replaces the URL host in fingerprints.
    pub header_name_to_override_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            production_mode: true,
            header_name_to_override_url: None,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            production_mode: settings.production_mode,
            header_name_to_override_url: settings.override_header.clone(),
        }
    }
}

impl CacheConfig {
    pub fn with_override_header(mut self, header: impl Into<String>) -> Self {
        self.header_name_to_override_url = Some(header.into());
        self
    }

    /// The override header, ignoring blank names.
    pub fn override_header(&self) -> Option<&str> {
        self.header_name_to_override_url
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}
