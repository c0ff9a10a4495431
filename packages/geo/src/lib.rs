#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geoapify clients for the three location-centric collaborators:
//!
//! - [`geocode`]: free-text address to coordinates plus a normalized
//!   address string.
//! - [`places`]: nearest facility of a given type (police station,
//!   hospital, fire station) near a point.
//! - [`static_map`]: static map image URL with incident markers.
//!
//! All three share one [`GeoapifyClient`]. A missing `GEOAPIFY_API_KEY` is
//! not fatal at construction time; each call site reports the
//! not-configured condition in the way its caller needs (typed error,
//! sentinel result, or disabled-feature message).

pub mod geocode;
pub mod places;
pub mod static_map;

use thiserror::Error;

/// Environment variable holding the Geoapify credential.
pub const API_KEY_ENV: &str = "GEOAPIFY_API_KEY";

/// Errors from the geocoding and static-map clients.
///
/// The variants are deliberately distinct per failure reason so the
/// session controller can pick a fallback strategy per reason (simulated
/// coordinates for geocoding, a single error message for maps).
#[derive(Debug, Error)]
pub enum GeoError {
    /// The provider credential is missing. Never retried.
    #[error("Geocoding service is not configured (API key missing)")]
    NotConfigured,

    /// The provider matched nothing for the given input.
    #[error("No results found for address: {address}")]
    NoMatch {
        /// The address that failed to match.
        address: String,
    },

    /// The provider answered with a non-success status.
    #[error("Provider error: {message}")]
    Provider {
        /// Error detail from the provider, or the HTTP status.
        message: String,
    },

    /// The HTTP request itself failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body did not have the expected shape.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },
}

/// Shared Geoapify HTTP client.
pub struct GeoapifyClient {
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GeoapifyClient {
    /// Creates a client with an explicit (possibly absent) API key.
    #[must_use]
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Creates a client from the `GEOAPIFY_API_KEY` environment variable.
    ///
    /// A missing key degrades per call site rather than failing here.
    #[must_use]
    pub fn from_env() -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok();
        if api_key.is_none() {
            log::warn!(
                "{API_KEY_ENV} not set; geocoding, place search, and map \
                 generation will run degraded"
            );
        }
        Self::new(api_key)
    }

    /// Returns the configured API key, or [`GeoError::NotConfigured`].
    fn require_key(&self) -> Result<&str, GeoError> {
        self.api_key.as_deref().ok_or(GeoError::NotConfigured)
    }

    /// Whether a credential is configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}
