//! Geoapify forward geocoding client.
//!
//! Turns a free-text address into coordinates and a normalized address
//! string, requesting only the best match. Failure reasons stay distinct
//! (not configured / no match / provider / transport) so the caller can
//! choose its fallback per reason.
//!
//! See <https://apidocs.geoapify.com/docs/geocoding/forward-geocoding/>

use crate::{GeoError, GeoapifyClient};

/// Geoapify forward geocoding endpoint.
const SEARCH_URL: &str = "https://api.geoapify.com/v1/geocode/search";

/// A successful geocoding result.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedLocation {
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// The formatted address returned by the provider.
    pub formatted_address: Option<String>,
}

/// Geocodes a free-text address, returning the best match.
///
/// # Errors
///
/// Returns [`GeoError::NotConfigured`] when no API key is set,
/// [`GeoError::NoMatch`] when the provider finds nothing,
/// [`GeoError::Provider`] for non-success responses, and
/// [`GeoError::Http`] for transport failures.
pub async fn geocode(
    client: &GeoapifyClient,
    address: &str,
) -> Result<GeocodedLocation, GeoError> {
    let api_key = client.require_key()?;

    log::debug!("Geocoding address: {address}");

    let resp = client
        .client
        .get(SEARCH_URL)
        .query(&[("text", address), ("limit", "1"), ("apiKey", api_key)])
        .send()
        .await?;

    let status = resp.status();
    let body: serde_json::Value = resp.json().await?;

    if !status.is_success() {
        let message = body["message"]
            .as_str()
            .map_or_else(|| format!("HTTP {status}"), String::from);
        log::error!("Geoapify geocoding error for {address:?}: {message}");
        return Err(GeoError::Provider { message });
    }

    parse_response(&body).ok_or_else(|| GeoError::NoMatch {
        address: address.to_string(),
    })
}

/// Extracts the best match from a Geoapify geocoding response.
fn parse_response(body: &serde_json::Value) -> Option<GeocodedLocation> {
    let best = body["features"].as_array()?.first()?;
    let properties = &best["properties"];

    Some(GeocodedLocation {
        latitude: properties["lat"].as_f64()?,
        longitude: properties["lon"].as_f64()?,
        formatted_address: properties["formatted"].as_str().map(String::from),
    })
}
