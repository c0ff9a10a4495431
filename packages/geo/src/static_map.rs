//! Geoapify static-map client.
//!
//! Builds a static map image URL centered on a point, with one colored
//! marker per incident that carries coordinates, and validates the URL is
//! actually servable with a HEAD request before handing it back.

use citysafe_models::{HazardCategory, MapIncident};

use crate::{GeoError, GeoapifyClient};

/// Geoapify static map endpoint.
const STATIC_MAP_URL: &str = "https://maps.geoapify.com/v1/staticmap";

/// Map image dimensions and zoom, fixed for all requests.
const MAP_WIDTH: u32 = 600;
const MAP_HEIGHT: u32 = 400;
const MAP_ZOOM: u32 = 14;

/// Fixed category → marker color table. Unknown categories render grey.
const MARKER_COLORS: &[(HazardCategory, &str)] = &[
    (HazardCategory::Fire, "red"),
    (HazardCategory::MedicalEmergency, "orange"),
    (HazardCategory::RoadHazard, "yellow"),
    (HazardCategory::SuspiciousActivity, "purple"),
    (HazardCategory::UtilityIssue, "blue"),
    (HazardCategory::WeatherAlert, "darkblue"),
];

/// Marker color for a hazard category.
#[must_use]
pub fn marker_color(category: HazardCategory) -> &'static str {
    MARKER_COLORS
        .iter()
        .find(|(cat, _)| *cat == category)
        .map_or("grey", |(_, color)| color)
}

/// Builds the `marker=` parameter value for the incidents that carry both
/// coordinates. Returns `None` when no incident is drawable.
fn marker_string(incidents: &[MapIncident]) -> Option<String> {
    let markers: Vec<String> = incidents
        .iter()
        .filter_map(|incident| {
            let (lat, lon) = incident.latitude.zip(incident.longitude)?;
            let color = marker_color(incident.category);
            Some(format!("lonlat:{lon},{lat};color:{color};size:medium"))
        })
        .collect();

    if markers.is_empty() {
        None
    } else {
        Some(markers.join("|"))
    }
}

/// Builds the full static-map URL for a center point and incident markers.
fn build_url(api_key: &str, latitude: f64, longitude: f64, incidents: &[MapIncident]) -> String {
    let mut url = format!(
        "{STATIC_MAP_URL}?style=osm-carto&width={MAP_WIDTH}&height={MAP_HEIGHT}\
         &center=lonlat:{longitude},{latitude}&zoom={MAP_ZOOM}"
    );

    if let Some(markers) = marker_string(incidents) {
        url.push_str("&marker=");
        url.push_str(&markers);
    }

    url.push_str("&apiKey=");
    url.push_str(api_key);
    url
}

/// Builds and validates a static-map URL for the given center and incidents.
///
/// The URL is checked with a lightweight HEAD request; a non-success
/// response is a hard failure (the caller shows an error message, never a
/// broken image).
///
/// # Errors
///
/// Returns [`GeoError::NotConfigured`] when no API key is set,
/// [`GeoError::Provider`] when the validation request is refused, and
/// [`GeoError::Http`] for transport failures.
pub async fn incident_map_url(
    client: &GeoapifyClient,
    latitude: f64,
    longitude: f64,
    incidents: &[MapIncident],
) -> Result<String, GeoError> {
    let api_key = client.require_key()?;
    let url = build_url(api_key, latitude, longitude, incidents);

    log::debug!("Validating static map URL (center {latitude:.4}, {longitude:.4})");

    let resp = client.client.head(&url).send().await?;
    let status = resp.status();

    if !status.is_success() {
        log::error!("Static map URL validation failed: HTTP {status}");
        return Err(GeoError::Provider {
            message: format!("Map provider returned status {status} for the generated URL."),
        });
    }

    Ok(url)
}
