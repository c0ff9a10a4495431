//! Geoapify places-search client.
//!
//! Finds the single nearest facility of a requested type near a point.
//! This client never raises: every failure mode (missing credential,
//! unmapped place type, provider error, no results, transport failure) is
//! encoded as a successful [`FoundPlace`] whose `name` and `notes` describe
//! the condition, because the assistant engine feeds the result straight
//! back to the model as a tool result.

use crate::GeoapifyClient;

/// Geoapify places endpoint.
const PLACES_URL: &str = "https://api.geoapify.com/v2/places";

/// Search radius around the bias point, in meters.
const SEARCH_RADIUS_METERS: u32 = 10_000;

/// Fixed keyword to Geoapify category table.
///
/// Matched by substring against the lowercased place type, first hit wins.
const CATEGORY_RULES: &[(&str, &str)] = &[
    ("police", "service.police"),
    ("hospital", "healthcare.hospital,healthcare.clinic,healthcare.doctor"),
    ("clinic", "healthcare.hospital,healthcare.clinic,healthcare.doctor"),
    ("doctor", "healthcare.hospital,healthcare.clinic,healthcare.doctor"),
    ("fire station", "amenity.fire_station"),
    ("fire department", "amenity.fire_station"),
];

/// The outcome of a place search, success or descriptive sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundPlace {
    /// Place name, or a sentinel describing the failure.
    pub name: String,
    /// Place address, or failure detail.
    pub address: String,
    /// Provenance of the data or the failure reason.
    pub notes: String,
}

/// Maps a free-text place type to Geoapify categories.
///
/// Returns `None` for types with no mapping; the provider is not called in
/// that case.
#[must_use]
pub fn provider_categories(place_type: &str) -> Option<&'static str> {
    let lowered = place_type.to_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, categories)| *categories)
}

/// Finds the nearest place of the given type around a point.
///
/// Searches within a fixed 10 km radius biased toward the point and
/// requests exactly one result.
pub async fn find_place(
    client: &GeoapifyClient,
    place_type: &str,
    latitude: f64,
    longitude: f64,
) -> FoundPlace {
    let Ok(api_key) = client.require_key() else {
        log::error!("{} is not set for place search", crate::API_KEY_ENV);
        return FoundPlace {
            name: "Service Not Configured".to_string(),
            address: "Places API key is missing.".to_string(),
            notes: "Places API key not found in the environment. Please contact an administrator."
                .to_string(),
        };
    };

    let Some(categories) = provider_categories(place_type) else {
        return FoundPlace {
            name: format!("No specific category mapping for \"{place_type}\""),
            address: "Please try a more common term like \"hospital\" or \"police station\"."
                .to_string(),
            notes: format!("Could not map \"{place_type}\" to a provider category."),
        };
    };

    let filter = format!("circle:{longitude},{latitude},{SEARCH_RADIUS_METERS}");
    let bias = format!("proximity:{longitude},{latitude}");

    log::debug!("Searching places: type={place_type} categories={categories} bias={bias}");

    let result = client
        .client
        .get(PLACES_URL)
        .query(&[
            ("categories", categories),
            ("filter", filter.as_str()),
            ("bias", bias.as_str()),
            ("limit", "1"),
            ("apiKey", api_key),
        ])
        .send()
        .await;

    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            log::error!("Place search transport failure: {e}");
            return FoundPlace {
                name: "Service Error".to_string(),
                address: "Failed to connect to the places service.".to_string(),
                notes: format!("An unexpected error occurred: {e}"),
            };
        }
    };

    let status = resp.status();
    let body: serde_json::Value = match resp.json().await {
        Ok(body) => body,
        Err(e) => {
            log::error!("Place search body read failure: {e}");
            return FoundPlace {
                name: "Service Error".to_string(),
                address: "Failed to read the places service response.".to_string(),
                notes: format!("An unexpected error occurred: {e}"),
            };
        }
    };

    if !status.is_success() {
        let message = body["message"]
            .as_str()
            .map_or_else(|| format!("Places API error (status: {status})"), String::from);
        log::error!("Place search provider error: {message}");
        return FoundPlace {
            name: "API Error".to_string(),
            address: format!("Could not retrieve data from the places provider: {status}"),
            notes: message,
        };
    }

    parse_response(&body).map_or_else(
        || FoundPlace {
            name: format!("No \"{place_type}\" found nearby."),
            address: format!("No results within {}km.", SEARCH_RADIUS_METERS / 1000),
            notes: format!(
                "Provider found no matching places for category \"{categories}\" near the \
                 provided coordinates."
            ),
        },
        |(name, address)| FoundPlace {
            name,
            address,
            notes: format!(
                "Data from Geoapify. Searched for \"{place_type}\" near \
                 {latitude:.4}, {longitude:.4}."
            ),
        },
    )
}

/// Extracts (name, address) from the first feature of a places response.
fn parse_response(body: &serde_json::Value) -> Option<(String, String)> {
    let place = &body["features"].as_array()?.first()?["properties"];

    let name = place["name"]
        .as_str()
        .or_else(|| place["address_line1"].as_str())
        .unwrap_or("Name not available")
        .to_string();
    let address = place["formatted"]
        .as_str()
        .or_else(|| place["address_line2"].as_str())
        .unwrap_or("Address not available")
        .to_string();

    Some((name, address))
}
