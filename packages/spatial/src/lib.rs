#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Small spatial helpers shared across the workspace.
//!
//! Provides the great-circle distance used by the nearby-hazard and
//! nearby-alert filters, and a best-effort "latitude, longitude" extractor
//! for free-text queries routed to the assistant engine.

use std::sync::OnceLock;

use regex::Regex;

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two WGS84 points, in kilometers.
///
/// Haversine formula; accurate to well under the precision any radius
/// filter in this system needs.
#[must_use]
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Pattern matching a "lat, lon" pair embedded in free text.
fn coordinate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(-?\d{1,2}(?:\.\d+)?)\s*,?\s*(-?\d{1,3}(?:\.\d+)?)").unwrap()
    })
}

/// Extracts the first "latitude, longitude" pair from free text, if any.
///
/// Values outside the valid WGS84 ranges are rejected rather than guessed
/// at.
#[must_use]
pub fn extract_coordinates(text: &str) -> Option<(f64, f64)> {
    let captures = coordinate_pattern().captures(text)?;

    let lat: f64 = captures.get(1)?.as_str().parse().ok()?;
    let lon: f64 = captures.get(2)?.as_str().parse().ok()?;

    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Some((lat, lon))
    } else {
        None
    }
}
