//! Injectable async capability ports.
//!
//! The controller talks to every external collaborator through one of
//! these traits. Production adapters live in the front-end crate; tests
//! substitute in-memory mocks.

use citysafe_models::{
    AlertDocument, AlertWithId, HazardCategory, HazardReportDocument, MapIncident, ReportView,
};
use thiserror::Error;

/// A successfully geocoded address.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedAddress {
    /// Latitude of the best match.
    pub latitude: f64,
    /// Longitude of the best match.
    pub longitude: f64,
    /// Normalized address string.
    pub formatted_address: Option<String>,
}

/// Why geocoding did not produce coordinates.
///
/// The controller picks a different fallback message per reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeocodeFailure {
    /// The geocoding credential is missing.
    #[error("Geocoding service not configured")]
    NotConfigured,

    /// The provider found no match for the text.
    #[error("No match found")]
    NoMatch,

    /// Transport or provider failure.
    #[error("{0}")]
    Failed(String),
}

/// Turns free-text location into coordinates.
#[async_trait::async_trait]
pub trait Geocoder: Send + Sync {
    /// Geocodes `address`, returning the best match.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeFailure`] describing why no coordinates are
    /// available.
    async fn geocode(&self, address: &str) -> Result<GeocodedAddress, GeocodeFailure>;
}

/// A failure from the map renderer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct MapFailure(pub String);

/// Builds a validated static-map image URL.
#[async_trait::async_trait]
pub trait MapRenderer: Send + Sync {
    /// Renders a map centered on the given point, marking each incident
    /// that carries coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`MapFailure`] if the map cannot be generated or the
    /// resulting URL is unreachable.
    async fn render(
        &self,
        latitude: f64,
        longitude: f64,
        incidents: &[MapIncident],
    ) -> Result<String, MapFailure>;
}

/// A free-text query forwarded to the assistant engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistQuery {
    /// The user's text.
    pub query: String,
    /// Latitude extracted from the text or otherwise known.
    pub latitude: Option<f64>,
    /// Longitude extracted from the text or otherwise known.
    pub longitude: Option<f64>,
    /// Attached image as a data URI.
    pub image_data_uri: Option<String>,
    /// Geotag of the attached image.
    pub image_latitude: Option<f64>,
    /// Geotag of the attached image.
    pub image_longitude: Option<f64>,
}

/// A failure from the assistant engine, surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct AssistFailure(pub String);

/// Produces advisory text for free-text queries.
#[async_trait::async_trait]
pub trait Assistant: Send + Sync {
    /// Answers a safety query.
    ///
    /// # Errors
    ///
    /// Returns [`AssistFailure`] once the engine's own retries are
    /// exhausted.
    async fn assist(&self, query: &AssistQuery) -> Result<String, AssistFailure>;
}

/// A failure from the document store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StoreFailure(pub String);

/// Persistence operations the controller needs.
#[async_trait::async_trait]
pub trait ReportStore: Send + Sync {
    /// Persists a report, returning its generated id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreFailure`] if the insert fails.
    async fn insert_report(&self, report: &HazardReportDocument) -> Result<String, StoreFailure>;

    /// Most recent reports for a category, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreFailure`] if the query fails.
    async fn list_by_category(
        &self,
        category: HazardCategory,
    ) -> Result<Vec<ReportView>, StoreFailure>;

    /// Recent geotagged reports for proximity filtering.
    ///
    /// # Errors
    ///
    /// Returns [`StoreFailure`] if the query fails.
    async fn recent_with_coords(&self) -> Result<Vec<ReportView>, StoreFailure>;

    /// Recent geotagged reports to draw as map markers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreFailure`] if the query fails.
    async fn recent_for_map(&self) -> Result<Vec<ReportView>, StoreFailure>;

    /// The current user's most recent reports.
    ///
    /// # Errors
    ///
    /// Returns [`StoreFailure`] if the query fails.
    async fn reports_by_user(&self, user_id: &str) -> Result<Vec<ReportView>, StoreFailure>;

    /// Atomically increments a report's upvote count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreFailure`] if the update fails.
    async fn upvote(&self, report_id: &str) -> Result<(), StoreFailure>;

    /// Atomically increments a report's downvote count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreFailure`] if the update fails.
    async fn downvote(&self, report_id: &str) -> Result<(), StoreFailure>;

    /// Persists an alert, returning its generated id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreFailure`] if the insert fails.
    async fn insert_alert(&self, alert: &AlertDocument) -> Result<String, StoreFailure>;

    /// Recent geotagged alerts for proximity filtering.
    ///
    /// # Errors
    ///
    /// Returns [`StoreFailure`] if the query fails.
    async fn alerts_with_coords(&self) -> Result<Vec<AlertWithId>, StoreFailure>;
}

/// Why the device's location could not be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeolocationFailure {
    /// The user declined to share their location.
    #[error("location access denied")]
    Denied,

    /// No location capability exists in this environment.
    #[error("geolocation unsupported")]
    Unsupported,

    /// The lookup did not complete in time.
    #[error("geolocation timed out")]
    Timeout,
}

/// Resolves the device's current position. Single in-flight request.
#[async_trait::async_trait]
pub trait Geolocator: Send + Sync {
    /// Returns the current (latitude, longitude).
    ///
    /// # Errors
    ///
    /// Returns [`GeolocationFailure`] with the reason location is
    /// unavailable.
    async fn locate(&self) -> Result<(f64, f64), GeolocationFailure>;
}
