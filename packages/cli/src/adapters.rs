//! Production adapters binding the session ports to the service crates.
//!
//! Each adapter owns (a share of) its backing client and translates
//! between the port's failure vocabulary and the client's error enum.

use std::sync::Arc;

use citysafe_ai::engine::{AssistanceRequest, AssistantEngine};
use citysafe_geo::{GeoError, GeoapifyClient, geocode, static_map};
use citysafe_models::{
    AlertDocument, AlertWithId, HazardCategory, HazardReportDocument, MapIncident, ReportView,
};
use citysafe_session::ports::{
    AssistFailure, AssistQuery, Assistant, GeocodeFailure, GeocodedAddress, Geocoder,
    GeolocationFailure, Geolocator, MapFailure, MapRenderer, ReportStore, StoreFailure,
};
use citysafe_store::DocumentStore;

/// Environment variable standing in for the device latitude.
pub const DEVICE_LAT_ENV: &str = "CITYSAFE_DEVICE_LAT";
/// Environment variable standing in for the device longitude.
pub const DEVICE_LON_ENV: &str = "CITYSAFE_DEVICE_LON";

/// [`Geocoder`] over the Geoapify forward-geocoding client.
pub struct GeoapifyGeocoder {
    client: Arc<GeoapifyClient>,
}

impl GeoapifyGeocoder {
    #[must_use]
    pub const fn new(client: Arc<GeoapifyClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Geocoder for GeoapifyGeocoder {
    async fn geocode(&self, address: &str) -> Result<GeocodedAddress, GeocodeFailure> {
        match geocode::geocode(&self.client, address).await {
            Ok(located) => Ok(GeocodedAddress {
                latitude: located.latitude,
                longitude: located.longitude,
                formatted_address: located.formatted_address,
            }),
            Err(GeoError::NotConfigured) => Err(GeocodeFailure::NotConfigured),
            Err(GeoError::NoMatch { .. }) => Err(GeocodeFailure::NoMatch),
            Err(e) => Err(GeocodeFailure::Failed(e.to_string())),
        }
    }
}

/// [`MapRenderer`] over the Geoapify static-map client.
pub struct GeoapifyMapRenderer {
    client: Arc<GeoapifyClient>,
}

impl GeoapifyMapRenderer {
    #[must_use]
    pub const fn new(client: Arc<GeoapifyClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl MapRenderer for GeoapifyMapRenderer {
    async fn render(
        &self,
        latitude: f64,
        longitude: f64,
        incidents: &[MapIncident],
    ) -> Result<String, MapFailure> {
        match static_map::incident_map_url(&self.client, latitude, longitude, incidents).await {
            Ok(url) => Ok(url),
            Err(GeoError::NotConfigured) => Err(MapFailure(
                "The map service is not configured (API key missing).".to_string(),
            )),
            Err(e) => Err(MapFailure(e.to_string())),
        }
    }
}

/// [`Assistant`] over the LLM-backed assistance engine.
pub struct EngineAssistant {
    engine: AssistantEngine,
}

impl EngineAssistant {
    #[must_use]
    pub const fn new(engine: AssistantEngine) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl Assistant for EngineAssistant {
    async fn assist(&self, query: &AssistQuery) -> Result<String, AssistFailure> {
        let request = AssistanceRequest {
            query: query.query.clone(),
            latitude: query.latitude,
            longitude: query.longitude,
            image_data_uri: query.image_data_uri.clone(),
            image_latitude: query.image_latitude,
            image_longitude: query.image_longitude,
        };

        match self.engine.assist(&request).await {
            Ok(response) => Ok(response.advice),
            Err(e) => {
                log::error!("Assistance request failed: {e}");
                Err(AssistFailure(
                    "Sorry, I encountered an issue trying to respond. Please try asking differently."
                        .to_string(),
                ))
            }
        }
    }
}

/// [`Assistant`] used when no LLM provider credential is present.
pub struct UnconfiguredAssistant;

#[async_trait::async_trait]
impl Assistant for UnconfiguredAssistant {
    async fn assist(&self, _query: &AssistQuery) -> Result<String, AssistFailure> {
        Err(AssistFailure(
            "The assistant is not configured. Set ANTHROPIC_API_KEY or OPENAI_API_KEY to enable answers."
                .to_string(),
        ))
    }
}

/// [`ReportStore`] over the SQLite document store.
pub struct SqliteReportStore {
    store: Arc<DocumentStore>,
}

impl SqliteReportStore {
    #[must_use]
    pub const fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ReportStore for SqliteReportStore {
    async fn insert_report(&self, report: &HazardReportDocument) -> Result<String, StoreFailure> {
        self.store
            .insert_report(report)
            .await
            .map_err(|e| StoreFailure(e.to_string()))
    }

    async fn list_by_category(
        &self,
        category: HazardCategory,
    ) -> Result<Vec<ReportView>, StoreFailure> {
        self.store
            .list_by_category(Some(category))
            .await
            .map_err(|e| StoreFailure(e.to_string()))
    }

    async fn recent_with_coords(&self) -> Result<Vec<ReportView>, StoreFailure> {
        self.store
            .recent_with_coords()
            .await
            .map_err(|e| StoreFailure(e.to_string()))
    }

    async fn recent_for_map(&self) -> Result<Vec<ReportView>, StoreFailure> {
        self.store
            .recent_for_map()
            .await
            .map_err(|e| StoreFailure(e.to_string()))
    }

    async fn reports_by_user(&self, user_id: &str) -> Result<Vec<ReportView>, StoreFailure> {
        self.store
            .reports_by_user(user_id)
            .await
            .map_err(|e| StoreFailure(e.to_string()))
    }

    async fn upvote(&self, report_id: &str) -> Result<(), StoreFailure> {
        self.store
            .upvote(report_id)
            .await
            .map_err(|e| StoreFailure(e.to_string()))
    }

    async fn downvote(&self, report_id: &str) -> Result<(), StoreFailure> {
        self.store
            .downvote(report_id)
            .await
            .map_err(|e| StoreFailure(e.to_string()))
    }

    async fn insert_alert(&self, alert: &AlertDocument) -> Result<String, StoreFailure> {
        self.store
            .insert_alert(alert)
            .await
            .map_err(|e| StoreFailure(e.to_string()))
    }

    async fn alerts_with_coords(&self) -> Result<Vec<AlertWithId>, StoreFailure> {
        self.store
            .alerts_with_coords()
            .await
            .map_err(|e| StoreFailure(e.to_string()))
    }
}

/// [`Geolocator`] backed by environment variables.
///
/// Terminals have no geolocation hardware; `CITYSAFE_DEVICE_LAT` and
/// `CITYSAFE_DEVICE_LON` stand in for a device position when set.
pub struct EnvGeolocator;

#[async_trait::async_trait]
impl Geolocator for EnvGeolocator {
    async fn locate(&self) -> Result<(f64, f64), GeolocationFailure> {
        let lat: Option<f64> = std::env::var(DEVICE_LAT_ENV)
            .ok()
            .and_then(|v| v.trim().parse().ok());
        let lon: Option<f64> = std::env::var(DEVICE_LON_ENV)
            .ok()
            .and_then(|v| v.trim().parse().ok());

        lat.zip(lon).ok_or(GeolocationFailure::Unsupported)
    }
}
