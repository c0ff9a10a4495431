#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Shared data model for the CitySafe chat assistant.
//!
//! Defines the chat transcript types, the fixed hazard category taxonomy,
//! and the document shapes persisted to / read from the store. These types
//! are deliberately free of I/O so that every other crate in the workspace
//! can depend on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The person typing into the chat.
    User,
    /// The assistant.
    Bot,
    /// Out-of-band notifications (alert delivery).
    System,
}

/// The fixed set of hazard categories a report can carry.
///
/// Used for category selection during the reporting flow, for listing
/// filters, and for map marker colors.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum HazardCategory {
    /// Structure or vegetation fire.
    Fire,
    /// Injury or medical distress.
    #[strum(serialize = "Medical Emergency")]
    #[serde(rename = "Medical Emergency")]
    MedicalEmergency,
    /// Debris, flooding, or damage on a roadway.
    #[strum(serialize = "Road Hazard")]
    #[serde(rename = "Road Hazard")]
    RoadHazard,
    /// Behavior worth reporting to authorities.
    #[strum(serialize = "Suspicious Activity")]
    #[serde(rename = "Suspicious Activity")]
    SuspiciousActivity,
    /// Downed lines, gas smell, water main break.
    #[strum(serialize = "Utility Issue")]
    #[serde(rename = "Utility Issue")]
    UtilityIssue,
    /// Severe weather conditions.
    #[strum(serialize = "Weather Alert")]
    #[serde(rename = "Weather Alert")]
    WeatherAlert,
    /// Anything that doesn't fit the above.
    Other,
}

impl HazardCategory {
    /// All categories in presentation order.
    pub const ALL: &[Self] = &[
        Self::Fire,
        Self::MedicalEmergency,
        Self::RoadHazard,
        Self::SuspiciousActivity,
        Self::UtilityIssue,
        Self::WeatherAlert,
        Self::Other,
    ];

    /// Case-insensitive lookup of a category by its display name.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        input.trim().parse().ok()
    }

    /// Comma-separated display names of all categories, for usage messages.
    #[must_use]
    pub fn list_display() -> String {
        Self::ALL
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Urgency of an official alert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AlertUrgency {
    /// Informational.
    Low,
    /// Worth attention.
    Medium,
    /// Action recommended.
    High,
    /// Immediate action required.
    Critical,
}

/// An image attached to a user message, with an optional capture geotag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedImage {
    /// `data:<mimetype>;base64,<data>` URI of the image.
    pub data_uri: String,
    /// Latitude where the image was captured, if known.
    pub latitude: Option<f64>,
    /// Longitude where the image was captured, if known.
    pub longitude: Option<f64>,
}

/// What a chat message renders as.
///
/// One variant per UI kind, each carrying only the fields relevant to that
/// variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Text plus an image URL (static map).
    Image {
        /// URL of the image to display.
        url: String,
    },
    /// Prompt with category selection buttons.
    CategorySelector {
        /// Categories to offer.
        categories: Vec<HazardCategory>,
    },
    /// A list of hazard reports.
    ReportList {
        /// The reports to display.
        reports: Vec<ReportView>,
    },
    /// Prompt asking the user to share their location.
    LocationRequest,
    /// Error styling.
    Error,
}

/// A single entry in the chat transcript.
///
/// Appended in strict chronological order; mutated in place only while a
/// response is loading, never deleted (the transcript resets wholesale on
/// `/reset_chat`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message id.
    pub id: String,
    /// Who sent it.
    pub sender: Sender,
    /// Text content, or the header line for list/selector messages.
    pub text: String,
    /// When the message was created or last updated.
    pub timestamp: DateTime<Utc>,
    /// How the message renders.
    pub kind: MessageKind,
    /// Whether a response is still in flight for this message.
    pub is_loading: bool,
    /// Image the user attached to this message, if any.
    pub uploaded_image: Option<UploadedImage>,
}

impl ChatMessage {
    /// Creates a plain text message.
    #[must_use]
    pub fn text(id: impl Into<String>, sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sender,
            text: text.into(),
            timestamp: Utc::now(),
            kind: MessageKind::Text,
            is_loading: false,
            uploaded_image: None,
        }
    }
}

/// The in-progress hazard report assembled across the reporting flow.
///
/// Owned exclusively by the session controller; cleared to empty on
/// completion or cancellation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HazardReportDraft {
    /// Chosen category.
    pub category: Option<HazardCategory>,
    /// The location text exactly as the user typed it.
    pub location: Option<String>,
    /// Free-text description of the hazard.
    pub details: Option<String>,
    /// Geocoded or simulated latitude.
    pub latitude: Option<f64>,
    /// Geocoded or simulated longitude.
    pub longitude: Option<f64>,
    /// Normalized address from geocoding, possibly marked approximated.
    pub formatted_address: Option<String>,
}

/// A hazard report as persisted to the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardReportDocument {
    /// Category chosen during the reporting flow.
    pub category: HazardCategory,
    /// Original location text from the user.
    pub location: String,
    /// Hazard description.
    pub details: String,
    /// Submission time.
    pub timestamp: DateTime<Utc>,
    /// Anonymous session id of the author.
    pub user_id: String,
    /// Geocoded or simulated latitude. Present iff `longitude` is present.
    pub latitude: Option<f64>,
    /// Geocoded or simulated longitude. Present iff `latitude` is present.
    pub longitude: Option<f64>,
    /// Normalized address, falling back to `location`.
    pub formatted_address: Option<String>,
    /// Community upvote count.
    pub upvotes: i64,
    /// Community downvote count.
    pub downvotes: i64,
}

/// A stored hazard report shaped for display in a report list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportView {
    /// Store-assigned document id.
    pub id: String,
    /// Category.
    pub category: HazardCategory,
    /// Original location text.
    pub location: String,
    /// Normalized address, if geocoding produced one.
    pub formatted_address: Option<String>,
    /// Hazard description.
    pub details: String,
    /// Upvote count.
    pub upvotes: i64,
    /// Downvote count.
    pub downvotes: i64,
    /// Submission time.
    pub timestamp: Option<DateTime<Utc>>,
    /// Latitude, if geocoded.
    pub latitude: Option<f64>,
    /// Longitude, if geocoded.
    pub longitude: Option<f64>,
    /// Distance from a query point, for nearby listings.
    pub distance_km: Option<f64>,
}

/// An official alert as persisted to the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDocument {
    /// Headline.
    pub title: String,
    /// Body text.
    pub text: String,
    /// When the alert was issued.
    pub timestamp: DateTime<Utc>,
    /// Urgency level.
    pub urgency: AlertUrgency,
    /// Latitude of the affected area, if precise.
    pub latitude: Option<f64>,
    /// Longitude of the affected area, if precise.
    pub longitude: Option<f64>,
}

/// An alert together with its store-assigned id, as delivered by the
/// change subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertWithId {
    /// Store-assigned document id.
    pub id: String,
    /// The alert document.
    pub alert: AlertDocument,
}

/// An incident to mark on a generated map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapIncident {
    /// Category, used to pick the marker color.
    pub category: HazardCategory,
    /// Textual location description.
    pub location: String,
    /// Latitude. Markers are only drawn when both coordinates are present.
    pub latitude: Option<f64>,
    /// Longitude.
    pub longitude: Option<f64>,
}
