//! The session controller and hazard-reporting state machine.
//!
//! All user input enters through [`Session::handle_message`] or
//! [`Session::select_category`]; every external effect goes through the
//! ports in [`SessionPorts`]. The transcript is append-only except for
//! in-place updates to loading placeholders, and resets wholesale on
//! `/reset_chat`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use citysafe_models::{
    AlertDocument, AlertUrgency, AlertWithId, ChatMessage, HazardCategory, HazardReportDocument,
    HazardReportDraft, MapIncident, MessageKind, ReportView, Sender, UploadedImage,
};

use crate::command::{self, Command};
use crate::ports::{
    AssistQuery, Assistant, GeocodeFailure, GeocodedAddress, Geocoder, GeolocationFailure,
    Geolocator, MapRenderer, ReportStore, StoreFailure,
};

/// Fallback coordinates used when geocoding is unavailable or
/// inconclusive. Downtown Indianapolis, approximately.
pub const SIMULATED_LATITUDE: f64 = 39.7684;
/// See [`SIMULATED_LATITUDE`].
pub const SIMULATED_LONGITUDE: f64 = -86.1581;

const WELCOME_ID: &str = "welcome-initial";
const WELCOME_MESSAGE: &str = "Welcome to CitySafe Chat! I'm here to help with public safety in Indianapolis. Use the quick actions below or type your query to get started.";

/// Stage of the hazard-reporting flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportingStage {
    Idle,
    AwaitingCategory,
    AwaitingLocation,
    AwaitingDetails,
}

/// What a pending category selection will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPurpose {
    /// Selecting the category of a new hazard report.
    ReportHazard,
    /// Selecting the category to list reports for.
    ListReports,
}

/// A user turn: text plus an optional attached image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInput {
    /// The typed text.
    pub text: String,
    /// An attached image with its optional geotag.
    pub image: Option<UploadedImage>,
}

impl UserInput {
    /// A plain text turn.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }
}

/// The user's response to a category selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryChoice {
    /// A category was picked.
    Category(HazardCategory),
    /// The selector was dismissed.
    Cancel,
}

/// The external collaborators, injected as trait objects.
pub struct SessionPorts {
    /// Free-text address to coordinates.
    pub geocoder: Arc<dyn Geocoder>,
    /// Static-map generation.
    pub map: Arc<dyn MapRenderer>,
    /// LLM-backed safety assistant.
    pub assistant: Arc<dyn Assistant>,
    /// Document persistence. `None` degrades the persistence-backed
    /// commands to disabled-feature messages.
    pub store: Option<Arc<dyn ReportStore>>,
    /// Device location.
    pub geolocator: Arc<dyn Geolocator>,
}

/// One chat session: transcript, flow state, and collaborator ports.
pub struct Session {
    ports: SessionPorts,
    user_id: String,
    transcript: Vec<ChatMessage>,
    stage: ReportingStage,
    draft: HazardReportDraft,
    pending_selection: Option<SelectionPurpose>,
    seen_alert_ids: HashSet<String>,
    /// Bumped by `/cancel` and `/reset_chat`; async steps capture it
    /// before awaiting and discard results when it no longer matches.
    epoch: u64,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Session {
    /// Creates a session, emitting the welcome message.
    #[must_use]
    pub fn new(ports: SessionPorts, user_id: impl Into<String>) -> Self {
        Self {
            ports,
            user_id: user_id.into(),
            transcript: vec![ChatMessage::text(WELCOME_ID, Sender::Bot, WELCOME_MESSAGE)],
            stage: ReportingStage::Idle,
            draft: HazardReportDraft::default(),
            pending_selection: None,
            seen_alert_ids: HashSet::new(),
            epoch: 0,
        }
    }

    /// The transcript, oldest first.
    #[must_use]
    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// The session's anonymous author id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The pending category selection, if a selector is showing.
    #[must_use]
    pub const fn pending_selection(&self) -> Option<SelectionPurpose> {
        self.pending_selection
    }

    /// Input-prompt hint for the current flow state.
    #[must_use]
    pub const fn input_placeholder(&self) -> &'static str {
        if self.pending_selection.is_some() {
            return "Select a category above or type /cancel";
        }
        match self.stage {
            ReportingStage::AwaitingLocation => "Enter hazard location (or type /cancel)",
            ReportingStage::AwaitingDetails => "Describe the hazard (or type /cancel)",
            ReportingStage::Idle | ReportingStage::AwaitingCategory => {
                "Ask a question or use a quick action..."
            }
        }
    }

    /// Processes one user turn.
    pub async fn handle_message(&mut self, input: UserInput) {
        let text = input.text.trim().to_string();
        if text.is_empty() && input.image.is_none() {
            return;
        }
        let lowered = text.to_lowercase();

        // The bare "/map" quick action is not echoed as a user message
        let is_map_quick_action = lowered == "/map";
        if !is_map_quick_action {
            let mut message = ChatMessage::text(new_id(), Sender::User, text.clone());
            message.uploaded_image = input.image.clone();
            self.push(message);
        }

        // A pending selector owns the input channel until resolved
        if let Some(purpose) = self.pending_selection
            && lowered != "/cancel"
        {
            let flow = match purpose {
                SelectionPurpose::ReportHazard => "reporting",
                SelectionPurpose::ListReports => "listing",
            };
            self.push_bot(format!(
                "Please select a category using the buttons above. Or type /cancel to exit {flow}."
            ));
            return;
        }

        if lowered == "/cancel" {
            self.cancel();
            return;
        }

        if matches!(
            self.stage,
            ReportingStage::AwaitingLocation | ReportingStage::AwaitingDetails
        ) {
            self.handle_flow_input(text).await;
            return;
        }

        match command::parse(&text) {
            Some(cmd) => self.handle_command(cmd).await,
            None => self.route_to_assistant(&text, input.image.as_ref()).await,
        }
    }

    /// Resolves a pending category selector.
    pub async fn select_category(&mut self, choice: CategoryChoice) {
        let purpose = self.pending_selection;

        match choice {
            CategoryChoice::Cancel => {
                self.push(ChatMessage::text(new_id(), Sender::User, "Cancel Action"));
                self.cancel();
            }
            CategoryChoice::Category(category) => match purpose {
                Some(SelectionPurpose::ReportHazard)
                    if self.stage == ReportingStage::AwaitingCategory =>
                {
                    self.push(ChatMessage::text(
                        new_id(),
                        Sender::User,
                        format!("Selected category: {category}"),
                    ));
                    self.draft.category = Some(category);
                    self.stage = ReportingStage::AwaitingLocation;
                    self.pending_selection = None;
                    self.push_bot(format!(
                        "You selected: **{category}** to report.\n\nPlease provide the location of the hazard (e.g., address or cross-streets)."
                    ));
                }
                Some(SelectionPurpose::ListReports) => {
                    self.pending_selection = None;
                    self.stage = ReportingStage::Idle;
                    self.push(ChatMessage::text(
                        new_id(),
                        Sender::User,
                        format!("/list_hazards {category}"),
                    ));
                    self.list_reports_for(category).await;
                }
                _ => {
                    log::warn!("Category selected with no pending selector; ignoring");
                }
            },
        }
    }

    /// Upvotes a report and optimistically patches displayed lists.
    pub async fn upvote(&mut self, report_id: &str) {
        self.vote(report_id, true).await;
    }

    /// Downvotes a report and optimistically patches displayed lists.
    pub async fn downvote(&mut self, report_id: &str) {
        self.vote(report_id, false).await;
    }

    /// Delivers an alert from the store subscription.
    ///
    /// Already-seen alert ids are ignored.
    pub fn ingest_alert(&mut self, alert: &AlertWithId) {
        if !self.seen_alert_ids.insert(alert.id.clone()) {
            return;
        }

        let mut text = format!(
            "Official Alert: **{}**\n{}",
            alert.alert.title, alert.alert.text
        );
        if let (Some(lat), Some(lon)) = (alert.alert.latitude, alert.alert.longitude) {
            text.push_str(&format!("\n(Location: {lat:.4}, {lon:.4})"));
        }
        if alert.alert.urgency == AlertUrgency::Critical {
            text.push_str("\nCRITICAL: Take immediate action based on official guidance.");
        }

        self.push(ChatMessage::text(new_id(), Sender::System, text));
    }

    // -----------------------------------------------------------------
    // Flow handling
    // -----------------------------------------------------------------

    async fn handle_flow_input(&mut self, text: String) {
        match self.stage {
            ReportingStage::AwaitingLocation => {
                self.draft.location = Some(text.clone());
                let message_id = self.push_loading_bot(format!("Geocoding location: \"{text}\"..."));

                let epoch = self.epoch;
                let outcome = self.ports.geocoder.geocode(&text).await;
                self.apply_geocode_outcome(epoch, &message_id, &text, outcome);
            }
            ReportingStage::AwaitingDetails => {
                self.draft.details = Some(text);
                let message_id = self.push_loading_bot("Submitting your report...");
                self.submit_report(&message_id).await;
            }
            ReportingStage::Idle | ReportingStage::AwaitingCategory => {}
        }
    }

    /// Applies a geocoding result to the draft, unless the flow was
    /// cancelled while the request was in flight.
    fn apply_geocode_outcome(
        &mut self,
        epoch: u64,
        message_id: &str,
        location_text: &str,
        outcome: Result<GeocodedAddress, GeocodeFailure>,
    ) {
        if epoch != self.epoch {
            log::debug!("Discarding stale geocode result");
            return;
        }

        let response = match outcome {
            Ok(geocoded) => {
                let formatted = geocoded
                    .formatted_address
                    .unwrap_or_else(|| location_text.to_string());
                self.draft.latitude = Some(geocoded.latitude);
                self.draft.longitude = Some(geocoded.longitude);
                self.draft.formatted_address = Some(formatted.clone());
                format!(
                    "Location understood as: \"{formatted}\".\n(Coordinates: {:.4}, {:.4})\n\nPlease describe the hazard in more detail.",
                    geocoded.latitude, geocoded.longitude
                )
            }
            Err(GeocodeFailure::NotConfigured) => {
                // The raw location text stands in for the address so the
                // stored report still reads back what the user typed.
                self.draft.latitude = Some(SIMULATED_LATITUDE);
                self.draft.longitude = Some(SIMULATED_LONGITUDE);
                self.draft.formatted_address = None;
                "Geocoding service is not fully configured. Your report will use the location text you provided, and coordinates will be approximated.\n\nPlease describe the hazard in more detail.".to_string()
            }
            Err(GeocodeFailure::NoMatch) => {
                self.draft.latitude = Some(SIMULATED_LATITUDE);
                self.draft.longitude = Some(SIMULATED_LONGITUDE);
                self.draft.formatted_address =
                    Some(format!("{location_text} (Location approximated)"));
                format!(
                    "Could not precisely geocode \"{location_text}\". Report will use the location text you provided, and coordinates will be approximated.\n\nPlease describe the hazard in more detail."
                )
            }
            Err(GeocodeFailure::Failed(reason)) => {
                self.draft.latitude = Some(SIMULATED_LATITUDE);
                self.draft.longitude = Some(SIMULATED_LONGITUDE);
                self.draft.formatted_address =
                    Some(format!("{location_text} (Location approximated due to error)"));
                format!(
                    "There was an issue geocoding the location: {reason}. Report will use the location text you provided, and coordinates will be approximated.\n\nPlease describe the hazard in more detail."
                )
            }
        };

        self.update_message(message_id, |msg| {
            msg.text = response;
            msg.is_loading = false;
        });
        self.stage = ReportingStage::AwaitingDetails;
    }

    async fn submit_report(&mut self, message_id: &str) {
        let (Some(category), Some(location), Some(details)) = (
            self.draft.category,
            self.draft.location.clone(),
            self.draft.details.clone(),
        ) else {
            self.update_message(message_id, |msg| {
                msg.text = "Error: Could not assemble the report. Please start over with /report hazard.".to_string();
                msg.kind = MessageKind::Error;
                msg.is_loading = false;
            });
            self.reset_flow();
            return;
        };

        let Some(store) = self.ports.store.clone() else {
            self.update_message(message_id, |msg| {
                msg.text =
                    "There was an issue submitting your report: the database is not configured. Please try again."
                        .to_string();
                msg.kind = MessageKind::Error;
                msg.is_loading = false;
            });
            self.reset_flow();
            return;
        };

        let document = HazardReportDocument {
            category,
            location: location.clone(),
            details,
            timestamp: Utc::now(),
            user_id: self.user_id.clone(),
            latitude: self.draft.latitude,
            longitude: self.draft.longitude,
            formatted_address: Some(
                self.draft
                    .formatted_address
                    .clone()
                    .filter(|a| !a.trim().is_empty())
                    .unwrap_or(location),
            ),
            upvotes: 0,
            downvotes: 0,
        };

        let epoch = self.epoch;
        let result = store.insert_report(&document).await;
        self.apply_submit_outcome(epoch, message_id, &document, result);
    }

    /// Applies a persistence result, unless the flow was cancelled
    /// while the insert was in flight.
    fn apply_submit_outcome(
        &mut self,
        epoch: u64,
        message_id: &str,
        document: &HazardReportDocument,
        result: Result<String, StoreFailure>,
    ) {
        if epoch != self.epoch {
            log::debug!("Discarding stale report submission result");
            return;
        }

        match result {
            Ok(report_id) => {
                let coords = document.latitude.map_or_else(String::new, |lat| {
                    format!(
                        "\n(Approx. Coordinates: {lat:.4}, {:.4})",
                        document.longitude.unwrap_or_default()
                    )
                });
                let formatted = document.formatted_address.as_deref().unwrap_or_default();
                let text = format!(
                    "Thank you for your report!\n\nCategory: {}\nLocation: {formatted}\nDetails: {}{coords}\nReport ID: {report_id}",
                    document.category, document.details
                );
                self.update_message(message_id, |msg| {
                    msg.text = text;
                    msg.is_loading = false;
                });
            }
            Err(e) => {
                self.update_message(message_id, |msg| {
                    msg.text =
                        format!("There was an issue submitting your report: {e}. Please try again.");
                    msg.kind = MessageKind::Error;
                    msg.is_loading = false;
                });
            }
        }

        self.reset_flow();
    }

    // -----------------------------------------------------------------
    // Command dispatch
    // -----------------------------------------------------------------

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::ReportHazard => self.start_report_flow(),
            Command::MapHere => self.map_via_geolocation().await,
            Command::Map {
                latitude,
                longitude,
            } => {
                let message_id = self.push_loading_bot(format!(
                    "Generating map for your area (Centered: {latitude:.4}, {longitude:.4})..."
                ));
                self.generate_map(&message_id, latitude, longitude).await;
            }
            Command::ListHazards { category } => self.list_hazards(category).await,
            Command::NearbyHazards {
                latitude,
                longitude,
                radius_km,
            } => self.nearby_hazards(latitude, longitude, radius_km).await,
            Command::AlertsNear {
                latitude,
                longitude,
                radius_km,
            } => self.alerts_near(latitude, longitude, radius_km).await,
            Command::CreateMockAlert => self.create_mock_alert().await,
            Command::MyRecentReports => self.my_recent_reports().await,
            Command::ResetChat => self.reset(),
            Command::Cancel => self.cancel(),
            Command::Invalid { message } => self.push_bot_error(message),
        }
    }

    fn start_report_flow(&mut self) {
        if self.ports.store.is_none() {
            self.push_bot_error(
                "Hazard reporting is currently unavailable. Please check the database configuration.",
            );
            return;
        }

        self.stage = ReportingStage::AwaitingCategory;
        self.pending_selection = Some(SelectionPurpose::ReportHazard);
        self.draft = HazardReportDraft::default();
        self.push(ChatMessage {
            id: new_id(),
            sender: Sender::Bot,
            text: "Please select a hazard category to report:".to_string(),
            timestamp: Utc::now(),
            kind: MessageKind::CategorySelector {
                categories: HazardCategory::ALL.to_vec(),
            },
            is_loading: false,
            uploaded_image: None,
        });
    }

    async fn map_via_geolocation(&mut self) {
        let message_id = new_id();
        self.push(ChatMessage {
            id: message_id.clone(),
            sender: Sender::Bot,
            text: "Attempting to get your current location for the map...".to_string(),
            timestamp: Utc::now(),
            kind: MessageKind::LocationRequest,
            is_loading: true,
            uploaded_image: None,
        });

        let epoch = self.epoch;
        let located = self.ports.geolocator.locate().await;
        if epoch != self.epoch {
            log::debug!("Discarding stale geolocation result");
            return;
        }

        match located {
            Ok((latitude, longitude)) => {
                self.update_message(&message_id, |msg| {
                    msg.text = "Location found.".to_string();
                    msg.kind = MessageKind::Text;
                    msg.is_loading = false;
                });
                self.push(ChatMessage::text(
                    new_id(),
                    Sender::User,
                    format!("/map {latitude:.6} {longitude:.6}"),
                ));
                let map_message_id = self.push_loading_bot(format!(
                    "Generating map for your area (Centered: {latitude:.4}, {longitude:.4})..."
                ));
                self.generate_map(&map_message_id, latitude, longitude).await;
            }
            Err(GeolocationFailure::Unsupported) => {
                self.update_message(&message_id, |msg| {
                    msg.text = "Geolocation is not supported in this environment. Please provide coordinates like: /map <latitude> <longitude>".to_string();
                    msg.kind = MessageKind::Error;
                    msg.is_loading = false;
                });
            }
            Err(GeolocationFailure::Denied | GeolocationFailure::Timeout) => {
                self.update_message(&message_id, |msg| {
                    msg.text = "Could not get your current location. Please provide coordinates like: /map <latitude> <longitude> (e.g., /map 39.7684 -86.1581) or allow location access.".to_string();
                    msg.kind = MessageKind::Error;
                    msg.is_loading = false;
                });
            }
        }
    }

    async fn generate_map(&mut self, message_id: &str, latitude: f64, longitude: f64) {
        // Marker enrichment is best-effort: a store failure just means a
        // map without markers
        let incidents: Vec<MapIncident> = if let Some(store) = &self.ports.store {
            match store.recent_for_map().await {
                Ok(reports) => reports
                    .into_iter()
                    .map(|r| MapIncident {
                        category: r.category,
                        location: r.formatted_address.unwrap_or(r.location),
                        latitude: r.latitude,
                        longitude: r.longitude,
                    })
                    .collect(),
                Err(e) => {
                    log::warn!("Error fetching hazard reports for map: {e}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let epoch = self.epoch;
        let rendered = self.ports.map.render(latitude, longitude, &incidents).await;
        if epoch != self.epoch {
            log::debug!("Discarding stale map result");
            return;
        }

        match rendered {
            Ok(url) => {
                let suffix = if incidents.is_empty() {
                    "\n(Note: Reported incident markers depend on geocoded coordinates.)"
                        .to_string()
                } else {
                    format!("\n(Includes {} recent report(s))", incidents.len())
                };
                self.update_message(message_id, |msg| {
                    msg.text = format!(
                        "Here's a map of your area (Centered: {latitude:.4}, {longitude:.4}):{suffix}"
                    );
                    msg.kind = MessageKind::Image { url };
                    msg.is_loading = false;
                });
            }
            Err(e) => {
                self.update_message(message_id, |msg| {
                    msg.text = format!("Map generation failed: {e}");
                    msg.kind = MessageKind::Error;
                    msg.is_loading = false;
                });
            }
        }
    }

    async fn list_hazards(&mut self, category: Option<String>) {
        if self.ports.store.is_none() {
            self.push_bot_error(
                "Hazard listing is currently unavailable. Please check the database configuration.",
            );
            return;
        }

        let Some(raw) = category else {
            self.stage = ReportingStage::AwaitingCategory;
            self.pending_selection = Some(SelectionPurpose::ListReports);
            self.push(ChatMessage {
                id: new_id(),
                sender: Sender::Bot,
                text: "Please select a category to list reports for:".to_string(),
                timestamp: Utc::now(),
                kind: MessageKind::CategorySelector {
                    categories: HazardCategory::ALL.to_vec(),
                },
                is_loading: false,
                uploaded_image: None,
            });
            return;
        };

        let Some(category) = HazardCategory::parse(&raw) else {
            self.push_bot_error(format!(
                "Invalid category: '{raw}'. Please use one of the following: {}.",
                HazardCategory::list_display()
            ));
            return;
        };

        self.list_reports_for(category).await;
    }

    async fn list_reports_for(&mut self, category: HazardCategory) {
        let Some(store) = self.ports.store.clone() else {
            self.push_bot_error(
                "Hazard listing is currently unavailable. Please check the database configuration.",
            );
            return;
        };

        let epoch = self.epoch;
        let result = store.list_by_category(category).await;
        if epoch != self.epoch {
            return;
        }

        match result {
            Ok(reports) if reports.is_empty() => {
                self.push_bot(format!(
                    "No recent hazard reports found for the category: {category}."
                ));
            }
            Ok(reports) => {
                self.push_report_list(
                    format!("Found {} '{category}' report(s):", reports.len()),
                    reports,
                );
            }
            Err(e) => {
                self.push_bot_error(format!(
                    "Sorry, I couldn't fetch reports for '{category}' at this time. Details: {e}"
                ));
            }
        }
    }

    async fn nearby_hazards(&mut self, latitude: f64, longitude: f64, radius_km: f64) {
        let Some(store) = self.ports.store.clone() else {
            self.push_bot_error(
                "Nearby hazard search is currently unavailable. Please check the database configuration.",
            );
            return;
        };

        let epoch = self.epoch;
        let result = store.recent_with_coords().await;
        if epoch != self.epoch {
            return;
        }

        match result {
            Ok(reports) => {
                let nearby: Vec<ReportView> = reports
                    .into_iter()
                    .filter_map(|mut report| {
                        let (Some(lat), Some(lon)) = (report.latitude, report.longitude) else {
                            return None;
                        };
                        let distance =
                            citysafe_spatial::distance_km(latitude, longitude, lat, lon);
                        (distance <= radius_km).then(|| {
                            report.distance_km = Some(distance);
                            report
                        })
                    })
                    .collect();

                if nearby.is_empty() {
                    self.push_bot(format!(
                        "No hazard reports found within {radius_km}km of {latitude:.4}, {longitude:.4}. Ensure reports have geocoded coordinates."
                    ));
                } else {
                    self.push_report_list(
                        format!(
                            "Found {} hazard report(s) within {radius_km}km of {latitude:.4}, {longitude:.4}:",
                            nearby.len()
                        ),
                        nearby,
                    );
                }
            }
            Err(e) => {
                self.push_bot_error(format!(
                    "Sorry, I couldn't fetch nearby reports at this time. Details: {e}"
                ));
            }
        }
    }

    async fn alerts_near(&mut self, latitude: f64, longitude: f64, radius_km: f64) {
        let Some(store) = self.ports.store.clone() else {
            self.push_bot_error(
                "Nearby alert search is currently unavailable. Please check the database configuration.",
            );
            return;
        };

        let epoch = self.epoch;
        let result = store.alerts_with_coords().await;
        if epoch != self.epoch {
            return;
        }

        match result {
            Ok(alerts) => {
                let nearby: Vec<(AlertWithId, f64)> = alerts
                    .into_iter()
                    .filter_map(|entry| {
                        let (Some(lat), Some(lon)) =
                            (entry.alert.latitude, entry.alert.longitude)
                        else {
                            return None;
                        };
                        let distance =
                            citysafe_spatial::distance_km(latitude, longitude, lat, lon);
                        (distance <= radius_km).then_some((entry, distance))
                    })
                    .collect();

                if nearby.is_empty() {
                    self.push_bot(format!(
                        "No official alerts with coordinates found within {radius_km}km of {latitude:.4}, {longitude:.4}."
                    ));
                } else {
                    let listing = nearby
                        .iter()
                        .enumerate()
                        .map(|(i, (entry, distance))| {
                            format!(
                                "{}. **{}** ({distance:.2} km away, issued {}): {}",
                                i + 1,
                                entry.alert.title,
                                entry.alert.timestamp.format("%Y-%m-%d %H:%M UTC"),
                                entry.alert.text
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n\n");
                    self.push_bot(format!(
                        "Found {} official alert(s) within {radius_km}km of {latitude:.4}, {longitude:.4}:\n{listing}",
                        nearby.len()
                    ));
                }
            }
            Err(e) => {
                self.push_bot_error(format!(
                    "Sorry, I couldn't fetch nearby alerts at this time. Details: {e}"
                ));
            }
        }
    }

    async fn create_mock_alert(&mut self) {
        let Some(store) = self.ports.store.clone() else {
            self.push_bot_error("Cannot create mock alert. The database is not configured.");
            return;
        };

        let now = Utc::now();
        // Small positional jitter so repeated mock alerts don't stack on
        // the exact same point
        let jitter = f64::from(now.timestamp_subsec_millis() % 100) / 1000.0 - 0.05;

        let alert = AlertDocument {
            title: "Mock Critical Weather Alert".to_string(),
            text: "This is a simulated CRITICAL weather alert for Marion County. Take immediate action based on official guidance.".to_string(),
            timestamp: now,
            urgency: AlertUrgency::Critical,
            latitude: Some(SIMULATED_LATITUDE + jitter),
            longitude: Some(SIMULATED_LONGITUDE + jitter),
        };

        let epoch = self.epoch;
        let result = store.insert_alert(&alert).await;
        if epoch != self.epoch {
            return;
        }

        match result {
            Ok(_) => {
                self.push_bot(
                    "A mock 'Critical Weather Alert' has been created. It should appear as a notification shortly.",
                );
            }
            Err(e) => {
                self.push_bot_error(format!(
                    "Sorry, there was an issue creating the mock alert. Details: {e}"
                ));
            }
        }
    }

    async fn my_recent_reports(&mut self) {
        let Some(store) = self.ports.store.clone() else {
            self.push_bot_error("Cannot fetch your reports. User session or database not available.");
            return;
        };

        let epoch = self.epoch;
        let result = store.reports_by_user(&self.user_id).await;
        if epoch != self.epoch {
            return;
        }

        match result {
            Ok(reports) if reports.is_empty() => {
                self.push_bot("You haven't submitted any reports in this session yet.");
            }
            Ok(reports) => {
                self.push_report_list("Here are your 5 most recent reports:".to_string(), reports);
            }
            Err(e) => {
                self.push_bot_error(format!(
                    "Sorry, I couldn't fetch your reports at this time. Details: {e}"
                ));
            }
        }
    }

    async fn route_to_assistant(&mut self, text: &str, image: Option<&UploadedImage>) {
        let coords = citysafe_spatial::extract_coordinates(text);

        let query = AssistQuery {
            query: text.to_string(),
            latitude: coords.map(|(lat, _)| lat),
            longitude: coords.map(|(_, lon)| lon),
            image_data_uri: image.map(|i| i.data_uri.clone()),
            image_latitude: image.and_then(|i| i.latitude),
            image_longitude: image.and_then(|i| i.longitude),
        };

        let message_id = self.push_loading_bot("");

        let epoch = self.epoch;
        let result = self.ports.assistant.assist(&query).await;
        if epoch != self.epoch {
            log::debug!("Discarding stale assistant result");
            return;
        }

        match result {
            Ok(advice) => {
                self.update_message(&message_id, |msg| {
                    msg.text = advice;
                    msg.is_loading = false;
                });
            }
            Err(e) => {
                self.update_message(&message_id, |msg| {
                    msg.text = e.to_string();
                    msg.kind = MessageKind::Error;
                    msg.is_loading = false;
                });
            }
        }
    }

    async fn vote(&mut self, report_id: &str, up: bool) {
        let Some(store) = self.ports.store.clone() else {
            self.push_bot_error("Voting is unavailable. The database is not configured.");
            return;
        };

        let result = if up {
            store.upvote(report_id).await
        } else {
            store.downvote(report_id).await
        };

        match result {
            Ok(()) => {
                // Optimistic patch of every displayed copy of this report
                for message in &mut self.transcript {
                    if let MessageKind::ReportList { reports } = &mut message.kind {
                        for report in reports.iter_mut().filter(|r| r.id == report_id) {
                            if up {
                                report.upvotes += 1;
                            } else {
                                report.downvotes += 1;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                let action = if up { "upvote" } else { "downvote" };
                self.push_bot_error(format!("Could not {action} report. Details: {e}"));
            }
        }
    }

    // -----------------------------------------------------------------
    // State resets
    // -----------------------------------------------------------------

    fn cancel(&mut self) {
        self.epoch += 1;
        self.reset_flow();
        self.push_bot("Action cancelled.");
    }

    fn reset_flow(&mut self) {
        self.stage = ReportingStage::Idle;
        self.pending_selection = None;
        self.draft = HazardReportDraft::default();
    }

    fn reset(&mut self) {
        self.epoch += 1;
        self.reset_flow();
        self.seen_alert_ids.clear();
        self.transcript = vec![ChatMessage::text(WELCOME_ID, Sender::Bot, WELCOME_MESSAGE)];
    }

    // -----------------------------------------------------------------
    // Transcript helpers
    // -----------------------------------------------------------------

    fn push(&mut self, message: ChatMessage) {
        self.transcript.push(message);
    }

    fn push_bot(&mut self, text: impl Into<String>) {
        self.push(ChatMessage::text(new_id(), Sender::Bot, text));
    }

    fn push_bot_error(&mut self, text: impl Into<String>) {
        let mut message = ChatMessage::text(new_id(), Sender::Bot, text);
        message.kind = MessageKind::Error;
        self.push(message);
    }

    fn push_loading_bot(&mut self, text: impl Into<String>) -> String {
        let id = new_id();
        let mut message = ChatMessage::text(id.clone(), Sender::Bot, text);
        message.is_loading = true;
        self.push(message);
        id
    }

    fn push_report_list(&mut self, header: String, reports: Vec<ReportView>) {
        self.push(ChatMessage {
            id: new_id(),
            sender: Sender::Bot,
            text: header,
            timestamp: Utc::now(),
            kind: MessageKind::ReportList { reports },
            is_loading: false,
            uploaded_image: None,
        });
    }

    fn update_message(&mut self, id: &str, update: impl FnOnce(&mut ChatMessage)) {
        if let Some(message) = self.transcript.iter_mut().find(|m| m.id == id) {
            update(message);
            message.timestamp = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::ports::{AssistFailure, MapFailure};

    // -- Mock ports ---------------------------------------------------

    struct MockGeocoder {
        result: Result<GeocodedAddress, GeocodeFailure>,
    }

    #[async_trait::async_trait]
    impl Geocoder for MockGeocoder {
        async fn geocode(&self, _address: &str) -> Result<GeocodedAddress, GeocodeFailure> {
            self.result.clone()
        }
    }

    struct MockMap {
        calls: AtomicU32,
        result: Result<String, MapFailure>,
    }

    impl MockMap {
        fn ok() -> Self {
            Self {
                calls: AtomicU32::new(0),
                result: Ok("https://maps.example/map.png".to_string()),
            }
        }
    }

    #[async_trait::async_trait]
    impl MapRenderer for MockMap {
        async fn render(
            &self,
            _latitude: f64,
            _longitude: f64,
            _incidents: &[MapIncident],
        ) -> Result<String, MapFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct MockAssistant {
        last_query: Mutex<Option<AssistQuery>>,
        reply: Result<String, AssistFailure>,
    }

    impl MockAssistant {
        fn replying(text: &str) -> Self {
            Self {
                last_query: Mutex::new(None),
                reply: Ok(text.to_string()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Assistant for MockAssistant {
        async fn assist(&self, query: &AssistQuery) -> Result<String, AssistFailure> {
            *self.last_query.lock().unwrap() = Some(query.clone());
            self.reply.clone()
        }
    }

    #[derive(Default)]
    struct MockStore {
        reports: Mutex<Vec<(String, HazardReportDocument)>>,
        alerts: Mutex<Vec<AlertWithId>>,
        fail_inserts: bool,
    }

    impl MockStore {
        fn view(id: &str, doc: &HazardReportDocument) -> ReportView {
            ReportView {
                id: id.to_string(),
                category: doc.category,
                location: doc.location.clone(),
                formatted_address: doc.formatted_address.clone(),
                details: doc.details.clone(),
                upvotes: doc.upvotes,
                downvotes: doc.downvotes,
                timestamp: Some(doc.timestamp),
                latitude: doc.latitude,
                longitude: doc.longitude,
                distance_km: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl ReportStore for MockStore {
        async fn insert_report(
            &self,
            report: &HazardReportDocument,
        ) -> Result<String, StoreFailure> {
            if self.fail_inserts {
                return Err(StoreFailure("insert failed".to_string()));
            }
            let mut reports = self.reports.lock().unwrap();
            let id = format!("r{}", reports.len() + 1);
            reports.push((id.clone(), report.clone()));
            Ok(id)
        }

        async fn list_by_category(
            &self,
            category: HazardCategory,
        ) -> Result<Vec<ReportView>, StoreFailure> {
            Ok(self
                .reports
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, doc)| doc.category == category)
                .map(|(id, doc)| Self::view(id, doc))
                .collect())
        }

        async fn recent_with_coords(&self) -> Result<Vec<ReportView>, StoreFailure> {
            Ok(self
                .reports
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, doc)| doc.latitude.is_some() && doc.longitude.is_some())
                .map(|(id, doc)| Self::view(id, doc))
                .collect())
        }

        async fn recent_for_map(&self) -> Result<Vec<ReportView>, StoreFailure> {
            self.recent_with_coords().await
        }

        async fn reports_by_user(&self, user_id: &str) -> Result<Vec<ReportView>, StoreFailure> {
            Ok(self
                .reports
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, doc)| doc.user_id == user_id)
                .map(|(id, doc)| Self::view(id, doc))
                .collect())
        }

        async fn upvote(&self, report_id: &str) -> Result<(), StoreFailure> {
            for (id, doc) in self.reports.lock().unwrap().iter_mut() {
                if id == report_id {
                    doc.upvotes += 1;
                }
            }
            Ok(())
        }

        async fn downvote(&self, report_id: &str) -> Result<(), StoreFailure> {
            for (id, doc) in self.reports.lock().unwrap().iter_mut() {
                if id == report_id {
                    doc.downvotes += 1;
                }
            }
            Ok(())
        }

        async fn insert_alert(&self, alert: &AlertDocument) -> Result<String, StoreFailure> {
            let mut alerts = self.alerts.lock().unwrap();
            let id = format!("a{}", alerts.len() + 1);
            alerts.push(AlertWithId {
                id: id.clone(),
                alert: alert.clone(),
            });
            Ok(id)
        }

        async fn alerts_with_coords(&self) -> Result<Vec<AlertWithId>, StoreFailure> {
            Ok(self
                .alerts
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.alert.latitude.is_some() && a.alert.longitude.is_some())
                .cloned()
                .collect())
        }
    }

    struct MockLocator {
        result: Result<(f64, f64), GeolocationFailure>,
    }

    #[async_trait::async_trait]
    impl Geolocator for MockLocator {
        async fn locate(&self) -> Result<(f64, f64), GeolocationFailure> {
            self.result
        }
    }

    // -- Builders -----------------------------------------------------

    struct Fixture {
        geocoder: Result<GeocodedAddress, GeocodeFailure>,
        map: Arc<MockMap>,
        assistant: Arc<MockAssistant>,
        store: Option<Arc<MockStore>>,
        locator: Result<(f64, f64), GeolocationFailure>,
    }

    impl Default for Fixture {
        fn default() -> Self {
            Self {
                geocoder: Ok(GeocodedAddress {
                    latitude: 39.77,
                    longitude: -86.15,
                    formatted_address: Some("100 Main St, Indianapolis".to_string()),
                }),
                map: Arc::new(MockMap::ok()),
                assistant: Arc::new(MockAssistant::replying("Stay safe.")),
                store: Some(Arc::new(MockStore::default())),
                locator: Ok((39.7684, -86.1581)),
            }
        }
    }

    impl Fixture {
        fn session(&self) -> Session {
            Session::new(
                SessionPorts {
                    geocoder: Arc::new(MockGeocoder {
                        result: self.geocoder.clone(),
                    }),
                    map: Arc::clone(&self.map) as Arc<dyn MapRenderer>,
                    assistant: Arc::clone(&self.assistant) as Arc<dyn Assistant>,
                    store: self
                        .store
                        .as_ref()
                        .map(|s| Arc::clone(s) as Arc<dyn ReportStore>),
                    geolocator: Arc::new(MockLocator {
                        result: self.locator,
                    }),
                },
                "anon-test",
            )
        }
    }

    fn last(session: &Session) -> &ChatMessage {
        session.transcript().last().unwrap()
    }

    async fn reach_awaiting_location(session: &mut Session, category: HazardCategory) {
        session.handle_message(UserInput::text("/report hazard")).await;
        session
            .select_category(CategoryChoice::Category(category))
            .await;
        assert_eq!(session.stage, ReportingStage::AwaitingLocation);
    }

    // -- Tests --------------------------------------------------------

    #[tokio::test]
    async fn welcome_message_opens_the_transcript() {
        let session = Fixture::default().session();
        assert_eq!(session.transcript().len(), 1);
        assert!(session.transcript()[0].text.starts_with("Welcome"));
    }

    #[tokio::test]
    async fn full_fire_report_scenario() {
        let fixture = Fixture::default();
        let mut session = fixture.session();

        reach_awaiting_location(&mut session, HazardCategory::Fire).await;
        session.handle_message(UserInput::text("100 Main St")).await;
        assert_eq!(session.stage, ReportingStage::AwaitingDetails);

        session
            .handle_message(UserInput::text("small grass fire"))
            .await;

        let store = fixture.store.unwrap();
        let reports = store.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        let (id, doc) = &reports[0];
        assert_eq!(doc.category, HazardCategory::Fire);
        assert_eq!(
            doc.formatted_address.as_deref(),
            Some("100 Main St, Indianapolis")
        );
        assert_eq!(doc.details, "small grass fire");
        assert_eq!(doc.latitude, Some(39.77));

        assert!(last(&session).text.contains(id));
        assert_eq!(session.stage, ReportingStage::Idle);
        assert_eq!(session.draft, HazardReportDraft::default());
    }

    #[tokio::test]
    async fn location_text_always_yields_coordinates() {
        // Any geocoding failure falls back to the simulated pair
        for failure in [
            GeocodeFailure::NotConfigured,
            GeocodeFailure::NoMatch,
            GeocodeFailure::Failed("boom".to_string()),
        ] {
            let fixture = Fixture {
                geocoder: Err(failure),
                ..Fixture::default()
            };
            let mut session = fixture.session();
            reach_awaiting_location(&mut session, HazardCategory::Fire).await;

            session.handle_message(UserInput::text("somewhere vague")).await;

            assert_eq!(session.draft.latitude, Some(SIMULATED_LATITUDE));
            assert_eq!(session.draft.longitude, Some(SIMULATED_LONGITUDE));
            assert_eq!(session.stage, ReportingStage::AwaitingDetails);
        }
    }

    #[tokio::test]
    async fn category_survives_geocoding_failure() {
        let fixture = Fixture {
            geocoder: Err(GeocodeFailure::Failed("offline".to_string())),
            ..Fixture::default()
        };
        let mut session = fixture.session();

        reach_awaiting_location(&mut session, HazardCategory::UtilityIssue).await;
        session.handle_message(UserInput::text("5th and Oak")).await;
        session.handle_message(UserInput::text("downed line")).await;

        let store = fixture.store.unwrap();
        let reports = store.reports.lock().unwrap();
        assert_eq!(reports[0].1.category, HazardCategory::UtilityIssue);
    }

    #[tokio::test]
    async fn unconfigured_geocoding_stores_raw_location_text() {
        let fixture = Fixture {
            geocoder: Err(GeocodeFailure::NotConfigured),
            ..Fixture::default()
        };
        let mut session = fixture.session();

        reach_awaiting_location(&mut session, HazardCategory::RoadHazard).await;
        session.handle_message(UserInput::text("38th & Meridian")).await;
        session.handle_message(UserInput::text("pothole")).await;

        // Round-trip: the listing shows exactly the text the user typed
        session
            .handle_message(UserInput::text("/my_recent_reports"))
            .await;
        let MessageKind::ReportList { reports } = &last(&session).kind else {
            panic!("expected a report list");
        };
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].formatted_address.as_deref(), Some("38th & Meridian"));
        assert_eq!(reports[0].details, "pothole");
        assert_eq!(reports[0].category, HazardCategory::RoadHazard);
    }

    #[tokio::test]
    async fn cancel_while_idle_is_a_noop_besides_acknowledgement() {
        let mut session = Fixture::default().session();

        session.handle_message(UserInput::text("/cancel")).await;

        assert_eq!(session.stage, ReportingStage::Idle);
        assert_eq!(session.draft, HazardReportDraft::default());
        assert_eq!(last(&session).text, "Action cancelled.");
    }

    #[tokio::test]
    async fn pending_selector_locks_out_free_text() {
        let mut session = Fixture::default().session();
        session.handle_message(UserInput::text("/report hazard")).await;
        assert_eq!(
            session.pending_selection(),
            Some(SelectionPurpose::ReportHazard)
        );

        session.handle_message(UserInput::text("Fire I guess")).await;

        assert!(last(&session)
            .text
            .contains("Please select a category using the buttons above"));
        assert_eq!(session.stage, ReportingStage::AwaitingCategory);
        assert_eq!(session.draft, HazardReportDraft::default());
    }

    #[tokio::test]
    async fn report_hazard_without_store_is_disabled() {
        let fixture = Fixture {
            store: None,
            ..Fixture::default()
        };
        let mut session = fixture.session();

        session.handle_message(UserInput::text("/report hazard")).await;

        assert_eq!(last(&session).kind, MessageKind::Error);
        assert!(last(&session).text.contains("currently unavailable"));
        assert_eq!(session.stage, ReportingStage::Idle);
    }

    #[tokio::test]
    async fn persistence_failure_aborts_flow_to_idle() {
        let fixture = Fixture {
            store: Some(Arc::new(MockStore {
                fail_inserts: true,
                ..MockStore::default()
            })),
            ..Fixture::default()
        };
        let mut session = fixture.session();

        reach_awaiting_location(&mut session, HazardCategory::Fire).await;
        session.handle_message(UserInput::text("somewhere")).await;
        session.handle_message(UserInput::text("details")).await;

        assert_eq!(last(&session).kind, MessageKind::Error);
        assert!(last(&session)
            .text
            .contains("There was an issue submitting your report"));
        assert_eq!(session.stage, ReportingStage::Idle);
        assert_eq!(session.draft, HazardReportDraft::default());
    }

    #[tokio::test]
    async fn nearby_hazards_zero_radius_is_rejected() {
        let fixture = Fixture::default();
        let mut session = fixture.session();

        session
            .handle_message(UserInput::text("/nearby_hazards 39.7 -86.1 0"))
            .await;

        assert_eq!(last(&session).kind, MessageKind::Error);
        assert!(last(&session).text.contains("Invalid latitude, longitude, or radius"));
    }

    #[tokio::test]
    async fn nearby_hazards_filters_by_boundary_distance() {
        let fixture = Fixture::default();
        let store = fixture.store.clone().unwrap();

        let doc = HazardReportDocument {
            category: HazardCategory::Fire,
            location: "west side".to_string(),
            details: "smoke".to_string(),
            timestamp: Utc::now(),
            user_id: "anon-other".to_string(),
            latitude: Some(39.7684),
            longitude: Some(-86.2581),
            formatted_address: None,
            upvotes: 0,
            downvotes: 0,
        };
        store.insert_report(&doc).await.unwrap();

        let boundary = citysafe_spatial::distance_km(39.7684, -86.1581, 39.7684, -86.2581);

        let mut session = fixture.session();
        session
            .handle_message(UserInput::text(format!(
                "/nearby_hazards 39.7684 -86.1581 {}",
                boundary + 0.01
            )))
            .await;
        let MessageKind::ReportList { reports } = &last(&session).kind else {
            panic!("expected a report list within the boundary");
        };
        assert_eq!(reports.len(), 1);
        assert!(reports[0].distance_km.unwrap() <= boundary + 0.01);

        session
            .handle_message(UserInput::text(format!(
                "/nearby_hazards 39.7684 -86.1581 {}",
                boundary - 0.01
            )))
            .await;
        assert!(last(&session).text.starts_with("No hazard reports found"));
    }

    #[tokio::test]
    async fn geolocation_denied_makes_no_map_request() {
        let fixture = Fixture {
            locator: Err(GeolocationFailure::Denied),
            ..Fixture::default()
        };
        let mut session = fixture.session();

        session.handle_message(UserInput::text("/map")).await;

        assert_eq!(last(&session).kind, MessageKind::Error);
        assert!(last(&session).text.contains("/map <latitude> <longitude>"));
        assert_eq!(fixture.map.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn geolocation_success_echoes_command_and_renders_map() {
        let fixture = Fixture::default();
        let mut session = fixture.session();

        session.handle_message(UserInput::text("/map")).await;

        let texts: Vec<&str> = session.transcript().iter().map(|m| m.text.as_str()).collect();
        assert!(texts.contains(&"Location found."));
        assert!(texts.contains(&"/map 39.768400 -86.158100"));
        assert!(matches!(last(&session).kind, MessageKind::Image { .. }));
        assert_eq!(fixture.map.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn map_failure_replaces_placeholder_with_error() {
        let fixture = Fixture {
            map: Arc::new(MockMap {
                calls: AtomicU32::new(0),
                result: Err(MapFailure("tiles on fire".to_string())),
            }),
            ..Fixture::default()
        };
        let mut session = fixture.session();

        session
            .handle_message(UserInput::text("/map 39.7 -86.1"))
            .await;

        assert_eq!(last(&session).kind, MessageKind::Error);
        assert!(last(&session).text.contains("Map generation failed: tiles on fire"));
    }

    #[tokio::test]
    async fn list_hazards_rejects_unknown_category() {
        let mut session = Fixture::default().session();

        session
            .handle_message(UserInput::text("/list_hazards meteor strike"))
            .await;

        assert_eq!(last(&session).kind, MessageKind::Error);
        assert!(last(&session).text.contains("Invalid category: 'meteor strike'"));
    }

    #[tokio::test]
    async fn list_selection_dispatches_and_returns_to_idle() {
        let fixture = Fixture::default();
        let store = fixture.store.clone().unwrap();
        store
            .insert_report(&HazardReportDocument {
                category: HazardCategory::Fire,
                location: "loc".to_string(),
                details: "d".to_string(),
                timestamp: Utc::now(),
                user_id: "anon-test".to_string(),
                latitude: None,
                longitude: None,
                formatted_address: None,
                upvotes: 0,
                downvotes: 0,
            })
            .await
            .unwrap();

        let mut session = fixture.session();
        session.handle_message(UserInput::text("/list_hazards")).await;
        assert_eq!(
            session.pending_selection(),
            Some(SelectionPurpose::ListReports)
        );

        session
            .select_category(CategoryChoice::Category(HazardCategory::Fire))
            .await;

        assert_eq!(session.stage, ReportingStage::Idle);
        assert!(session.pending_selection().is_none());
        assert!(matches!(last(&session).kind, MessageKind::ReportList { .. }));
        assert!(last(&session).text.contains("'Fire' report(s)"));
    }

    #[tokio::test]
    async fn double_upvote_accumulates_in_store_and_transcript() {
        let fixture = Fixture::default();
        let store = fixture.store.clone().unwrap();
        store
            .insert_report(&HazardReportDocument {
                category: HazardCategory::Fire,
                location: "loc".to_string(),
                details: "d".to_string(),
                timestamp: Utc::now(),
                user_id: "anon-test".to_string(),
                latitude: None,
                longitude: None,
                formatted_address: None,
                upvotes: 3,
                downvotes: 0,
            })
            .await
            .unwrap();

        let mut session = fixture.session();
        session
            .handle_message(UserInput::text("/list_hazards Fire"))
            .await;

        session.upvote("r1").await;
        session.upvote("r1").await;

        assert_eq!(store.reports.lock().unwrap()[0].1.upvotes, 5);
        let MessageKind::ReportList { reports } = &last(&session).kind else {
            panic!("expected a report list");
        };
        assert_eq!(reports[0].upvotes, 5);
    }

    #[tokio::test]
    async fn stale_geocode_result_is_discarded_after_cancel() {
        let mut session = Fixture::default().session();
        reach_awaiting_location(&mut session, HazardCategory::Fire).await;

        let stale_epoch = session.epoch;
        session.handle_message(UserInput::text("/cancel")).await;
        assert_eq!(session.stage, ReportingStage::Idle);

        session.apply_geocode_outcome(
            stale_epoch,
            "some-old-message",
            "100 Main St",
            Ok(GeocodedAddress {
                latitude: 1.0,
                longitude: 2.0,
                formatted_address: None,
            }),
        );

        assert_eq!(session.stage, ReportingStage::Idle);
        assert_eq!(session.draft, HazardReportDraft::default());
    }

    #[tokio::test]
    async fn free_text_routes_to_assistant_with_extracted_coordinates() {
        let fixture = Fixture::default();
        let mut session = fixture.session();

        session
            .handle_message(UserInput::text("nearest hospital to 39.7, -86.1 please"))
            .await;

        assert_eq!(last(&session).text, "Stay safe.");
        let query = fixture.assistant.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query.latitude, Some(39.7));
        assert_eq!(query.longitude, Some(-86.1));
    }

    #[tokio::test]
    async fn attached_image_geotag_is_forwarded_to_assistant() {
        let fixture = Fixture::default();
        let mut session = fixture.session();

        session
            .handle_message(UserInput {
                text: "what is this?".to_string(),
                image: Some(UploadedImage {
                    data_uri: "data:image/png;base64,QUJD".to_string(),
                    latitude: Some(39.8),
                    longitude: Some(-86.2),
                }),
            })
            .await;

        let query = fixture.assistant.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query.image_data_uri.as_deref(), Some("data:image/png;base64,QUJD"));
        assert_eq!(query.image_latitude, Some(39.8));
        assert_eq!(query.image_longitude, Some(-86.2));
    }

    #[tokio::test]
    async fn alerts_are_deduplicated_and_critical_flagged() {
        let mut session = Fixture::default().session();

        let alert = AlertWithId {
            id: "a1".to_string(),
            alert: AlertDocument {
                title: "Tornado Warning".to_string(),
                text: "Seek shelter now.".to_string(),
                timestamp: Utc::now(),
                urgency: AlertUrgency::Critical,
                latitude: Some(39.77),
                longitude: Some(-86.15),
            },
        };

        let before = session.transcript().len();
        session.ingest_alert(&alert);
        session.ingest_alert(&alert);

        assert_eq!(session.transcript().len(), before + 1);
        let message = last(&session);
        assert_eq!(message.sender, Sender::System);
        assert!(message.text.contains("Tornado Warning"));
        assert!(message.text.contains("CRITICAL"));
    }

    #[tokio::test]
    async fn reset_chat_clears_transcript_and_flow_state() {
        let mut session = Fixture::default().session();
        session.handle_message(UserInput::text("/report hazard")).await;
        session
            .select_category(CategoryChoice::Category(HazardCategory::Fire))
            .await;

        session.handle_message(UserInput::text("/reset_chat")).await;

        assert_eq!(session.transcript().len(), 1);
        assert!(session.transcript()[0].text.starts_with("Welcome"));
        assert_eq!(session.stage, ReportingStage::Idle);
        assert!(session.pending_selection().is_none());
        assert_eq!(session.draft, HazardReportDraft::default());
    }

    #[tokio::test]
    async fn create_mock_alert_persists_a_critical_alert() {
        let fixture = Fixture::default();
        let mut session = fixture.session();

        session
            .handle_message(UserInput::text("/create_mock_alert"))
            .await;

        let store = fixture.store.unwrap();
        let alerts = store.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert.urgency, AlertUrgency::Critical);
        assert!(alerts[0].alert.latitude.is_some());
        assert!(last(&session).text.contains("has been created"));
    }

    #[tokio::test]
    async fn alerts_near_formats_distance_listing() {
        let fixture = Fixture::default();
        let store = fixture.store.clone().unwrap();
        store
            .insert_alert(&AlertDocument {
                title: "Flood Watch".to_string(),
                text: "River rising.".to_string(),
                timestamp: Utc::now(),
                urgency: AlertUrgency::Medium,
                latitude: Some(39.7684),
                longitude: Some(-86.1581),
            })
            .await
            .unwrap();

        let mut session = fixture.session();
        session
            .handle_message(UserInput::text("/alerts_near 39.7684 -86.1581 5"))
            .await;

        assert!(last(&session).text.contains("Found 1 official alert(s)"));
        assert!(last(&session).text.contains("**Flood Watch**"));
    }
}
