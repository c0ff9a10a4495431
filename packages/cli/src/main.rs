#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Interactive terminal chat for the CitySafe public-safety assistant.
//!
//! Wires the production adapters (Geoapify, LLM provider, SQLite store)
//! into the session controller and runs a read-render loop on stdin.
//! Alert notifications arrive asynchronously through the store's
//! broadcast subscription and are injected into the transcript as system
//! messages.

mod adapters;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use citysafe_ai::engine::AssistantEngine;
use citysafe_ai::providers::create_provider_from_env;
use citysafe_geo::GeoapifyClient;
use citysafe_models::{ChatMessage, HazardCategory, MessageKind, Sender};
use citysafe_session::ports::{Assistant, ReportStore};
use citysafe_session::{CategoryChoice, Session, SessionPorts, UserInput};
use citysafe_store::DocumentStore;
use clap::Parser;
use dialoguer::{Input, Select};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};

/// Environment variable overriding the database path.
const DB_PATH_ENV: &str = "CITYSAFE_DB_PATH";

#[derive(Parser)]
#[command(
    name = "citysafe",
    about = "Interactive public-safety chat assistant for Indianapolis"
)]
struct Args {
    /// SQLite database path. Overrides CITYSAFE_DB_PATH.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Terminal error: {0}")]
    Terminal(#[from] dialoguer::Error),

    #[error("Task error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The session plus a cursor over how much of the transcript has been
/// printed.
struct App {
    session: Session,
    printed: usize,
}

impl App {
    fn flush(&mut self) {
        let len = self.session.transcript().len();
        // A shrinking transcript means /reset_chat replaced it wholesale
        if self.printed > len {
            self.printed = 0;
        }
        for message in &self.session.transcript()[self.printed..] {
            println!("{}", format_message(message));
        }
        self.printed = len;
    }
}

fn format_message(message: &ChatMessage) -> String {
    let prefix = match message.sender {
        Sender::User => "you",
        Sender::Bot => "citysafe",
        Sender::System => "alert",
    };
    let mut out = format!("[{prefix}] {}", message.text);

    match &message.kind {
        MessageKind::Image { url } => {
            out.push_str(&format!("\n    map: {url}"));
        }
        MessageKind::ReportList { reports } => {
            for report in reports {
                let address = report
                    .formatted_address
                    .as_deref()
                    .unwrap_or(&report.location);
                out.push_str(&format!(
                    "\n    [{}] {} at {address}: {} (+{}/-{})",
                    report.id, report.category, report.details, report.upvotes, report.downvotes
                ));
                if let Some(distance) = report.distance_km {
                    out.push_str(&format!(", {distance:.2} km away"));
                }
            }
        }
        MessageKind::Text
        | MessageKind::CategorySelector { .. }
        | MessageKind::LocationRequest
        | MessageKind::Error => {}
    }

    out
}

/// Loads the cached anonymous session id, creating one on first run.
fn load_or_create_user_id(path: &Path) -> std::io::Result<String> {
    if let Ok(existing) = fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
    let id = format!("anon-{millis}-{suffix}");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &id)?;
    Ok(id)
}

fn select_category_blocking() -> Result<CategoryChoice, dialoguer::Error> {
    let mut items: Vec<String> = HazardCategory::ALL.iter().map(ToString::to_string).collect();
    items.push("Cancel".to_string());

    let index = Select::new()
        .with_prompt("Select a category")
        .items(&items)
        .default(0)
        .interact()?;

    Ok(HazardCategory::ALL
        .get(index)
        .map_or(CategoryChoice::Cancel, |cat| {
            CategoryChoice::Category(*cat)
        }))
}

fn prompt_line(placeholder: &'static str) -> Result<String, dialoguer::Error> {
    Input::<String>::new()
        .with_prompt(placeholder)
        .allow_empty(true)
        .interact_text()
}

fn print_help() {
    println!(
        "Commands: /report hazard, /map [<lat> <lon>], /list_hazards [category],\n\
         /nearby_hazards <lat> <lon> [radius_km], /alerts_near <lat> <lon> [radius_km],\n\
         /my_recent_reports, /create_mock_alert, /upvote <report id>, /downvote <report id>,\n\
         /reset_chat, /cancel, /quit. Anything else is answered by the assistant."
    );
}

async fn run(app: Arc<Mutex<App>>) -> Result<(), CliError> {
    print_help();
    app.lock().await.flush();

    loop {
        let (pending, placeholder) = {
            let app = app.lock().await;
            (
                app.session.pending_selection(),
                app.session.input_placeholder(),
            )
        };

        if pending.is_some() {
            let choice = tokio::task::spawn_blocking(select_category_blocking).await??;
            let mut app = app.lock().await;
            app.session.select_category(choice).await;
            app.flush();
            continue;
        }

        let line = tokio::task::spawn_blocking(move || prompt_line(placeholder)).await??;
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if matches!(line.to_lowercase().as_str(), "/quit" | "/exit") {
            break;
        }

        let mut app = app.lock().await;
        if let Some(id) = line.strip_prefix("/upvote ") {
            app.session.upvote(id.trim()).await;
            println!("Vote recorded for {}", id.trim());
        } else if let Some(id) = line.strip_prefix("/downvote ") {
            app.session.downvote(id.trim()).await;
            println!("Vote recorded for {}", id.trim());
        } else {
            app.session.handle_message(UserInput::text(line)).await;
        }
        app.flush();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let args = Args::parse();

    let db_path = args
        .db_path
        .or_else(|| std::env::var(DB_PATH_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(citysafe_store::DEFAULT_DB_PATH));

    let store = match DocumentStore::open(&db_path).await {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            log::error!(
                "Could not open document store at {}: {e}; persistence-backed commands are disabled",
                db_path.display()
            );
            None
        }
    };

    let geoapify = Arc::new(GeoapifyClient::from_env());

    let assistant: Arc<dyn Assistant> = match create_provider_from_env() {
        Ok(provider) => Arc::new(adapters::EngineAssistant::new(AssistantEngine::new(
            provider,
            Arc::clone(&geoapify),
        ))),
        Err(e) => {
            log::warn!("No LLM provider configured: {e}");
            Arc::new(adapters::UnconfiguredAssistant)
        }
    };

    let user_id = load_or_create_user_id(&db_path.with_file_name("session_id"))?;
    log::info!("Session id: {user_id}");

    let ports = SessionPorts {
        geocoder: Arc::new(adapters::GeoapifyGeocoder::new(Arc::clone(&geoapify))),
        map: Arc::new(adapters::GeoapifyMapRenderer::new(Arc::clone(&geoapify))),
        assistant,
        store: store
            .as_ref()
            .map(|s| Arc::new(adapters::SqliteReportStore::new(Arc::clone(s))) as Arc<dyn ReportStore>),
        geolocator: Arc::new(adapters::EnvGeolocator),
    };

    let app = Arc::new(Mutex::new(App {
        session: Session::new(ports, user_id),
        printed: 0,
    }));

    if let Some(store) = &store {
        let mut alerts = store.subscribe_alerts();
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            loop {
                match alerts.recv().await {
                    Ok(alert) => {
                        let mut app = app.lock().await;
                        app.session.ingest_alert(&alert);
                        app.flush();
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Alert feed lagged; skipped {skipped} notification(s)");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    run(app).await
}
