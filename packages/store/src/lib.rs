#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Persistent document store for hazard reports and alerts, backed by
//! `SQLite`.
//!
//! Stores documents in `data/citysafe.db` so reports and alerts survive
//! restarts. Uses `switchy_database` for all database operations. Vote
//! counts are incremented inside single SQL statements, so concurrent
//! votes never lose updates. Every inserted alert is also published on a
//! broadcast channel that interested consumers can subscribe to.

use std::path::Path;

use chrono::{DateTime, Utc};
use citysafe_models::{
    AlertDocument, AlertUrgency, AlertWithId, HazardCategory, HazardReportDocument, ReportView,
};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue, Row};
use switchy_database_connection::init_sqlite_rusqlite;
use thiserror::Error;
use tokio::sync::broadcast;

/// Default path for the document database.
pub const DEFAULT_DB_PATH: &str = "data/citysafe.db";

/// How many reports a category listing returns.
const LIST_LIMIT: u32 = 10;
/// How many geotagged reports a proximity query scans.
const NEARBY_SCAN_LIMIT: u32 = 50;
/// How many recent reports are offered as map markers.
const MAP_MARKER_LIMIT: u32 = 5;
/// How many of a user's own reports are listed.
const USER_REPORTS_LIMIT: u32 = 5;
/// How many geotagged alerts a proximity query scans.
const ALERT_SCAN_LIMIT: u32 = 20;

/// Buffered alert events per subscriber before lagging.
const ALERT_CHANNEL_CAPACITY: usize = 64;

/// Errors from document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database query or command failed.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The document store.
///
/// Owns the database handle and the alert broadcast channel.
pub struct DocumentStore {
    db: Box<dyn Database>,
    alerts_tx: broadcast::Sender<AlertWithId>,
}

impl DocumentStore {
    /// Opens (or creates) the `SQLite` database at `path` and ensures the
    /// schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened or schema
    /// creation fails.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = init_sqlite_rusqlite(Some(path))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Self::with_database(db).await
    }

    /// Wraps an already-opened database, ensuring the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if schema creation fails.
    pub async fn with_database(db: Box<dyn Database>) -> Result<Self, StoreError> {
        ensure_schema(db.as_ref()).await?;
        let (alerts_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Ok(Self { db, alerts_tx })
    }

    /// Subscribes to alerts inserted after this call.
    #[must_use]
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertWithId> {
        self.alerts_tx.subscribe()
    }

    /// Persists a hazard report, returning its generated id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    pub async fn insert_report(
        &self,
        report: &HazardReportDocument,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();

        self.db
            .exec_raw_params(
                "INSERT INTO hazard_reports
                 (id, category, location, details, timestamp, user_id,
                  latitude, longitude, formatted_address, upvotes, downvotes)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    DatabaseValue::String(id.clone()),
                    DatabaseValue::String(report.category.to_string()),
                    DatabaseValue::String(report.location.clone()),
                    DatabaseValue::String(report.details.clone()),
                    DatabaseValue::String(report.timestamp.to_rfc3339()),
                    DatabaseValue::String(report.user_id.clone()),
                    report.latitude.map_or(DatabaseValue::Null, DatabaseValue::Real64),
                    report.longitude.map_or(DatabaseValue::Null, DatabaseValue::Real64),
                    report
                        .formatted_address
                        .clone()
                        .map_or(DatabaseValue::Null, DatabaseValue::String),
                    DatabaseValue::Int64(report.upvotes),
                    DatabaseValue::Int64(report.downvotes),
                ],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        log::debug!("Inserted hazard report {id}");

        Ok(id)
    }

    /// Lists the most recent reports, optionally filtered by category.
    ///
    /// Newest first, at most 10 rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_by_category(
        &self,
        category: Option<HazardCategory>,
    ) -> Result<Vec<ReportView>, StoreError> {
        let rows = if let Some(category) = category {
            self.db
                .query_raw_params(
                    "SELECT * FROM hazard_reports
                     WHERE category = $1
                     ORDER BY timestamp DESC
                     LIMIT $2",
                    &[
                        DatabaseValue::String(category.to_string()),
                        limit_value(LIST_LIMIT),
                    ],
                )
                .await
        } else {
            self.db
                .query_raw_params(
                    "SELECT * FROM hazard_reports
                     ORDER BY timestamp DESC
                     LIMIT $1",
                    &[limit_value(LIST_LIMIT)],
                )
                .await
        }
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(row_to_report_view).collect())
    }

    /// Most recent reports that carry coordinates, for proximity queries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn recent_with_coords(&self) -> Result<Vec<ReportView>, StoreError> {
        self.geotagged_reports(NEARBY_SCAN_LIMIT).await
    }

    /// Most recent geotagged reports suitable for map markers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn recent_for_map(&self) -> Result<Vec<ReportView>, StoreError> {
        self.geotagged_reports(MAP_MARKER_LIMIT).await
    }

    async fn geotagged_reports(&self, limit: u32) -> Result<Vec<ReportView>, StoreError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT * FROM hazard_reports
                 WHERE latitude IS NOT NULL AND longitude IS NOT NULL
                 ORDER BY timestamp DESC
                 LIMIT $1",
                &[limit_value(limit)],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(row_to_report_view).collect())
    }

    /// Most recent reports submitted by a given user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn reports_by_user(&self, user_id: &str) -> Result<Vec<ReportView>, StoreError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT * FROM hazard_reports
                 WHERE user_id = $1
                 ORDER BY timestamp DESC
                 LIMIT $2",
                &[
                    DatabaseValue::String(user_id.to_string()),
                    limit_value(USER_REPORTS_LIMIT),
                ],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(row_to_report_view).collect())
    }

    /// Increments a report's upvote count.
    ///
    /// The increment happens inside the statement, so concurrent votes
    /// never read stale counts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub async fn upvote(&self, report_id: &str) -> Result<(), StoreError> {
        self.increment_vote(report_id, "upvotes").await
    }

    /// Increments a report's downvote count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub async fn downvote(&self, report_id: &str) -> Result<(), StoreError> {
        self.increment_vote(report_id, "downvotes").await
    }

    async fn increment_vote(&self, report_id: &str, column: &str) -> Result<(), StoreError> {
        // column is one of two fixed names, never user input
        let statement =
            format!("UPDATE hazard_reports SET {column} = {column} + 1 WHERE id = $1");

        self.db
            .exec_raw_params(
                &statement,
                &[DatabaseValue::String(report_id.to_string())],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    /// Persists an alert and publishes it to subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    pub async fn insert_alert(&self, alert: &AlertDocument) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();

        self.db
            .exec_raw_params(
                "INSERT INTO alerts
                 (id, title, text, timestamp, urgency, latitude, longitude)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    DatabaseValue::String(id.clone()),
                    DatabaseValue::String(alert.title.clone()),
                    DatabaseValue::String(alert.text.clone()),
                    DatabaseValue::String(alert.timestamp.to_rfc3339()),
                    DatabaseValue::String(alert.urgency.to_string()),
                    alert.latitude.map_or(DatabaseValue::Null, DatabaseValue::Real64),
                    alert.longitude.map_or(DatabaseValue::Null, DatabaseValue::Real64),
                ],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        // No subscribers is fine
        let _ = self.alerts_tx.send(AlertWithId {
            id: id.clone(),
            alert: alert.clone(),
        });

        log::debug!("Inserted alert {id}");

        Ok(id)
    }

    /// Most recent alerts that carry coordinates, for proximity queries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn alerts_with_coords(&self) -> Result<Vec<AlertWithId>, StoreError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT * FROM alerts
                 WHERE latitude IS NOT NULL AND longitude IS NOT NULL
                 ORDER BY timestamp DESC
                 LIMIT $1",
                &[limit_value(ALERT_SCAN_LIMIT)],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(row_to_alert).collect())
    }
}

/// Creates all tables if they don't already exist.
async fn ensure_schema(db: &dyn Database) -> Result<(), StoreError> {
    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS hazard_reports (
            id                TEXT PRIMARY KEY,
            category          TEXT NOT NULL,
            location          TEXT NOT NULL,
            details           TEXT NOT NULL,
            timestamp         TEXT NOT NULL,
            user_id           TEXT NOT NULL,
            latitude          REAL,
            longitude         REAL,
            formatted_address TEXT,
            upvotes           INTEGER NOT NULL DEFAULT 0,
            downvotes         INTEGER NOT NULL DEFAULT 0
        )",
    )
    .await
    .map_err(|e| StoreError::Database(e.to_string()))?;

    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS alerts (
            id        TEXT PRIMARY KEY,
            title     TEXT NOT NULL,
            text      TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            urgency   TEXT NOT NULL,
            latitude  REAL,
            longitude REAL
        )",
    )
    .await
    .map_err(|e| StoreError::Database(e.to_string()))?;

    db.exec_raw(
        "CREATE INDEX IF NOT EXISTS idx_reports_timestamp
         ON hazard_reports (timestamp)",
    )
    .await
    .map_err(|e| StoreError::Database(e.to_string()))?;

    db.exec_raw(
        "CREATE INDEX IF NOT EXISTS idx_reports_category
         ON hazard_reports (category, timestamp)",
    )
    .await
    .map_err(|e| StoreError::Database(e.to_string()))?;

    db.exec_raw(
        "CREATE INDEX IF NOT EXISTS idx_reports_user
         ON hazard_reports (user_id, timestamp)",
    )
    .await
    .map_err(|e| StoreError::Database(e.to_string()))?;

    db.exec_raw(
        "CREATE INDEX IF NOT EXISTS idx_alerts_timestamp
         ON alerts (timestamp)",
    )
    .await
    .map_err(|e| StoreError::Database(e.to_string()))?;

    Ok(())
}

fn limit_value(limit: u32) -> DatabaseValue {
    DatabaseValue::Int32(i32::try_from(limit).unwrap_or(i32::MAX))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_to_report_view(row: &Row) -> ReportView {
    let category_raw: String = row.to_value("category").unwrap_or_default();
    let timestamp_raw: String = row.to_value("timestamp").unwrap_or_default();

    ReportView {
        id: row.to_value("id").unwrap_or_default(),
        category: HazardCategory::parse(&category_raw).unwrap_or(HazardCategory::Other),
        location: row.to_value("location").unwrap_or_default(),
        formatted_address: row.to_value("formatted_address").unwrap_or(None),
        details: row.to_value("details").unwrap_or_default(),
        upvotes: row.to_value("upvotes").unwrap_or(0),
        downvotes: row.to_value("downvotes").unwrap_or(0),
        timestamp: parse_timestamp(&timestamp_raw),
        latitude: row.to_value("latitude").unwrap_or(None),
        longitude: row.to_value("longitude").unwrap_or(None),
        distance_km: None,
    }
}

fn row_to_alert(row: &Row) -> AlertWithId {
    let urgency_raw: String = row.to_value("urgency").unwrap_or_default();
    let timestamp_raw: String = row.to_value("timestamp").unwrap_or_default();

    AlertWithId {
        id: row.to_value("id").unwrap_or_default(),
        alert: AlertDocument {
            title: row.to_value("title").unwrap_or_default(),
            text: row.to_value("text").unwrap_or_default(),
            timestamp: parse_timestamp(&timestamp_raw).unwrap_or_else(Utc::now),
            urgency: urgency_raw.parse().unwrap_or(AlertUrgency::Low),
            latitude: row.to_value("latitude").unwrap_or(None),
            longitude: row.to_value("longitude").unwrap_or(None),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> DocumentStore {
        let db = init_sqlite_rusqlite(None).unwrap();
        DocumentStore::with_database(db).await.unwrap()
    }

    fn sample_report(category: HazardCategory, user_id: &str) -> HazardReportDocument {
        HazardReportDocument {
            category,
            location: "38th & Meridian".to_string(),
            details: "Large pothole".to_string(),
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            latitude: Some(39.7684),
            longitude: Some(-86.1581),
            formatted_address: Some("38th St & Meridian St, Indianapolis".to_string()),
            upvotes: 0,
            downvotes: 0,
        }
    }

    #[tokio::test]
    async fn report_round_trips_through_the_store() {
        let store = memory_store().await;

        let id = store
            .insert_report(&sample_report(HazardCategory::RoadHazard, "anon-1"))
            .await
            .unwrap();

        let reports = store.list_by_category(None).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].id, id);
        assert_eq!(reports[0].category, HazardCategory::RoadHazard);
        assert_eq!(reports[0].location, "38th & Meridian");
        assert_eq!(reports[0].latitude, Some(39.7684));
        assert!(reports[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn category_filter_excludes_other_categories() {
        let store = memory_store().await;

        store
            .insert_report(&sample_report(HazardCategory::Fire, "anon-1"))
            .await
            .unwrap();
        store
            .insert_report(&sample_report(HazardCategory::RoadHazard, "anon-1"))
            .await
            .unwrap();

        let fires = store
            .list_by_category(Some(HazardCategory::Fire))
            .await
            .unwrap();
        assert_eq!(fires.len(), 1);
        assert_eq!(fires[0].category, HazardCategory::Fire);
    }

    #[tokio::test]
    async fn votes_accumulate_per_statement() {
        let store = memory_store().await;

        let id = store
            .insert_report(&sample_report(HazardCategory::Fire, "anon-1"))
            .await
            .unwrap();

        store.upvote(&id).await.unwrap();
        store.upvote(&id).await.unwrap();
        store.downvote(&id).await.unwrap();

        let reports = store.list_by_category(None).await.unwrap();
        assert_eq!(reports[0].upvotes, 2);
        assert_eq!(reports[0].downvotes, 1);
    }

    #[tokio::test]
    async fn reports_by_user_only_returns_that_user() {
        let store = memory_store().await;

        store
            .insert_report(&sample_report(HazardCategory::Fire, "anon-1"))
            .await
            .unwrap();
        store
            .insert_report(&sample_report(HazardCategory::Fire, "anon-2"))
            .await
            .unwrap();

        let mine = store.reports_by_user("anon-1").await.unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[tokio::test]
    async fn ungeotagged_reports_are_excluded_from_map_queries() {
        let store = memory_store().await;

        let mut report = sample_report(HazardCategory::Fire, "anon-1");
        report.latitude = None;
        report.longitude = None;
        store.insert_report(&report).await.unwrap();

        assert!(store.recent_for_map().await.unwrap().is_empty());
        assert!(store.recent_with_coords().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn inserted_alerts_reach_subscribers() {
        let store = memory_store().await;
        let mut rx = store.subscribe_alerts();

        let alert = AlertDocument {
            title: "Flash Flood Warning".to_string(),
            text: "Avoid low-lying roads.".to_string(),
            timestamp: Utc::now(),
            urgency: AlertUrgency::Critical,
            latitude: Some(39.77),
            longitude: Some(-86.15),
        };
        let id = store.insert_alert(&alert).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, id);
        assert_eq!(received.alert.title, "Flash Flood Warning");
        assert_eq!(received.alert.urgency, AlertUrgency::Critical);

        let listed = store.alerts_with_coords().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
    }
}
