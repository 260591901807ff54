#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Warehouse row types and query parameter definitions.
//!
//! These types represent the shapes of data as stored in and retrieved
//! from the warehouse `DuckDB`. Insert payloads (`New*` types) carry
//! natural keys; the warehouse resolves them to surrogate identifiers at
//! insert time and never auto-creates missing dimension rows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use mobility_map_transit_models::{
    CongestionLevel, ImpactScope, IncidentKind, IncidentSeverity, VehicleCategory, ZoneKind,
};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Default result cap for filtered fact queries.
pub const DEFAULT_QUERY_LIMIT: u32 = 1_000;

/// A geographic bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Returns whether the box contains the given point.
    #[must_use]
    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        (self.west..=self.east).contains(&longitude)
            && (self.south..=self.north).contains(&latitude)
    }
}

/// Which dimension catalog an upsert or lookup targets.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CatalogKind {
    /// Geographic zones (`dim_zone`).
    Zone,
    /// Vehicle classes (`dim_vehicle_class`).
    VehicleClass,
    /// Incident types (`dim_incident_type`).
    IncidentType,
}

/// Non-key attributes for a zone catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSpec {
    /// Unique natural key (e.g. "COMUNA_10").
    pub code: String,
    /// Display name.
    pub name: String,
    /// Zone kind tag.
    pub kind: ZoneKind,
    /// Boundary polygon as GeoJSON text (WGS84), if known.
    pub boundary_geojson: Option<String>,
    /// Land area in square kilometers.
    pub area_km2: Option<f64>,
    /// Resident population.
    pub population: Option<i64>,
}

/// Non-key attributes for a vehicle class catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleClassSpec {
    /// Unique natural key (e.g. "BUS").
    pub code: String,
    /// Display name.
    pub name: String,
    /// Parent grouping.
    pub category: VehicleCategory,
}

/// Non-key attributes for an incident type catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentTypeSpec {
    /// Unique natural key (e.g. "ACCIDENT").
    pub code: String,
    /// Display name.
    pub name: String,
    /// Canonical incident kind grouping.
    pub kind: IncidentKind,
    /// Severity tier for this type.
    pub severity: IncidentSeverity,
}

/// One catalog entry to upsert, tagged with its target dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CatalogEntry {
    /// A geographic zone.
    Zone(ZoneSpec),
    /// A vehicle class.
    VehicleClass(VehicleClassSpec),
    /// An incident type.
    IncidentType(IncidentTypeSpec),
}

impl CatalogEntry {
    /// Returns which dimension this entry targets.
    #[must_use]
    pub const fn kind(&self) -> CatalogKind {
        match self {
            Self::Zone(_) => CatalogKind::Zone,
            Self::VehicleClass(_) => CatalogKind::VehicleClass,
            Self::IncidentType(_) => CatalogKind::IncidentType,
        }
    }

    /// Returns the entry's natural key.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Zone(spec) => &spec.code,
            Self::VehicleClass(spec) => &spec.code,
            Self::IncidentType(spec) => &spec.code,
        }
    }
}

/// A `dim_time` row: one calendar (date, time-of-day) bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucketRow {
    /// Surrogate identifier.
    pub id: i64,
    /// Calendar date of the bucket.
    pub bucket_date: NaiveDate,
    /// Time of day the bucket starts at.
    pub bucket_time: NaiveTime,
    /// Hour of day (0-23).
    pub hour: u8,
    /// English weekday name ("Monday" .. "Sunday").
    pub weekday: String,
    /// Day of month (1-31).
    pub day_of_month: u8,
    /// Month number (1-12).
    pub month: u8,
    /// English month name.
    pub month_name: String,
    /// Calendar quarter (1-4).
    pub quarter: u8,
    /// Calendar year.
    pub year: i32,
    /// Whether the date falls on a Saturday or Sunday.
    pub is_weekend: bool,
    /// Whether the date is a fixed-date national holiday.
    pub is_holiday: bool,
}

/// A `dim_zone` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRow {
    /// Surrogate identifier.
    pub id: i64,
    /// Unique natural key.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Zone kind tag.
    pub kind: ZoneKind,
    /// Boundary polygon as GeoJSON text, if present.
    pub boundary_geojson: Option<String>,
    /// Land area in square kilometers.
    pub area_km2: Option<f64>,
    /// Resident population.
    pub population: Option<i64>,
}

/// A `dim_vehicle_class` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleClassRow {
    /// Surrogate identifier.
    pub id: i64,
    /// Unique natural key.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Parent grouping.
    pub category: VehicleCategory,
}

/// A `dim_incident_type` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentTypeRow {
    /// Surrogate identifier.
    pub id: i64,
    /// Unique natural key.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Canonical incident kind grouping.
    pub kind: IncidentKind,
    /// Severity tier.
    pub severity: IncidentSeverity,
}

/// A traffic observation to insert, keyed by natural keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrafficObservation {
    /// Date of the time bucket the sample belongs to.
    pub observed_date: NaiveDate,
    /// Time of day of the bucket.
    pub observed_time: NaiveTime,
    /// Zone natural key.
    pub zone_code: String,
    /// Vehicle class natural key.
    pub vehicle_class_code: String,
    /// Vehicles counted in the bucket (non-negative).
    pub vehicle_volume: i64,
    /// Average speed in km/h (0-200 inclusive).
    pub average_speed: f64,
    /// Average travel time across the zone, in seconds.
    pub travel_time_seconds: Option<i64>,
    /// Categorical congestion level.
    pub congestion_level: CongestionLevel,
    /// Numeric congestion index (>= 0, open-ended).
    pub congestion_index: f64,
    /// Identifier of the producing source system.
    pub source_system: String,
}

/// A committed `fact_traffic` row with its dimension codes joined in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficObservationRow {
    /// Surrogate identifier.
    pub id: i64,
    /// Referenced time bucket.
    pub time_bucket_id: i64,
    /// Referenced zone.
    pub zone_id: i64,
    /// Referenced vehicle class.
    pub vehicle_class_id: i64,
    /// Zone natural key (joined).
    pub zone_code: String,
    /// Vehicle class natural key (joined).
    pub vehicle_class_code: String,
    /// Start of the time bucket (joined).
    pub observed_at: NaiveDateTime,
    /// Vehicles counted.
    pub vehicle_volume: i64,
    /// Average speed in km/h.
    pub average_speed: f64,
    /// Average travel time in seconds.
    pub travel_time_seconds: Option<i64>,
    /// Categorical congestion level.
    pub congestion_level: CongestionLevel,
    /// Numeric congestion index.
    pub congestion_index: f64,
    /// Producing source system.
    pub source_system: String,
    /// When the row was committed.
    pub created_at: DateTime<Utc>,
}

/// An incident report to insert, keyed by natural keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIncidentReport {
    /// Date of the time bucket the report belongs to.
    pub observed_date: NaiveDate,
    /// Time of day of the bucket.
    pub observed_time: NaiveTime,
    /// Zone natural key.
    pub zone_code: String,
    /// Incident type natural key.
    pub incident_code: String,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// Free-text description.
    pub description: Option<String>,
    /// How much of the roadway was blocked.
    pub impact_scope: ImpactScope,
    /// Minutes until resolution, if resolved.
    pub resolution_minutes: Option<i64>,
    /// Identifier of the producing source system.
    pub source_system: String,
}

/// A committed `fact_incident` row with its dimension codes joined in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReportRow {
    /// Surrogate identifier.
    pub id: i64,
    /// Referenced time bucket.
    pub time_bucket_id: i64,
    /// Referenced zone.
    pub zone_id: i64,
    /// Referenced incident type.
    pub incident_type_id: i64,
    /// Zone natural key (joined).
    pub zone_code: String,
    /// Incident type natural key (joined).
    pub incident_code: String,
    /// Severity tier of the incident type (joined).
    pub severity: IncidentSeverity,
    /// Start of the time bucket (joined).
    pub observed_at: NaiveDateTime,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// Point geometry derived from the coordinates, as GeoJSON text.
    pub location_geojson: String,
    /// Free-text description.
    pub description: Option<String>,
    /// How much of the roadway was blocked.
    pub impact_scope: ImpactScope,
    /// Minutes until resolution, if resolved.
    pub resolution_minutes: Option<i64>,
    /// Producing source system.
    pub source_system: String,
    /// When the row was committed.
    pub created_at: DateTime<Utc>,
}

/// Parameters for querying traffic observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationQuery {
    /// Minimum bucket timestamp (inclusive).
    pub from: Option<NaiveDateTime>,
    /// Maximum bucket timestamp (inclusive).
    pub to: Option<NaiveDateTime>,
    /// Restrict to these zone codes (empty = no filter).
    pub zone_codes: Vec<String>,
    /// Restrict to these vehicle class codes (empty = no filter).
    pub vehicle_class_codes: Vec<String>,
    /// Minimum categorical congestion level.
    pub congestion_min: Option<CongestionLevel>,
    /// Maximum number of results to return.
    pub limit: u32,
    /// Number of results to skip.
    pub offset: u32,
}

impl Default for ObservationQuery {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            zone_codes: Vec::new(),
            vehicle_class_codes: Vec::new(),
            congestion_min: None,
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

/// Parameters for querying incident reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentQuery {
    /// Minimum bucket timestamp (inclusive).
    pub from: Option<NaiveDateTime>,
    /// Maximum bucket timestamp (inclusive).
    pub to: Option<NaiveDateTime>,
    /// Restrict to these zone codes (empty = no filter).
    pub zone_codes: Vec<String>,
    /// Restrict to these incident type codes (empty = no filter).
    pub incident_codes: Vec<String>,
    /// Minimum severity tier.
    pub severity_min: Option<IncidentSeverity>,
    /// Spatial bounding box filter over the report coordinates.
    pub bbox: Option<BoundingBox>,
    /// Maximum number of results to return.
    pub limit: u32,
    /// Number of results to skip.
    pub offset: u32,
}

impl Default for IncidentQuery {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            zone_codes: Vec::new(),
            incident_codes: Vec::new(),
            severity_min: None,
            bbox: None,
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

/// Lifecycle state of an ingestion run.
///
/// `PENDING -> {SUCCESS, PARTIAL, FAILED}`, write-once at the outcome
/// level.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run has started and not yet recorded a terminal outcome.
    Pending,
    /// Every processed row was accepted.
    Success,
    /// Some rows were accepted, some rejected.
    Partial,
    /// No rows were durably committed.
    Failed,
}

impl RunStatus {
    /// Returns whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Derives the terminal status implied by a run's counts.
    ///
    /// Assumes `accepted + rejected == processed`. An empty batch counts
    /// as a success.
    #[must_use]
    pub const fn for_counts(processed: u64, accepted: u64, rejected: u64) -> Self {
        if rejected == 0 {
            Self::Success
        } else if accepted == 0 && processed > 0 {
            Self::Failed
        } else {
            Self::Partial
        }
    }
}

/// An `etl_runs` row: one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionRunRow {
    /// Surrogate identifier.
    pub id: i64,
    /// Logical dataset being loaded (e.g. "`medata_incidents`").
    pub dataset_name: String,
    /// Where the batch came from (URL, file path, API name).
    pub source_descriptor: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the terminal outcome was recorded.
    pub completed_at: Option<DateTime<Utc>>,
    /// Input rows seen.
    pub records_processed: u64,
    /// Rows durably committed.
    pub records_accepted: u64,
    /// Rows rejected by per-row validation.
    pub records_rejected: u64,
    /// Current lifecycle state.
    pub status: RunStatus,
    /// Error detail for failed or partial runs.
    pub error_detail: Option<String>,
}

/// Parameters for querying ingestion runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunQuery {
    /// Restrict to this dataset.
    pub dataset_name: Option<String>,
    /// Minimum start timestamp (inclusive).
    pub started_from: Option<DateTime<Utc>>,
    /// Maximum start timestamp (inclusive).
    pub started_to: Option<DateTime<Utc>>,
}

/// An `etl_lineage` row: one transformation edge in the lineage graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEdgeRow {
    /// Table the data came from.
    pub source_table: String,
    /// Table the data was written to.
    pub destination_table: String,
    /// Free-text description of the transformation step.
    pub transformation: String,
    /// When the edge was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Actor (service or person) that performed the step.
    pub recorded_by: String,
}

/// Counts and outcome of one completed batch load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// The governance run this batch was tracked under.
    pub run_id: i64,
    /// Input rows seen.
    pub processed: u64,
    /// Rows durably committed.
    pub accepted: u64,
    /// Rows rejected by per-row validation.
    pub rejected: u64,
    /// Terminal outcome recorded for the run.
    pub status: RunStatus,
}
