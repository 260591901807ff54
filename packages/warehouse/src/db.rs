//! Warehouse connection and schema management.
//!
//! The warehouse lives in a single `DuckDB` file. Schema creation is
//! idempotent (`CREATE ... IF NOT EXISTS` throughout) and the current
//! schema version is recorded in the `_meta` table so external
//! migrations can order themselves safely.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use duckdb::Connection;

use crate::WarehouseError;

/// Version of the schema created by [`create_schema`]. Bumped by
/// migrations that add columns or catalogs.
pub const SCHEMA_VERSION: i32 = 1;

/// Timestamp format used for binding `TIMESTAMP` parameters.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Opens (or creates) the warehouse `DuckDB` at the given path and
/// ensures the schema exists.
///
/// # Errors
///
/// Returns [`WarehouseError`] if the connection or schema creation
/// fails.
pub fn open(path: &Path) -> Result<Connection, WarehouseError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| WarehouseError::Validation {
            message: format!("cannot create warehouse directory {}: {e}", parent.display()),
        })?;
    }

    let conn = Connection::open(path)?;

    conn.execute_batch("SET threads = 4; SET memory_limit = '512MB';")?;

    create_schema(&conn)?;

    Ok(conn)
}

/// Opens an in-memory warehouse with the schema created. Used by tests
/// and one-shot tooling.
///
/// # Errors
///
/// Returns [`WarehouseError`] if the connection or schema creation
/// fails.
pub fn open_in_memory() -> Result<Connection, WarehouseError> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(conn)
}

/// Creates all warehouse tables, sequences, and indexes if absent, and
/// records the schema version.
///
/// # Errors
///
/// Returns [`WarehouseError`] if any DDL statement fails.
pub fn create_schema(conn: &Connection) -> Result<(), WarehouseError> {
    conn.execute_batch(
        "CREATE SEQUENCE IF NOT EXISTS dim_time_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS dim_zone_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS dim_vehicle_class_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS dim_incident_type_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS fact_traffic_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS fact_incident_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS etl_runs_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS etl_lineage_id_seq START 1;

        CREATE TABLE IF NOT EXISTS dim_time (
            id BIGINT PRIMARY KEY DEFAULT nextval('dim_time_id_seq'),
            bucket_date DATE NOT NULL,
            bucket_time TIME NOT NULL,
            hour SMALLINT NOT NULL,
            weekday TEXT NOT NULL,
            day_of_month SMALLINT NOT NULL,
            month SMALLINT NOT NULL,
            month_name TEXT NOT NULL,
            quarter SMALLINT NOT NULL,
            year INTEGER NOT NULL,
            is_weekend BOOLEAN NOT NULL,
            is_holiday BOOLEAN NOT NULL,
            UNIQUE (bucket_date, bucket_time)
        );

        CREATE TABLE IF NOT EXISTS dim_zone (
            id BIGINT PRIMARY KEY DEFAULT nextval('dim_zone_id_seq'),
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            zone_kind TEXT NOT NULL,
            boundary_geojson TEXT,
            area_km2 DOUBLE,
            population BIGINT
        );

        CREATE TABLE IF NOT EXISTS dim_vehicle_class (
            id BIGINT PRIMARY KEY DEFAULT nextval('dim_vehicle_class_id_seq'),
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            category TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dim_incident_type (
            id BIGINT PRIMARY KEY DEFAULT nextval('dim_incident_type_id_seq'),
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            severity SMALLINT NOT NULL CHECK (severity BETWEEN 1 AND 3)
        );

        CREATE TABLE IF NOT EXISTS fact_traffic (
            id BIGINT PRIMARY KEY DEFAULT nextval('fact_traffic_id_seq'),
            time_id BIGINT NOT NULL,
            zone_id BIGINT NOT NULL,
            vehicle_class_id BIGINT NOT NULL,
            vehicle_volume BIGINT NOT NULL CHECK (vehicle_volume >= 0),
            average_speed DOUBLE NOT NULL CHECK (average_speed BETWEEN 0 AND 200),
            travel_time_seconds BIGINT CHECK (travel_time_seconds IS NULL OR travel_time_seconds >= 0),
            congestion_level TEXT NOT NULL,
            congestion_index DOUBLE NOT NULL CHECK (congestion_index >= 0),
            source_system TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fact_incident (
            id BIGINT PRIMARY KEY DEFAULT nextval('fact_incident_id_seq'),
            time_id BIGINT NOT NULL,
            zone_id BIGINT NOT NULL,
            incident_type_id BIGINT NOT NULL,
            latitude DOUBLE NOT NULL CHECK (latitude BETWEEN -90 AND 90),
            longitude DOUBLE NOT NULL CHECK (longitude BETWEEN -180 AND 180),
            location_geojson TEXT NOT NULL,
            description TEXT,
            impact_scope TEXT NOT NULL,
            resolution_minutes BIGINT CHECK (resolution_minutes IS NULL OR resolution_minutes >= 0),
            source_system TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS etl_runs (
            id BIGINT PRIMARY KEY DEFAULT nextval('etl_runs_id_seq'),
            dataset_name TEXT NOT NULL,
            source_descriptor TEXT NOT NULL,
            started_at TIMESTAMP NOT NULL,
            completed_at TIMESTAMP,
            records_processed BIGINT NOT NULL DEFAULT 0,
            records_accepted BIGINT NOT NULL DEFAULT 0,
            records_rejected BIGINT NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            error_detail TEXT,
            CHECK (records_accepted + records_rejected <= records_processed)
        );

        CREATE TABLE IF NOT EXISTS etl_lineage (
            id BIGINT PRIMARY KEY DEFAULT nextval('etl_lineage_id_seq'),
            source_table TEXT NOT NULL,
            destination_table TEXT NOT NULL,
            transformation TEXT NOT NULL,
            recorded_at TIMESTAMP NOT NULL,
            recorded_by TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS _meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_fact_traffic_time_zone
            ON fact_traffic (time_id, zone_id);
        CREATE INDEX IF NOT EXISTS idx_fact_incident_time_zone
            ON fact_incident (time_id, zone_id);
        CREATE INDEX IF NOT EXISTS idx_etl_runs_dataset
            ON etl_runs (dataset_name, started_at);",
    )?;

    // Insert-if-absent so an existing store keeps the version its
    // migrations last wrote.
    conn.execute(
        "INSERT INTO _meta (key, value) VALUES ('schema_version', ?)
         ON CONFLICT (key) DO NOTHING",
        duckdb::params![SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Returns the schema version recorded in the store.
///
/// # Errors
///
/// Returns [`WarehouseError`] if the version is missing or unreadable.
pub fn schema_version(conn: &Connection) -> Result<i32, WarehouseError> {
    let value = get_meta(conn, "schema_version")?.ok_or_else(|| WarehouseError::Conversion {
        message: "schema_version missing from _meta".to_string(),
    })?;
    value.parse().map_err(|_| WarehouseError::Conversion {
        message: format!("unparseable schema_version: {value:?}"),
    })
}

/// Gets a metadata value from the `_meta` table.
///
/// # Errors
///
/// Returns [`WarehouseError`] if the query fails.
pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, WarehouseError> {
    let mut stmt = conn.prepare("SELECT value FROM _meta WHERE key = ?")?;
    match stmt.query_row([key], |row| row.get(0)) {
        Ok(v) => Ok(Some(v)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(WarehouseError::Storage(e)),
    }
}

/// Sets a metadata value in the `_meta` table.
///
/// # Errors
///
/// Returns [`WarehouseError`] if the upsert fails.
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), WarehouseError> {
    conn.execute(
        "INSERT INTO _meta (key, value) VALUES (?, ?)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        duckdb::params![key, value],
    )?;
    Ok(())
}

/// Returns the number of rows in the named warehouse table.
///
/// # Errors
///
/// Returns [`WarehouseError`] if the table name is not part of the
/// schema or the query fails.
pub fn table_count(conn: &Connection, table: &str) -> Result<u64, WarehouseError> {
    // Guard against arbitrary identifiers reaching the SQL string.
    const TABLES: &[&str] = &[
        "dim_time",
        "dim_zone",
        "dim_vehicle_class",
        "dim_incident_type",
        "fact_traffic",
        "fact_incident",
        "etl_runs",
        "etl_lineage",
    ];
    if !TABLES.contains(&table) {
        return Err(WarehouseError::Validation {
            message: format!("unknown table: {table}"),
        });
    }

    let mut stmt = conn.prepare(&format!("SELECT COUNT(*) FROM {table}"))?;
    let count: i64 = stmt.query_row([], |row| row.get(0))?;
    #[allow(clippy::cast_sign_loss)]
    Ok(count as u64)
}

/// Runs `f` inside a transaction, committing on success and rolling
/// back on error.
///
/// Each fact insert (foreign-key resolution plus the row write) runs
/// through here so a failed constraint leaves nothing behind.
pub(crate) fn in_transaction<T, F>(conn: &Connection, f: F) -> Result<T, WarehouseError>
where
    F: FnOnce(&Connection) -> Result<T, WarehouseError>,
{
    conn.execute_batch("BEGIN TRANSACTION")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                log::error!("Rollback failed after {e}: {rollback_err}");
            }
            Err(e)
        }
    }
}

/// Formats a UTC timestamp for binding as a `TIMESTAMP` parameter.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.naive_utc().format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a `DuckDB` timestamp text representation into a UTC datetime.
///
/// `DuckDB`'s `::TEXT` cast can produce several formats depending on the
/// stored precision (with/without fractional seconds, with/without
/// timezone); this tries them in order.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }

    parse_naive_datetime(s).map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

/// Parses a `DuckDB` timestamp text representation without a timezone.
pub(crate) fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive);
    }

    log::warn!("Failed to parse timestamp: {s:?}");
    None
}

/// Parses a `DuckDB` `DATE::TEXT` value.
pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Parses a `DuckDB` `TIME::TEXT` value.
pub(crate) fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S%.f"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creation_is_idempotent() {
        let conn = open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        create_schema(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn meta_roundtrip() {
        let conn = open_in_memory().unwrap();
        assert_eq!(get_meta(&conn, "absent").unwrap(), None);
        set_meta(&conn, "k", "v1").unwrap();
        set_meta(&conn, "k", "v2").unwrap();
        assert_eq!(get_meta(&conn, "k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn table_count_rejects_unknown_table() {
        let conn = open_in_memory().unwrap();
        assert_eq!(table_count(&conn, "dim_time").unwrap(), 0);
        assert!(table_count(&conn, "os_tables; DROP TABLE dim_time").is_err());
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let conn = open_in_memory().unwrap();
        let result: Result<(), WarehouseError> = in_transaction(&conn, |c| {
            c.execute(
                "INSERT INTO _meta (key, value) VALUES ('tx', 'x')",
                duckdb::params![],
            )?;
            Err(WarehouseError::Validation {
                message: "boom".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(get_meta(&conn, "tx").unwrap(), None);
    }

    #[test]
    fn timestamp_text_roundtrip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&format_timestamp(now)).unwrap();
        assert!((parsed - now).num_milliseconds().abs() < 10);
    }
}
