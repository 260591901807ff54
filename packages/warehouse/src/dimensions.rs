//! Dimension store: time buckets and the zone / vehicle-class /
//! incident-type catalogs.
//!
//! Seeding is idempotent by construction: every create path is an
//! insert-if-absent (`ON CONFLICT DO NOTHING`) against the dimension's
//! natural key, so replayed extracts and racing workers converge on one
//! row per key. Surrogate identifiers are sequence-assigned, stable
//! once created, and never reused.

use chrono::{Datelike as _, Duration, NaiveDate, NaiveTime};
use duckdb::Connection;
use mobility_map_spatial::SpatialIndex;
use mobility_map_transit_models::{IncidentKind, VehicleKind, ZoneKind};
use mobility_map_warehouse_models::{CatalogEntry, CatalogKind, TimeBucketRow, ZoneRow};

use crate::WarehouseError;

/// Fixed-date Colombian national holidays as (month, day).
///
/// Movable (Emiliani law) holidays are a catalog concern for a future
/// schema version.
const FIXED_HOLIDAYS: &[(u32, u32)] = &[
    (1, 1),   // Año Nuevo
    (5, 1),   // Día del Trabajo
    (7, 20),  // Día de la Independencia
    (8, 7),   // Batalla de Boyacá
    (12, 8),  // Inmaculada Concepción
    (12, 25), // Navidad
];

/// Minutes in a day; seeding granularity must divide this evenly.
const MINUTES_PER_DAY: u32 = 1_440;

/// Idempotently creates one time bucket per (date, time-of-day) pair in
/// the inclusive date range at the given granularity.
///
/// Returns the number of newly created rows; re-invocation over an
/// overlapping range creates no duplicates and counts only genuinely
/// new buckets.
///
/// # Errors
///
/// Returns [`WarehouseError::Validation`] if the granularity does not
/// evenly divide a day or the range is inverted, and
/// [`WarehouseError::Storage`] on database failure.
pub fn ensure_time_buckets(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
    granularity_minutes: u32,
) -> Result<u64, WarehouseError> {
    if granularity_minutes == 0 || !MINUTES_PER_DAY.is_multiple_of(granularity_minutes) {
        return Err(WarehouseError::Validation {
            message: format!(
                "granularity of {granularity_minutes} minutes does not evenly divide a day"
            ),
        });
    }
    if from > to {
        return Err(WarehouseError::Validation {
            message: format!("inverted date range: {from} > {to}"),
        });
    }

    let buckets_per_day = MINUTES_PER_DAY / granularity_minutes;
    let mut created = 0u64;

    let mut date = from;
    while date <= to {
        let mut sql = String::from(
            "INSERT INTO dim_time (
                bucket_date, bucket_time, hour, weekday, day_of_month,
                month, month_name, quarter, year, is_weekend, is_holiday
            ) VALUES ",
        );
        for i in 0..buckets_per_day {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str("(CAST(? AS DATE), CAST(? AS TIME), ?, ?, ?, ?, ?, ?, ?, ?, ?)");
        }
        sql.push_str(" ON CONFLICT (bucket_date, bucket_time) DO NOTHING");

        let date_str = date.format("%Y-%m-%d").to_string();
        let weekday = date.format("%A").to_string();
        let month_name = date.format("%B").to_string();
        #[allow(clippy::cast_possible_wrap)]
        let quarter = (date.month0() / 3 + 1) as i32;
        let is_weekend = matches!(
            date.weekday(),
            chrono::Weekday::Sat | chrono::Weekday::Sun
        );
        let is_holiday = FIXED_HOLIDAYS.contains(&(date.month(), date.day()));

        let mut stmt = conn.prepare(&sql)?;
        let mut param_idx = 1usize;

        for i in 0..buckets_per_day {
            let time = NaiveTime::MIN
                .overflowing_add_signed(Duration::minutes(i64::from(i * granularity_minutes)))
                .0;
            let time_str = time.format("%H:%M:%S").to_string();
            #[allow(clippy::cast_possible_wrap)]
            let hour = (i * granularity_minutes / 60) as i32;

            stmt.raw_bind_parameter(param_idx, &date_str)?;
            stmt.raw_bind_parameter(param_idx + 1, time_str)?;
            stmt.raw_bind_parameter(param_idx + 2, hour)?;
            stmt.raw_bind_parameter(param_idx + 3, &weekday)?;
            #[allow(clippy::cast_possible_wrap)]
            stmt.raw_bind_parameter(param_idx + 4, date.day() as i32)?;
            #[allow(clippy::cast_possible_wrap)]
            stmt.raw_bind_parameter(param_idx + 5, date.month() as i32)?;
            stmt.raw_bind_parameter(param_idx + 6, &month_name)?;
            stmt.raw_bind_parameter(param_idx + 7, quarter)?;
            stmt.raw_bind_parameter(param_idx + 8, date.year())?;
            stmt.raw_bind_parameter(param_idx + 9, is_weekend)?;
            stmt.raw_bind_parameter(param_idx + 10, is_holiday)?;

            param_idx += 11;
        }

        let rows = stmt.raw_execute()?;
        created += u64::try_from(rows).unwrap_or(0);

        let Some(next) = date.succ_opt() else { break };
        date = next;
    }

    Ok(created)
}

/// Looks up the surrogate id of the time bucket for a (date, time) pair.
///
/// # Errors
///
/// Returns [`WarehouseError::NotFound`] if the bucket has not been
/// seeded.
pub fn lookup_time_bucket(
    conn: &Connection,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<i64, WarehouseError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM dim_time
         WHERE bucket_date = CAST(? AS DATE) AND bucket_time = CAST(? AS TIME)",
    )?;
    let date_str = date.format("%Y-%m-%d").to_string();
    let time_str = time.format("%H:%M:%S").to_string();

    match stmt.query_row([&date_str, &time_str], |row| row.get(0)) {
        Ok(id) => Ok(id),
        Err(duckdb::Error::QueryReturnedNoRows) => Err(WarehouseError::NotFound {
            entity: "time bucket".to_string(),
            key: format!("{date_str} {time_str}"),
        }),
        Err(e) => Err(WarehouseError::Storage(e)),
    }
}

/// Fetches the full time bucket row for a (date, time) pair.
///
/// # Errors
///
/// Returns [`WarehouseError::NotFound`] if the bucket has not been
/// seeded.
pub fn time_bucket(
    conn: &Connection,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<TimeBucketRow, WarehouseError> {
    let mut stmt = conn.prepare(
        "SELECT id, bucket_date::TEXT, bucket_time::TEXT, hour, weekday,
                day_of_month, month, month_name, quarter, year,
                is_weekend, is_holiday
         FROM dim_time
         WHERE bucket_date = CAST(? AS DATE) AND bucket_time = CAST(? AS TIME)",
    )?;
    let date_str = date.format("%Y-%m-%d").to_string();
    let time_str = time.format("%H:%M:%S").to_string();

    let raw = stmt.query_row([&date_str, &time_str], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i32>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, i32>(5)?,
            row.get::<_, i32>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, i32>(8)?,
            row.get::<_, i32>(9)?,
            row.get::<_, bool>(10)?,
            row.get::<_, bool>(11)?,
        ))
    });

    match raw {
        Ok((id, d, t, hour, weekday, day, month, month_name, quarter, year, weekend, holiday)) => {
            Ok(TimeBucketRow {
                id,
                bucket_date: crate::db::parse_date(&d).ok_or_else(|| {
                    WarehouseError::Conversion {
                        message: format!("unparseable bucket_date: {d:?}"),
                    }
                })?,
                bucket_time: crate::db::parse_time(&t).ok_or_else(|| {
                    WarehouseError::Conversion {
                        message: format!("unparseable bucket_time: {t:?}"),
                    }
                })?,
                hour: u8::try_from(hour).unwrap_or(0),
                weekday,
                day_of_month: u8::try_from(day).unwrap_or(0),
                month: u8::try_from(month).unwrap_or(0),
                month_name,
                quarter: u8::try_from(quarter).unwrap_or(0),
                year,
                is_weekend: weekend,
                is_holiday: holiday,
            })
        }
        Err(duckdb::Error::QueryReturnedNoRows) => Err(WarehouseError::NotFound {
            entity: "time bucket".to_string(),
            key: format!("{date_str} {time_str}"),
        }),
        Err(e) => Err(WarehouseError::Storage(e)),
    }
}

/// Creates or updates one catalog entry keyed by its natural code.
///
/// Without `replace`, an existing code is a [`WarehouseError::Conflict`]
/// — callers must opt in to overwriting catalog attributes. With
/// `replace`, non-key attributes are overwritten and the surrogate id is
/// preserved. Zone boundaries are validated before the write and the
/// spatial index is updated in the same call.
///
/// Returns the entry's surrogate id.
///
/// # Errors
///
/// Returns [`WarehouseError`] on conflict, invalid geometry, or
/// database failure.
pub fn upsert_catalog_entry(
    conn: &Connection,
    index: &mut SpatialIndex,
    entry: &CatalogEntry,
    replace: bool,
) -> Result<i64, WarehouseError> {
    let kind = entry.kind();
    let code = entry.code().to_string();

    // Validate zone geometry before anything is written.
    let zone_polygon = match entry {
        CatalogEntry::Zone(spec) => match &spec.boundary_geojson {
            Some(geojson) => Some(mobility_map_spatial::validate_polygon(geojson)?),
            None => None,
        },
        CatalogEntry::VehicleClass(_) | CatalogEntry::IncidentType(_) => None,
    };

    let affected = match entry {
        CatalogEntry::Zone(spec) => {
            let sql = if replace {
                "INSERT INTO dim_zone (code, name, zone_kind, boundary_geojson, area_km2, population)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT (code) DO UPDATE SET
                     name = EXCLUDED.name,
                     zone_kind = EXCLUDED.zone_kind,
                     boundary_geojson = EXCLUDED.boundary_geojson,
                     area_km2 = EXCLUDED.area_km2,
                     population = EXCLUDED.population"
            } else {
                "INSERT INTO dim_zone (code, name, zone_kind, boundary_geojson, area_km2, population)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT (code) DO NOTHING"
            };
            conn.execute(
                sql,
                duckdb::params![
                    spec.code,
                    spec.name,
                    spec.kind.as_ref(),
                    spec.boundary_geojson,
                    spec.area_km2,
                    spec.population,
                ],
            )?
        }
        CatalogEntry::VehicleClass(spec) => {
            let sql = if replace {
                "INSERT INTO dim_vehicle_class (code, name, category)
                 VALUES (?, ?, ?)
                 ON CONFLICT (code) DO UPDATE SET
                     name = EXCLUDED.name,
                     category = EXCLUDED.category"
            } else {
                "INSERT INTO dim_vehicle_class (code, name, category)
                 VALUES (?, ?, ?)
                 ON CONFLICT (code) DO NOTHING"
            };
            conn.execute(
                sql,
                duckdb::params![spec.code, spec.name, spec.category.as_ref()],
            )?
        }
        CatalogEntry::IncidentType(spec) => {
            let sql = if replace {
                "INSERT INTO dim_incident_type (code, name, kind, severity)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (code) DO UPDATE SET
                     name = EXCLUDED.name,
                     kind = EXCLUDED.kind,
                     severity = EXCLUDED.severity"
            } else {
                "INSERT INTO dim_incident_type (code, name, kind, severity)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (code) DO NOTHING"
            };
            conn.execute(
                sql,
                duckdb::params![
                    spec.code,
                    spec.name,
                    spec.kind.as_ref(),
                    i32::from(spec.severity.value()),
                ],
            )?
        }
    };

    if affected == 0 && !replace {
        return Err(WarehouseError::Conflict { kind, code });
    }

    let id = lookup(conn, kind, &code)?;

    if kind == CatalogKind::Zone {
        index.replace_zone(id, zone_polygon);
    }

    Ok(id)
}

/// Resolves a catalog code to its surrogate id.
///
/// # Errors
///
/// Returns [`WarehouseError::NotFound`] if no row matches.
pub fn lookup(conn: &Connection, kind: CatalogKind, code: &str) -> Result<i64, WarehouseError> {
    let table = catalog_table(kind);
    let mut stmt = conn.prepare(&format!("SELECT id FROM {table} WHERE code = ?"))?;

    match stmt.query_row([code], |row| row.get(0)) {
        Ok(id) => Ok(id),
        Err(duckdb::Error::QueryReturnedNoRows) => Err(WarehouseError::NotFound {
            entity: kind.to_string(),
            key: code.to_string(),
        }),
        Err(e) => Err(WarehouseError::Storage(e)),
    }
}

/// Seeds the vehicle-class and incident-type catalogs from the canonical
/// taxonomy, insert-if-absent. Returns the number of newly created rows.
///
/// # Errors
///
/// Returns [`WarehouseError`] on database failure.
pub fn seed_default_catalogs(conn: &Connection) -> Result<u64, WarehouseError> {
    let mut created = 0u64;

    for kind in VehicleKind::all() {
        let affected = conn.execute(
            "INSERT INTO dim_vehicle_class (code, name, category)
             VALUES (?, ?, ?)
             ON CONFLICT (code) DO NOTHING",
            duckdb::params![kind.code(), kind.display_name(), kind.category().as_ref()],
        )?;
        created += affected as u64;
    }

    for kind in IncidentKind::all() {
        let affected = conn.execute(
            "INSERT INTO dim_incident_type (code, name, kind, severity)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (code) DO NOTHING",
            duckdb::params![
                kind.code(),
                kind.display_name(),
                kind.as_ref(),
                i32::from(kind.default_severity().value()),
            ],
        )?;
        created += affected as u64;
    }

    Ok(created)
}

/// Returns all zone rows ordered by code.
///
/// # Errors
///
/// Returns [`WarehouseError`] on database failure or undecodable rows.
pub fn all_zones(conn: &Connection) -> Result<Vec<ZoneRow>, WarehouseError> {
    let mut stmt = conn.prepare(
        "SELECT id, code, name, zone_kind, boundary_geojson, area_km2, population
         FROM dim_zone ORDER BY code",
    )?;
    let mut rows = stmt.query([])?;

    let mut zones = Vec::new();
    while let Some(row) = rows.next()? {
        let kind_text: String = row.get(3)?;
        let kind = kind_text
            .parse::<ZoneKind>()
            .map_err(|_| WarehouseError::Conversion {
                message: format!("unknown zone kind: {kind_text:?}"),
            })?;
        zones.push(ZoneRow {
            id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            kind,
            boundary_geojson: row.get(4)?,
            area_km2: row.get(5)?,
            population: row.get(6)?,
        });
    }

    Ok(zones)
}

/// Maps a catalog kind to its dimension table.
const fn catalog_table(kind: CatalogKind) -> &'static str {
    match kind {
        CatalogKind::Zone => "dim_zone",
        CatalogKind::VehicleClass => "dim_vehicle_class",
        CatalogKind::IncidentType => "dim_incident_type",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use mobility_map_transit_models::VehicleCategory;
    use mobility_map_warehouse_models::{VehicleClassSpec, ZoneSpec};

    const SQUARE: &str = r#"{"type":"Polygon","coordinates":[[[-75.6,6.2],[-75.5,6.2],[-75.5,6.3],[-75.6,6.3],[-75.6,6.2]]]}"#;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn hourly_seeding_is_idempotent() {
        let conn = db::open_in_memory().unwrap();
        let day = date("2026-01-13");

        let first = ensure_time_buckets(&conn, day, day, 60).unwrap();
        assert_eq!(first, 24);

        let second = ensure_time_buckets(&conn, day, day, 60).unwrap();
        assert_eq!(second, 0);
        assert_eq!(db::table_count(&conn, "dim_time").unwrap(), 24);
    }

    #[test]
    fn overlapping_range_creates_only_new_buckets() {
        let conn = db::open_in_memory().unwrap();
        ensure_time_buckets(&conn, date("2026-01-13"), date("2026-01-14"), 60).unwrap();
        let added =
            ensure_time_buckets(&conn, date("2026-01-14"), date("2026-01-15"), 60).unwrap();
        assert_eq!(added, 24);
        assert_eq!(db::table_count(&conn, "dim_time").unwrap(), 72);
    }

    #[test]
    fn rejects_granularity_not_dividing_a_day() {
        let conn = db::open_in_memory().unwrap();
        let day = date("2026-01-13");
        assert!(matches!(
            ensure_time_buckets(&conn, day, day, 7),
            Err(WarehouseError::Validation { .. })
        ));
        assert!(matches!(
            ensure_time_buckets(&conn, day, day, 0),
            Err(WarehouseError::Validation { .. })
        ));
    }

    #[test]
    fn rejects_inverted_range() {
        let conn = db::open_in_memory().unwrap();
        assert!(matches!(
            ensure_time_buckets(&conn, date("2026-01-14"), date("2026-01-13"), 60),
            Err(WarehouseError::Validation { .. })
        ));
    }

    #[test]
    fn derives_calendar_attributes() {
        let conn = db::open_in_memory().unwrap();
        // 2026-07-20 is Colombian Independence Day and a Monday.
        ensure_time_buckets(&conn, date("2026-07-20"), date("2026-07-20"), 60).unwrap();

        let row = time_bucket(&conn, date("2026-07-20"), "08:00:00".parse().unwrap()).unwrap();
        assert_eq!(row.weekday, "Monday");
        assert_eq!(row.hour, 8);
        assert_eq!(row.month_name, "July");
        assert_eq!(row.quarter, 3);
        assert_eq!(row.year, 2026);
        assert!(row.is_holiday);
        assert!(!row.is_weekend);
    }

    #[test]
    fn weekend_flag_set_on_saturdays() {
        let conn = db::open_in_memory().unwrap();
        // 2026-01-17 is a Saturday.
        ensure_time_buckets(&conn, date("2026-01-17"), date("2026-01-17"), 720).unwrap();
        let row = time_bucket(&conn, date("2026-01-17"), "12:00:00".parse().unwrap()).unwrap();
        assert!(row.is_weekend);
        assert!(!row.is_holiday);
    }

    #[test]
    fn lookup_time_bucket_miss_is_not_found() {
        let conn = db::open_in_memory().unwrap();
        assert!(matches!(
            lookup_time_bucket(&conn, date("2026-01-13"), "08:00:00".parse().unwrap()),
            Err(WarehouseError::NotFound { .. })
        ));
    }

    #[test]
    fn catalog_upsert_conflicts_without_replace() {
        let conn = db::open_in_memory().unwrap();
        let mut index = SpatialIndex::new();
        let entry = CatalogEntry::VehicleClass(VehicleClassSpec {
            code: "BUS".to_string(),
            name: "Bus".to_string(),
            category: VehicleCategory::PublicTransit,
        });

        let id = upsert_catalog_entry(&conn, &mut index, &entry, false).unwrap();
        assert!(matches!(
            upsert_catalog_entry(&conn, &mut index, &entry, false),
            Err(WarehouseError::Conflict { .. })
        ));

        // Replace preserves the surrogate id while rewriting attributes.
        let renamed = CatalogEntry::VehicleClass(VehicleClassSpec {
            code: "BUS".to_string(),
            name: "Articulated bus".to_string(),
            category: VehicleCategory::PublicTransit,
        });
        let same_id = upsert_catalog_entry(&conn, &mut index, &renamed, true).unwrap();
        assert_eq!(id, same_id);
        assert_eq!(lookup(&conn, CatalogKind::VehicleClass, "BUS").unwrap(), id);
    }

    #[test]
    fn lookup_miss_is_not_found() {
        let conn = db::open_in_memory().unwrap();
        assert!(matches!(
            lookup(&conn, CatalogKind::Zone, "NOWHERE"),
            Err(WarehouseError::NotFound { .. })
        ));
    }

    #[test]
    fn zone_upsert_validates_geometry_and_feeds_index() {
        let conn = db::open_in_memory().unwrap();
        let mut index = SpatialIndex::new();

        let zone = CatalogEntry::Zone(ZoneSpec {
            code: "COMUNA_10".to_string(),
            name: "La Candelaria".to_string(),
            kind: ZoneKind::Administrative,
            boundary_geojson: Some(SQUARE.to_string()),
            area_km2: Some(7.4),
            population: Some(85_000),
        });
        let id = upsert_catalog_entry(&conn, &mut index, &zone, false).unwrap();
        assert_eq!(index.zone_count(), 1);
        assert_eq!(index.locate_zone(-75.55, 6.25), Some(id));

        let bowtie = CatalogEntry::Zone(ZoneSpec {
            code: "BAD".to_string(),
            name: "Bad".to_string(),
            kind: ZoneKind::Other,
            boundary_geojson: Some(
                r#"{"type":"Polygon","coordinates":[[[0.0,0.0],[1.0,1.0],[1.0,0.0],[0.0,1.0],[0.0,0.0]]]}"#
                    .to_string(),
            ),
            area_km2: None,
            population: None,
        });
        assert!(matches!(
            upsert_catalog_entry(&conn, &mut index, &bowtie, false),
            Err(WarehouseError::Geometry(_))
        ));
        // Nothing written for the rejected zone.
        assert!(matches!(
            lookup(&conn, CatalogKind::Zone, "BAD"),
            Err(WarehouseError::NotFound { .. })
        ));
    }

    #[test]
    fn default_catalog_seeding_is_idempotent() {
        let conn = db::open_in_memory().unwrap();
        let first = seed_default_catalogs(&conn).unwrap();
        assert_eq!(first, 10); // 5 vehicle classes + 5 incident types
        assert_eq!(seed_default_catalogs(&conn).unwrap(), 0);

        let id = lookup(&conn, CatalogKind::IncidentType, "ACCIDENT").unwrap();
        assert!(id > 0);
    }
}
