//! Fact store: append-only traffic observations and incident reports.
//!
//! Every insert resolves its foreign keys through dimension lookups and
//! never auto-creates missing dimension rows. Value domains are checked
//! before the write and again by storage CHECK constraints; each insert
//! runs in one transaction so a late failure leaves nothing behind.
//!
//! Corrections are new rows with a newer `created_at`; no update path
//! exists.

use chrono::Utc;
use duckdb::Connection;
use mobility_map_spatial::SpatialIndex;
use mobility_map_transit_models::{CongestionLevel, ImpactScope, IncidentSeverity};
use mobility_map_warehouse_models::{
    CatalogKind, IncidentQuery, IncidentReportRow, NewIncidentReport, NewTrafficObservation,
    ObservationQuery, TrafficObservationRow,
};

use crate::{WarehouseError, db, dimensions};

/// Maximum plausible average speed in km/h.
const MAX_AVERAGE_SPEED: f64 = 200.0;

/// Inserts one traffic observation and returns its surrogate id.
///
/// # Errors
///
/// Returns [`WarehouseError::Domain`] for out-of-range measures,
/// [`WarehouseError::Referential`] when a natural key does not resolve,
/// and [`WarehouseError::Storage`] on database failure.
pub fn insert_traffic_observation(
    conn: &Connection,
    record: &NewTrafficObservation,
) -> Result<i64, WarehouseError> {
    check_traffic_domains(record)?;

    db::in_transaction(conn, |conn| {
        let time_id = resolve_time_bucket(conn, record.observed_date, record.observed_time)?;
        let zone_id = resolve_dimension(conn, CatalogKind::Zone, &record.zone_code)?;
        let vehicle_class_id =
            resolve_dimension(conn, CatalogKind::VehicleClass, &record.vehicle_class_code)?;

        let mut stmt = conn.prepare(
            "INSERT INTO fact_traffic (
                time_id, zone_id, vehicle_class_id, vehicle_volume,
                average_speed, travel_time_seconds, congestion_level,
                congestion_index, source_system, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))
            RETURNING id",
        )?;
        let id = stmt.query_row(
            duckdb::params![
                time_id,
                zone_id,
                vehicle_class_id,
                record.vehicle_volume,
                record.average_speed,
                record.travel_time_seconds,
                record.congestion_level.as_ref(),
                record.congestion_index,
                record.source_system,
                db::format_timestamp(Utc::now()),
            ],
            |row| row.get(0),
        )?;

        log::debug!(
            "Committed traffic observation {id} for zone {}",
            record.zone_code
        );
        Ok(id)
    })
}

/// Inserts one incident report and returns its surrogate id.
///
/// The point geometry is derived from the scalar coordinates inside the
/// same transaction, so the two can never disagree. The spatial index is
/// updated only after the row commits.
///
/// # Errors
///
/// Returns [`WarehouseError::Geometry`] for out-of-range coordinates,
/// [`WarehouseError::Domain`] for negative resolution times,
/// [`WarehouseError::Referential`] when a natural key does not resolve,
/// and [`WarehouseError::Storage`] on database failure.
pub fn insert_incident_report(
    conn: &Connection,
    index: &mut SpatialIndex,
    record: &NewIncidentReport,
) -> Result<i64, WarehouseError> {
    mobility_map_spatial::validate_point(record.latitude, record.longitude)?;
    if let Some(minutes) = record.resolution_minutes
        && minutes < 0
    {
        return Err(WarehouseError::Domain {
            message: format!("resolution_minutes {minutes} is negative"),
        });
    }

    let location_geojson = mobility_map_spatial::derive_point(record.latitude, record.longitude)?;

    let id = db::in_transaction(conn, |conn| {
        let time_id = resolve_time_bucket(conn, record.observed_date, record.observed_time)?;
        let zone_id = resolve_dimension(conn, CatalogKind::Zone, &record.zone_code)?;
        let incident_type_id =
            resolve_dimension(conn, CatalogKind::IncidentType, &record.incident_code)?;

        let mut stmt = conn.prepare(
            "INSERT INTO fact_incident (
                time_id, zone_id, incident_type_id, latitude, longitude,
                location_geojson, description, impact_scope,
                resolution_minutes, source_system, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))
            RETURNING id",
        )?;
        let id = stmt.query_row(
            duckdb::params![
                time_id,
                zone_id,
                incident_type_id,
                record.latitude,
                record.longitude,
                location_geojson,
                record.description,
                record.impact_scope.as_ref(),
                record.resolution_minutes,
                record.source_system,
                db::format_timestamp(Utc::now()),
            ],
            |row| row.get(0),
        )?;

        log::debug!(
            "Committed incident report {id} for zone {}",
            record.zone_code
        );
        Ok(id)
    })?;

    // Coordinates were validated above, so this cannot fail.
    index
        .insert_incident(id, record.latitude, record.longitude)
        .map_err(WarehouseError::Geometry)?;

    Ok(id)
}

/// Queries committed traffic observations.
///
/// Results are ordered by time bucket, then creation timestamp, then id.
///
/// # Errors
///
/// Returns [`WarehouseError`] on database failure or undecodable rows.
pub fn query_observations(
    conn: &Connection,
    filter: &ObservationQuery,
) -> Result<Vec<TrafficObservationRow>, WarehouseError> {
    let mut sql = String::from(
        "SELECT f.id, f.time_id, f.zone_id, f.vehicle_class_id,
                z.code, v.code,
                (t.bucket_date + t.bucket_time)::TEXT,
                f.vehicle_volume, f.average_speed, f.travel_time_seconds,
                f.congestion_level, f.congestion_index, f.source_system,
                f.created_at::TEXT
         FROM fact_traffic f
         JOIN dim_time t ON t.id = f.time_id
         JOIN dim_zone z ON z.id = f.zone_id
         JOIN dim_vehicle_class v ON v.id = f.vehicle_class_id
         WHERE 1 = 1",
    );
    let mut params: Vec<String> = Vec::new();

    if let Some(from) = filter.from {
        sql.push_str(" AND (t.bucket_date + t.bucket_time) >= CAST(? AS TIMESTAMP)");
        params.push(from.format(db::TIMESTAMP_FORMAT).to_string());
    }
    if let Some(to) = filter.to {
        sql.push_str(" AND (t.bucket_date + t.bucket_time) <= CAST(? AS TIMESTAMP)");
        params.push(to.format(db::TIMESTAMP_FORMAT).to_string());
    }
    push_in_clause(&mut sql, &mut params, "z.code", &filter.zone_codes);
    push_in_clause(&mut sql, &mut params, "v.code", &filter.vehicle_class_codes);
    if let Some(min) = filter.congestion_min {
        // Levels are stored as text, so the ordered filter becomes a set.
        let allowed: Vec<String> = CongestionLevel::all()
            .iter()
            .filter(|level| **level >= min)
            .map(|level| level.as_ref().to_string())
            .collect();
        push_in_clause(&mut sql, &mut params, "f.congestion_level", &allowed);
    }

    sql.push_str(" ORDER BY t.bucket_date, t.bucket_time, f.created_at, f.id");
    sql.push_str(&format!(" LIMIT {} OFFSET {}", filter.limit, filter.offset));

    let mut stmt = conn.prepare(&sql)?;
    for (i, value) in params.iter().enumerate() {
        stmt.raw_bind_parameter(i + 1, value)?;
    }
    let mut rows = stmt.raw_query();

    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        let observed_at_text: String = row.get(6)?;
        let level_text: String = row.get(10)?;
        let created_text: String = row.get(13)?;

        results.push(TrafficObservationRow {
            id: row.get(0)?,
            time_bucket_id: row.get(1)?,
            zone_id: row.get(2)?,
            vehicle_class_id: row.get(3)?,
            zone_code: row.get(4)?,
            vehicle_class_code: row.get(5)?,
            observed_at: db::parse_naive_datetime(&observed_at_text).ok_or_else(|| {
                WarehouseError::Conversion {
                    message: format!("unparseable observed_at: {observed_at_text:?}"),
                }
            })?,
            vehicle_volume: row.get(7)?,
            average_speed: row.get(8)?,
            travel_time_seconds: row.get(9)?,
            congestion_level: level_text.parse().map_err(|_| WarehouseError::Conversion {
                message: format!("unknown congestion level: {level_text:?}"),
            })?,
            congestion_index: row.get(11)?,
            source_system: row.get(12)?,
            created_at: db::parse_timestamp(&created_text).ok_or_else(|| {
                WarehouseError::Conversion {
                    message: format!("unparseable created_at: {created_text:?}"),
                }
            })?,
        });
    }

    Ok(results)
}

/// Queries committed incident reports.
///
/// Results are ordered by time bucket, then creation timestamp, then id.
///
/// # Errors
///
/// Returns [`WarehouseError`] on database failure or undecodable rows.
pub fn query_incidents(
    conn: &Connection,
    filter: &IncidentQuery,
) -> Result<Vec<IncidentReportRow>, WarehouseError> {
    let mut sql = String::from(
        "SELECT f.id, f.time_id, f.zone_id, f.incident_type_id,
                z.code, i.code, i.severity,
                (t.bucket_date + t.bucket_time)::TEXT,
                f.latitude, f.longitude, f.location_geojson,
                f.description, f.impact_scope, f.resolution_minutes,
                f.source_system, f.created_at::TEXT
         FROM fact_incident f
         JOIN dim_time t ON t.id = f.time_id
         JOIN dim_zone z ON z.id = f.zone_id
         JOIN dim_incident_type i ON i.id = f.incident_type_id
         WHERE 1 = 1",
    );
    let mut params: Vec<String> = Vec::new();

    if let Some(from) = filter.from {
        sql.push_str(" AND (t.bucket_date + t.bucket_time) >= CAST(? AS TIMESTAMP)");
        params.push(from.format(db::TIMESTAMP_FORMAT).to_string());
    }
    if let Some(to) = filter.to {
        sql.push_str(" AND (t.bucket_date + t.bucket_time) <= CAST(? AS TIMESTAMP)");
        params.push(to.format(db::TIMESTAMP_FORMAT).to_string());
    }
    push_in_clause(&mut sql, &mut params, "z.code", &filter.zone_codes);
    push_in_clause(&mut sql, &mut params, "i.code", &filter.incident_codes);
    if let Some(min) = filter.severity_min {
        sql.push_str(" AND i.severity >= CAST(? AS INTEGER)");
        params.push(i32::from(min.value()).to_string());
    }
    if let Some(bbox) = filter.bbox {
        sql.push_str(
            " AND f.longitude BETWEEN CAST(? AS DOUBLE) AND CAST(? AS DOUBLE)
              AND f.latitude BETWEEN CAST(? AS DOUBLE) AND CAST(? AS DOUBLE)",
        );
        params.push(bbox.west.to_string());
        params.push(bbox.east.to_string());
        params.push(bbox.south.to_string());
        params.push(bbox.north.to_string());
    }

    sql.push_str(" ORDER BY t.bucket_date, t.bucket_time, f.created_at, f.id");
    sql.push_str(&format!(" LIMIT {} OFFSET {}", filter.limit, filter.offset));

    let mut stmt = conn.prepare(&sql)?;
    for (i, value) in params.iter().enumerate() {
        stmt.raw_bind_parameter(i + 1, value)?;
    }
    let mut rows = stmt.raw_query();

    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        let severity_raw: i32 = row.get(6)?;
        let observed_at_text: String = row.get(7)?;
        let scope_text: String = row.get(12)?;
        let created_text: String = row.get(15)?;

        let severity = u8::try_from(severity_raw)
            .ok()
            .and_then(|v| IncidentSeverity::from_value(v).ok())
            .ok_or_else(|| WarehouseError::Conversion {
                message: format!("invalid stored severity: {severity_raw}"),
            })?;

        results.push(IncidentReportRow {
            id: row.get(0)?,
            time_bucket_id: row.get(1)?,
            zone_id: row.get(2)?,
            incident_type_id: row.get(3)?,
            zone_code: row.get(4)?,
            incident_code: row.get(5)?,
            severity,
            observed_at: db::parse_naive_datetime(&observed_at_text).ok_or_else(|| {
                WarehouseError::Conversion {
                    message: format!("unparseable observed_at: {observed_at_text:?}"),
                }
            })?,
            latitude: row.get(8)?,
            longitude: row.get(9)?,
            location_geojson: row.get(10)?,
            description: row.get(11)?,
            impact_scope: scope_text
                .parse::<ImpactScope>()
                .map_err(|_| WarehouseError::Conversion {
                    message: format!("unknown impact scope: {scope_text:?}"),
                })?,
            resolution_minutes: row.get(13)?,
            source_system: row.get(14)?,
            created_at: db::parse_timestamp(&created_text).ok_or_else(|| {
                WarehouseError::Conversion {
                    message: format!("unparseable created_at: {created_text:?}"),
                }
            })?,
        });
    }

    Ok(results)
}

/// Checks the measure domains of a traffic observation.
fn check_traffic_domains(record: &NewTrafficObservation) -> Result<(), WarehouseError> {
    if record.vehicle_volume < 0 {
        return Err(WarehouseError::Domain {
            message: format!("vehicle_volume {} is negative", record.vehicle_volume),
        });
    }
    if !(0.0..=MAX_AVERAGE_SPEED).contains(&record.average_speed) {
        return Err(WarehouseError::Domain {
            message: format!(
                "average_speed {} outside 0..={MAX_AVERAGE_SPEED} km/h",
                record.average_speed
            ),
        });
    }
    if let Some(seconds) = record.travel_time_seconds
        && seconds < 0
    {
        return Err(WarehouseError::Domain {
            message: format!("travel_time_seconds {seconds} is negative"),
        });
    }
    if !record.congestion_index.is_finite() || record.congestion_index < 0.0 {
        return Err(WarehouseError::Domain {
            message: format!("congestion_index {} is not a non-negative number", record.congestion_index),
        });
    }
    Ok(())
}

/// Resolves a time bucket, mapping a missing bucket to a referential
/// failure of the inserting row.
fn resolve_time_bucket(
    conn: &Connection,
    date: chrono::NaiveDate,
    time: chrono::NaiveTime,
) -> Result<i64, WarehouseError> {
    match dimensions::lookup_time_bucket(conn, date, time) {
        Ok(id) => Ok(id),
        Err(WarehouseError::NotFound { key, .. }) => Err(WarehouseError::Referential {
            message: format!("no time bucket for {key}"),
        }),
        Err(e) => Err(e),
    }
}

/// Resolves a catalog code, mapping a missing row to a referential
/// failure of the inserting row.
fn resolve_dimension(
    conn: &Connection,
    kind: CatalogKind,
    code: &str,
) -> Result<i64, WarehouseError> {
    match dimensions::lookup(conn, kind, code) {
        Ok(id) => Ok(id),
        Err(WarehouseError::NotFound { .. }) => Err(WarehouseError::Referential {
            message: format!("unresolved {kind} code '{code}'"),
        }),
        Err(e) => Err(e),
    }
}

/// Appends an `IN (?, ...)` filter when `values` is non-empty.
fn push_in_clause(sql: &mut String, params: &mut Vec<String>, column: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    sql.push_str(" AND ");
    sql.push_str(column);
    sql.push_str(" IN (");
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('?');
        params.push(value.clone());
    }
    sql.push(')');
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use mobility_map_transit_models::ZoneKind;
    use mobility_map_warehouse_models::{BoundingBox, CatalogEntry, ZoneSpec};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn time(s: &str) -> NaiveTime {
        s.parse().unwrap()
    }

    fn seeded_warehouse() -> (Connection, SpatialIndex) {
        let conn = db::open_in_memory().unwrap();
        let mut index = SpatialIndex::new();
        dimensions::ensure_time_buckets(&conn, date("2026-03-02"), date("2026-03-03"), 60).unwrap();
        dimensions::seed_default_catalogs(&conn).unwrap();
        for code in ["COMUNA_10", "COMUNA_11"] {
            dimensions::upsert_catalog_entry(
                &conn,
                &mut index,
                &CatalogEntry::Zone(ZoneSpec {
                    code: code.to_string(),
                    name: code.to_string(),
                    kind: ZoneKind::Administrative,
                    boundary_geojson: None,
                    area_km2: None,
                    population: None,
                }),
                false,
            )
            .unwrap();
        }
        (conn, index)
    }

    fn observation(hour: &str, zone: &str, speed: f64) -> NewTrafficObservation {
        NewTrafficObservation {
            observed_date: date("2026-03-02"),
            observed_time: time(hour),
            zone_code: zone.to_string(),
            vehicle_class_code: "BUS".to_string(),
            vehicle_volume: 120,
            average_speed: speed,
            travel_time_seconds: Some(480),
            congestion_level: CongestionLevel::Medium,
            congestion_index: 1.5,
            source_system: "medata".to_string(),
        }
    }

    fn incident(hour: &str, zone: &str, lat: f64, lng: f64) -> NewIncidentReport {
        NewIncidentReport {
            observed_date: date("2026-03-02"),
            observed_time: time(hour),
            zone_code: zone.to_string(),
            incident_code: "ACCIDENT".to_string(),
            latitude: lat,
            longitude: lng,
            description: Some("rear-end collision".to_string()),
            impact_scope: ImpactScope::Partial,
            resolution_minutes: Some(45),
            source_system: "secretaria".to_string(),
        }
    }

    #[test]
    fn traffic_insert_and_query_roundtrip() {
        let (conn, _index) = seeded_warehouse();

        let id = insert_traffic_observation(&conn, &observation("08:00:00", "COMUNA_10", 23.5))
            .unwrap();
        assert!(id > 0);

        let rows = query_observations(&conn, &ObservationQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].zone_code, "COMUNA_10");
        assert_eq!(rows[0].vehicle_class_code, "BUS");
        assert_eq!(
            rows[0].observed_at,
            date("2026-03-02").and_time(time("08:00:00"))
        );
        assert!((rows[0].average_speed - 23.5).abs() < f64::EPSILON);
    }

    #[test]
    fn traffic_rejects_out_of_domain_speed() {
        let (conn, _index) = seeded_warehouse();

        let err = insert_traffic_observation(&conn, &observation("08:00:00", "COMUNA_10", 250.0))
            .unwrap_err();
        assert!(matches!(err, WarehouseError::Domain { .. }));
        assert!(err.is_row_rejection());
        assert!(query_observations(&conn, &ObservationQuery::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn traffic_rejects_unresolved_zone() {
        let (conn, _index) = seeded_warehouse();

        let err = insert_traffic_observation(&conn, &observation("08:00:00", "NOWHERE", 23.5))
            .unwrap_err();
        assert!(matches!(err, WarehouseError::Referential { .. }));
        assert_eq!(db::table_count(&conn, "fact_traffic").unwrap(), 0);
    }

    #[test]
    fn traffic_rejects_unseeded_time_bucket() {
        let (conn, _index) = seeded_warehouse();

        let mut record = observation("08:00:00", "COMUNA_10", 23.5);
        record.observed_date = date("2025-01-01");
        assert!(matches!(
            insert_traffic_observation(&conn, &record),
            Err(WarehouseError::Referential { .. })
        ));
    }

    #[test]
    fn observation_filters_and_ordering() {
        let (conn, _index) = seeded_warehouse();

        insert_traffic_observation(&conn, &observation("09:00:00", "COMUNA_11", 40.0)).unwrap();
        insert_traffic_observation(&conn, &observation("08:00:00", "COMUNA_10", 20.0)).unwrap();
        let mut critical = observation("10:00:00", "COMUNA_10", 5.0);
        critical.congestion_level = CongestionLevel::Critical;
        critical.congestion_index = 4.2;
        insert_traffic_observation(&conn, &critical).unwrap();

        // Ordered by time bucket regardless of insert order.
        let all = query_observations(&conn, &ObservationQuery::default()).unwrap();
        let hours: Vec<u32> = all
            .iter()
            .map(|r| chrono::Timelike::hour(&r.observed_at))
            .collect();
        assert_eq!(hours, vec![8, 9, 10]);

        let filtered = query_observations(
            &conn,
            &ObservationQuery {
                zone_codes: vec!["COMUNA_10".to_string()],
                congestion_min: Some(CongestionLevel::High),
                ..ObservationQuery::default()
            },
        )
        .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].congestion_level, CongestionLevel::Critical);

        let windowed = query_observations(
            &conn,
            &ObservationQuery {
                from: Some(date("2026-03-02").and_time(time("09:00:00"))),
                to: Some(date("2026-03-02").and_time(time("09:59:59"))),
                ..ObservationQuery::default()
            },
        )
        .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].zone_code, "COMUNA_11");

        let paged = query_observations(
            &conn,
            &ObservationQuery {
                limit: 1,
                offset: 1,
                ..ObservationQuery::default()
            },
        )
        .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(chrono::Timelike::hour(&paged[0].observed_at), 9);
    }

    #[test]
    fn incident_insert_persists_consistent_geometry() {
        let (conn, mut index) = seeded_warehouse();

        let id = insert_incident_report(
            &conn,
            &mut index,
            &incident("14:00:00", "COMUNA_10", 6.2442, -75.5812),
        )
        .unwrap();
        assert_eq!(index.incident_count(), 1);

        let rows = query_incidents(&conn, &IncidentQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].severity, IncidentSeverity::Severe);

        let (lat, lng) = mobility_map_spatial::parse_point(&rows[0].location_geojson).unwrap();
        assert!(mobility_map_spatial::points_match(
            lat,
            lng,
            rows[0].latitude,
            rows[0].longitude,
        ));
    }

    #[test]
    fn incident_rejects_out_of_range_point() {
        let (conn, mut index) = seeded_warehouse();

        let err = insert_incident_report(
            &conn,
            &mut index,
            &incident("14:00:00", "COMUNA_10", 95.0, -75.58),
        )
        .unwrap_err();
        assert!(matches!(err, WarehouseError::Geometry(_)));
        assert!(err.is_row_rejection());
        assert_eq!(index.incident_count(), 0);
        assert_eq!(db::table_count(&conn, "fact_incident").unwrap(), 0);
    }

    #[test]
    fn incident_severity_and_bbox_filters() {
        let (conn, mut index) = seeded_warehouse();

        insert_incident_report(
            &conn,
            &mut index,
            &incident("14:00:00", "COMUNA_10", 6.2442, -75.5812),
        )
        .unwrap();
        let mut minor = incident("15:00:00", "COMUNA_11", 6.30, -75.55);
        minor.incident_code = "OTHER".to_string();
        insert_incident_report(&conn, &mut index, &minor).unwrap();

        let severe = query_incidents(
            &conn,
            &IncidentQuery {
                severity_min: Some(IncidentSeverity::Moderate),
                ..IncidentQuery::default()
            },
        )
        .unwrap();
        assert_eq!(severe.len(), 1);
        assert_eq!(severe[0].incident_code, "ACCIDENT");

        let boxed = query_incidents(
            &conn,
            &IncidentQuery {
                bbox: Some(BoundingBox::new(-75.60, 6.29, -75.50, 6.31)),
                ..IncidentQuery::default()
            },
        )
        .unwrap();
        assert_eq!(boxed.len(), 1);
        assert_eq!(boxed[0].incident_code, "OTHER");
    }
}
