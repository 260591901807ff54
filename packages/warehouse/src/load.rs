//! Batch load orchestration.
//!
//! A batch load opens a governance run, inserts rows one at a time,
//! counts per-row rejections without aborting the batch, records the
//! terminal outcome derived from the counts, and appends one lineage
//! edge for the produced fact table.
//!
//! Storage faults are not rejections: they propagate immediately and
//! leave the run PENDING, which external monitoring reports as stuck.

use duckdb::Connection;
use mobility_map_spatial::SpatialIndex;
use mobility_map_warehouse_models::{NewIncidentReport, NewTrafficObservation, RunSummary};

use crate::{WarehouseError, facts, governance};

/// Actor recorded on lineage edges written by the batch loaders.
const LOADER_ACTOR: &str = "mobility-map-loader";

/// Loads a batch of traffic observations under one governance run.
///
/// Per-row domain and referential failures are counted as rejections;
/// the first few are logged and summarized into the run's error detail.
///
/// # Errors
///
/// Returns [`WarehouseError`] only for storage faults or governance
/// bookkeeping failures, never for rejected rows.
pub fn load_traffic_batch(
    conn: &Connection,
    source_descriptor: &str,
    records: &[NewTrafficObservation],
) -> Result<RunSummary, WarehouseError> {
    let run_id = governance::begin_run(conn, "medata_traffic", source_descriptor)?;

    let mut accepted = 0u64;
    let mut rejected = 0u64;
    let mut first_errors: Vec<String> = Vec::new();

    for record in records {
        match facts::insert_traffic_observation(conn, record) {
            Ok(_) => accepted += 1,
            Err(e) if e.is_row_rejection() => {
                rejected += 1;
                if first_errors.len() < 5 {
                    first_errors.push(e.to_string());
                }
                log::warn!("Run {run_id}: rejected traffic row: {e}");
            }
            Err(e) => return Err(e),
        }
    }

    finish_run(
        conn,
        run_id,
        records.len() as u64,
        accepted,
        rejected,
        &first_errors,
        "dim_time",
        "fact_traffic",
        "traffic batch load",
    )
}

/// Loads a batch of incident reports under one governance run.
///
/// The spatial index receives each committed point; rejected rows never
/// reach it.
///
/// # Errors
///
/// Returns [`WarehouseError`] only for storage faults or governance
/// bookkeeping failures, never for rejected rows.
pub fn load_incident_batch(
    conn: &Connection,
    index: &mut SpatialIndex,
    source_descriptor: &str,
    records: &[NewIncidentReport],
) -> Result<RunSummary, WarehouseError> {
    let run_id = governance::begin_run(conn, "medata_incidents", source_descriptor)?;

    let mut accepted = 0u64;
    let mut rejected = 0u64;
    let mut first_errors: Vec<String> = Vec::new();

    for record in records {
        match facts::insert_incident_report(conn, index, record) {
            Ok(_) => accepted += 1,
            Err(e) if e.is_row_rejection() => {
                rejected += 1;
                if first_errors.len() < 5 {
                    first_errors.push(e.to_string());
                }
                log::warn!("Run {run_id}: rejected incident row: {e}");
            }
            Err(e) => return Err(e),
        }
    }

    finish_run(
        conn,
        run_id,
        records.len() as u64,
        accepted,
        rejected,
        &first_errors,
        "dim_zone",
        "fact_incident",
        "incident batch load",
    )
}

/// Records the terminal outcome and the lineage edge for a finished
/// batch.
#[allow(clippy::too_many_arguments)]
fn finish_run(
    conn: &Connection,
    run_id: i64,
    processed: u64,
    accepted: u64,
    rejected: u64,
    first_errors: &[String],
    source_table: &str,
    destination_table: &str,
    transformation: &str,
) -> Result<RunSummary, WarehouseError> {
    let error_detail = if first_errors.is_empty() {
        None
    } else {
        Some(format!(
            "{rejected} rows rejected; first errors: {}",
            first_errors.join("; ")
        ))
    };

    let status = governance::complete_run(
        conn,
        run_id,
        processed,
        accepted,
        rejected,
        error_detail.as_deref(),
    )?;

    if accepted > 0 {
        governance::record_lineage(
            conn,
            source_table,
            destination_table,
            transformation,
            LOADER_ACTOR,
        )?;
    }

    Ok(RunSummary {
        run_id,
        processed,
        accepted,
        rejected,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use mobility_map_transit_models::{CongestionLevel, ImpactScope, ZoneKind};
    use mobility_map_warehouse_models::{CatalogEntry, RunStatus, ZoneSpec};

    use crate::{db, dimensions, governance};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn time(s: &str) -> NaiveTime {
        s.parse().unwrap()
    }

    fn seeded_warehouse() -> (Connection, SpatialIndex) {
        let conn = db::open_in_memory().unwrap();
        let mut index = SpatialIndex::new();
        dimensions::ensure_time_buckets(&conn, date("2026-03-02"), date("2026-03-02"), 60).unwrap();
        dimensions::seed_default_catalogs(&conn).unwrap();
        dimensions::upsert_catalog_entry(
            &conn,
            &mut index,
            &CatalogEntry::Zone(ZoneSpec {
                code: "COMUNA_10".to_string(),
                name: "La Candelaria".to_string(),
                kind: ZoneKind::Administrative,
                boundary_geojson: None,
                area_km2: None,
                population: None,
            }),
            false,
        )
        .unwrap();
        (conn, index)
    }

    fn observation(zone: &str, speed: f64) -> NewTrafficObservation {
        NewTrafficObservation {
            observed_date: date("2026-03-02"),
            observed_time: time("08:00:00"),
            zone_code: zone.to_string(),
            vehicle_class_code: "CAR".to_string(),
            vehicle_volume: 80,
            average_speed: speed,
            travel_time_seconds: None,
            congestion_level: CongestionLevel::Low,
            congestion_index: 1.0,
            source_system: "medata".to_string(),
        }
    }

    fn incident(lat: f64) -> NewIncidentReport {
        NewIncidentReport {
            observed_date: date("2026-03-02"),
            observed_time: time("08:00:00"),
            zone_code: "COMUNA_10".to_string(),
            incident_code: "ACCIDENT".to_string(),
            latitude: lat,
            longitude: -75.5812,
            description: None,
            impact_scope: ImpactScope::Total,
            resolution_minutes: None,
            source_system: "secretaria".to_string(),
        }
    }

    #[test]
    fn clean_batch_is_success() {
        let (conn, _index) = seeded_warehouse();

        let summary = load_traffic_batch(
            &conn,
            "traffic.csv",
            &[observation("COMUNA_10", 30.0), observation("COMUNA_10", 45.0)],
        )
        .unwrap();
        assert_eq!(summary.status, RunStatus::Success);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected, 0);

        let run = governance::get_run(&conn, summary.run_id).unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.error_detail.is_none());

        let edges = governance::query_lineage(&conn, Some("fact_traffic")).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].recorded_by, "mobility-map-loader");
    }

    #[test]
    fn mixed_batch_is_partial_with_detail() {
        let (conn, _index) = seeded_warehouse();

        let summary = load_traffic_batch(
            &conn,
            "traffic.csv",
            &[
                observation("COMUNA_10", 30.0),
                observation("COMUNA_10", 250.0), // out of domain
                observation("NOWHERE", 30.0),    // unresolved zone
            ],
        )
        .unwrap();
        assert_eq!(summary.status, RunStatus::Partial);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 2);

        let run = governance::get_run(&conn, summary.run_id).unwrap();
        assert_eq!(
            run.records_accepted + run.records_rejected,
            run.records_processed
        );
        assert!(run.error_detail.unwrap().contains("2 rows rejected"));
        assert_eq!(db::table_count(&conn, "fact_traffic").unwrap(), 1);
    }

    #[test]
    fn fully_rejected_batch_is_failed_without_lineage() {
        let (conn, mut index) = seeded_warehouse();

        let summary = load_incident_batch(
            &conn,
            &mut index,
            "incidents.csv",
            &[incident(95.0), incident(-95.0)],
        )
        .unwrap();
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.accepted, 0);
        assert_eq!(index.incident_count(), 0);

        assert!(governance::query_lineage(&conn, Some("fact_incident"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn empty_batch_is_success() {
        let (conn, _index) = seeded_warehouse();
        let summary = load_traffic_batch(&conn, "empty.csv", &[]).unwrap();
        assert_eq!(summary.status, RunStatus::Success);
        assert_eq!(summary.processed, 0);
        // No rows produced, no lineage edge.
        assert!(governance::query_lineage(&conn, None).unwrap().is_empty());
    }

    #[test]
    fn incident_batch_feeds_spatial_index() {
        let (conn, mut index) = seeded_warehouse();

        let summary = load_incident_batch(
            &conn,
            &mut index,
            "incidents.csv",
            &[incident(6.2442), incident(6.2501)],
        )
        .unwrap();
        assert_eq!(summary.status, RunStatus::Success);
        assert_eq!(index.incident_count(), 2);

        let hits = index.incidents_intersecting(-75.60, 6.20, -75.55, 6.30);
        assert_eq!(hits.len(), 2);
    }
}
