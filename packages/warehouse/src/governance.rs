//! Governance subsystem: ingestion run tracking and lineage edges.
//!
//! Every batch load is bracketed by a run row in `etl_runs`. A run is
//! created PENDING and transitions exactly once to SUCCESS, PARTIAL, or
//! FAILED; the transition is guarded in SQL (`WHERE status = 'PENDING'`)
//! so two racing finishers cannot both win. Lineage edges in
//! `etl_lineage` are append-only and ordered by insertion.

use chrono::Utc;
use duckdb::Connection;
use mobility_map_warehouse_models::{IngestionRunRow, LineageEdgeRow, RunQuery, RunStatus};

use crate::{WarehouseError, db};

/// Opens a new PENDING ingestion run and returns its id.
///
/// # Errors
///
/// Returns [`WarehouseError`] on database failure.
pub fn begin_run(
    conn: &Connection,
    dataset_name: &str,
    source_descriptor: &str,
) -> Result<i64, WarehouseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO etl_runs (dataset_name, source_descriptor, started_at, status)
         VALUES (?, ?, CAST(? AS TIMESTAMP), ?)
         RETURNING id",
    )?;
    let id = stmt.query_row(
        duckdb::params![
            dataset_name,
            source_descriptor,
            db::format_timestamp(Utc::now()),
            RunStatus::Pending.as_ref(),
        ],
        |row| row.get(0),
    )?;

    log::info!("Opened ingestion run {id} for dataset {dataset_name}");
    Ok(id)
}

/// Records the write-once terminal outcome of a run.
///
/// The counts must balance (`accepted + rejected == processed`) and the
/// outcome must be the one the counts imply: SUCCESS iff nothing was
/// rejected, FAILED iff nothing was accepted from a non-empty batch,
/// PARTIAL otherwise.
///
/// # Errors
///
/// Returns [`WarehouseError::Validation`] for unbalanced counts,
/// [`WarehouseError::State`] for a non-terminal or count-inconsistent
/// outcome or an already-terminal run, and
/// [`WarehouseError::NotFound`] for an unknown run id.
pub fn record_outcome(
    conn: &Connection,
    run_id: i64,
    processed: u64,
    accepted: u64,
    rejected: u64,
    outcome: RunStatus,
    error_detail: Option<&str>,
) -> Result<(), WarehouseError> {
    if accepted + rejected != processed {
        return Err(WarehouseError::Validation {
            message: format!(
                "counts do not balance: {accepted} accepted + {rejected} rejected != {processed} processed"
            ),
        });
    }
    if !outcome.is_terminal() {
        return Err(WarehouseError::State {
            message: format!("run {run_id}: {outcome} is not a terminal outcome"),
        });
    }
    let expected = RunStatus::for_counts(processed, accepted, rejected);
    if outcome != expected {
        return Err(WarehouseError::State {
            message: format!(
                "run {run_id}: outcome {outcome} inconsistent with counts (expected {expected})"
            ),
        });
    }

    db::in_transaction(conn, |conn| {
        let current = run_status(conn, run_id)?;
        if current.is_terminal() {
            return Err(WarehouseError::State {
                message: format!("run {run_id} already completed with {current}"),
            });
        }

        // The status guard makes the transition first-writer-wins even
        // if another connection raced past the read above.
        let affected = conn.execute(
            "UPDATE etl_runs
             SET completed_at = CAST(? AS TIMESTAMP),
                 records_processed = ?,
                 records_accepted = ?,
                 records_rejected = ?,
                 status = ?,
                 error_detail = ?
             WHERE id = ? AND status = ?",
            duckdb::params![
                db::format_timestamp(Utc::now()),
                i64::try_from(processed).unwrap_or(i64::MAX),
                i64::try_from(accepted).unwrap_or(i64::MAX),
                i64::try_from(rejected).unwrap_or(i64::MAX),
                outcome.as_ref(),
                error_detail,
                run_id,
                RunStatus::Pending.as_ref(),
            ],
        )?;
        if affected == 0 {
            return Err(WarehouseError::State {
                message: format!("run {run_id} was completed concurrently"),
            });
        }

        log::info!(
            "Run {run_id} completed {outcome}: {accepted}/{processed} accepted, {rejected} rejected"
        );
        Ok(())
    })
}

/// Appends one lineage edge to the transformation graph.
///
/// # Errors
///
/// Returns [`WarehouseError`] on database failure.
pub fn record_lineage(
    conn: &Connection,
    source_table: &str,
    destination_table: &str,
    transformation: &str,
    recorded_by: &str,
) -> Result<(), WarehouseError> {
    conn.execute(
        "INSERT INTO etl_lineage
             (source_table, destination_table, transformation, recorded_at, recorded_by)
         VALUES (?, ?, ?, CAST(? AS TIMESTAMP), ?)",
        duckdb::params![
            source_table,
            destination_table,
            transformation,
            db::format_timestamp(Utc::now()),
            recorded_by,
        ],
    )?;
    Ok(())
}

/// Fetches one ingestion run by id.
///
/// # Errors
///
/// Returns [`WarehouseError::NotFound`] for an unknown id.
pub fn get_run(conn: &Connection, run_id: i64) -> Result<IngestionRunRow, WarehouseError> {
    let mut runs = fetch_runs(conn, "WHERE id = CAST(? AS BIGINT)", &[run_id.to_string()])?;
    runs.pop().ok_or_else(|| WarehouseError::NotFound {
        entity: "ingestion run".to_string(),
        key: run_id.to_string(),
    })
}

/// Queries ingestion runs, newest first.
///
/// # Errors
///
/// Returns [`WarehouseError`] on database failure or undecodable rows.
pub fn query_runs(
    conn: &Connection,
    filter: &RunQuery,
) -> Result<Vec<IngestionRunRow>, WarehouseError> {
    let mut clause = String::from("WHERE 1 = 1");
    let mut params: Vec<String> = Vec::new();

    if let Some(dataset) = &filter.dataset_name {
        clause.push_str(" AND dataset_name = ?");
        params.push(dataset.clone());
    }
    if let Some(from) = filter.started_from {
        clause.push_str(" AND started_at >= CAST(? AS TIMESTAMP)");
        params.push(db::format_timestamp(from));
    }
    if let Some(to) = filter.started_to {
        clause.push_str(" AND started_at <= CAST(? AS TIMESTAMP)");
        params.push(db::format_timestamp(to));
    }
    clause.push_str(" ORDER BY started_at DESC, id DESC");

    fetch_runs(conn, &clause, &params)
}

/// Returns the lineage edges touching the named table (as source or
/// destination), or all edges when no table is given, in insertion
/// order.
///
/// # Errors
///
/// Returns [`WarehouseError`] on database failure.
pub fn query_lineage(
    conn: &Connection,
    table: Option<&str>,
) -> Result<Vec<LineageEdgeRow>, WarehouseError> {
    let mut sql = String::from(
        "SELECT source_table, destination_table, transformation,
                recorded_at::TEXT, recorded_by
         FROM etl_lineage",
    );
    if table.is_some() {
        sql.push_str(" WHERE source_table = ? OR destination_table = ?");
    }
    sql.push_str(" ORDER BY id");

    let mut stmt = conn.prepare(&sql)?;
    if let Some(table) = table {
        stmt.raw_bind_parameter(1, table)?;
        stmt.raw_bind_parameter(2, table)?;
    }
    let mut rows = stmt.raw_query();

    let mut edges = Vec::new();
    while let Some(row) = rows.next()? {
        let recorded_text: String = row.get(3)?;
        edges.push(LineageEdgeRow {
            source_table: row.get(0)?,
            destination_table: row.get(1)?,
            transformation: row.get(2)?,
            recorded_at: db::parse_timestamp(&recorded_text).ok_or_else(|| {
                WarehouseError::Conversion {
                    message: format!("unparseable recorded_at: {recorded_text:?}"),
                }
            })?,
            recorded_by: row.get(4)?,
        });
    }

    Ok(edges)
}

/// Reads a run's current status.
fn run_status(conn: &Connection, run_id: i64) -> Result<RunStatus, WarehouseError> {
    let mut stmt = conn.prepare("SELECT status FROM etl_runs WHERE id = ?")?;
    let text: String = match stmt.query_row([run_id], |row| row.get(0)) {
        Ok(text) => text,
        Err(duckdb::Error::QueryReturnedNoRows) => {
            return Err(WarehouseError::NotFound {
                entity: "ingestion run".to_string(),
                key: run_id.to_string(),
            });
        }
        Err(e) => return Err(WarehouseError::Storage(e)),
    };
    text.parse().map_err(|_| WarehouseError::Conversion {
        message: format!("unknown run status: {text:?}"),
    })
}

/// Fetches runs matching a pre-built clause with string parameters.
fn fetch_runs(
    conn: &Connection,
    clause: &str,
    params: &[String],
) -> Result<Vec<IngestionRunRow>, WarehouseError> {
    let sql = format!(
        "SELECT id, dataset_name, source_descriptor, started_at::TEXT,
                completed_at::TEXT, records_processed, records_accepted,
                records_rejected, status, error_detail
         FROM etl_runs {clause}"
    );
    let mut stmt = conn.prepare(&sql)?;
    for (i, value) in params.iter().enumerate() {
        stmt.raw_bind_parameter(i + 1, value)?;
    }
    let mut rows = stmt.raw_query();

    let mut runs = Vec::new();
    while let Some(row) = rows.next()? {
        let started_text: String = row.get(3)?;
        let completed_text: Option<String> = row.get(4)?;
        let status_text: String = row.get(8)?;

        let completed_at = match completed_text {
            Some(text) => Some(db::parse_timestamp(&text).ok_or_else(|| {
                WarehouseError::Conversion {
                    message: format!("unparseable completed_at: {text:?}"),
                }
            })?),
            None => None,
        };

        runs.push(IngestionRunRow {
            id: row.get(0)?,
            dataset_name: row.get(1)?,
            source_descriptor: row.get(2)?,
            started_at: db::parse_timestamp(&started_text).ok_or_else(|| {
                WarehouseError::Conversion {
                    message: format!("unparseable started_at: {started_text:?}"),
                }
            })?,
            completed_at,
            records_processed: row.get::<_, i64>(5)?.try_into().unwrap_or(0),
            records_accepted: row.get::<_, i64>(6)?.try_into().unwrap_or(0),
            records_rejected: row.get::<_, i64>(7)?.try_into().unwrap_or(0),
            status: status_text.parse().map_err(|_| WarehouseError::Conversion {
                message: format!("unknown run status: {status_text:?}"),
            })?,
            error_detail: row.get(9)?,
        });
    }

    Ok(runs)
}

/// Convenience wrapper deriving the outcome from the counts before
/// recording it. Used by the batch loaders.
///
/// # Errors
///
/// Returns [`WarehouseError`] as [`record_outcome`] does.
pub fn complete_run(
    conn: &Connection,
    run_id: i64,
    processed: u64,
    accepted: u64,
    rejected: u64,
    error_detail: Option<&str>,
) -> Result<RunStatus, WarehouseError> {
    let outcome = RunStatus::for_counts(processed, accepted, rejected);
    record_outcome(
        conn,
        run_id,
        processed,
        accepted,
        rejected,
        outcome,
        error_detail,
    )?;
    Ok(outcome)
}
