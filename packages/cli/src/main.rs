#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the mobility-map warehouse.

use std::path::PathBuf;
use std::time::Instant;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use mobility_map_spatial::SpatialIndex;
use mobility_map_transit_models::ZoneKind;
use mobility_map_warehouse::{db, dimensions, governance, load};
use mobility_map_warehouse_models::{
    CatalogEntry, NewIncidentReport, NewTrafficObservation, RunQuery, ZoneSpec,
};

#[derive(Parser)]
#[command(name = "mobility_map", about = "Urban-mobility warehouse tool")]
struct Cli {
    /// Path to the warehouse database file
    #[arg(long, global = true, default_value = "mobility-map.duckdb")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the warehouse file and schema if absent
    Init,
    /// Seed time buckets for an inclusive date range
    SeedTime {
        /// First date (YYYY-MM-DD)
        from: NaiveDate,
        /// Last date (YYYY-MM-DD)
        to: NaiveDate,
        /// Bucket width in minutes (must evenly divide a day)
        #[arg(long, default_value = "60")]
        granularity: u32,
    },
    /// Seed the vehicle-class and incident-type catalogs
    SeedCatalogs,
    /// Create or update a zone
    Zone {
        /// Zone natural key (e.g. "`COMUNA_10`")
        code: String,
        /// Display name
        name: String,
        /// Zone kind (ADMINISTRATIVE, CORRIDOR, NEIGHBORHOOD, OTHER)
        #[arg(long, default_value = "ADMINISTRATIVE")]
        kind: String,
        /// Path to a `GeoJSON` file holding the boundary polygon
        #[arg(long)]
        boundary: Option<PathBuf>,
        /// Land area in square kilometers
        #[arg(long)]
        area_km2: Option<f64>,
        /// Resident population
        #[arg(long)]
        population: Option<i64>,
        /// Overwrite an existing zone with the same code
        #[arg(long)]
        replace: bool,
    },
    /// List configured zones
    Zones,
    /// Load a batch of traffic observations from a JSON file
    LoadTraffic {
        /// Path to a JSON array of observation records
        file: PathBuf,
    },
    /// Load a batch of incident reports from a JSON file
    LoadIncidents {
        /// Path to a JSON array of incident records
        file: PathBuf,
    },
    /// List ingestion runs, newest first
    Runs {
        /// Restrict to this dataset (e.g. "`medata_traffic`")
        #[arg(long)]
        dataset: Option<String>,
    },
    /// Show lineage edges, oldest first
    Lineage {
        /// Restrict to edges touching this table
        #[arg(long)]
        table: Option<String>,
    },
    /// Show row counts per warehouse table
    Stats,
}

#[allow(clippy::too_many_lines)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let conn = db::open(&cli.db)?;

    match cli.command {
        Commands::Init => {
            log::info!(
                "Warehouse ready at {} (schema version {})",
                cli.db.display(),
                db::schema_version(&conn)?
            );
        }
        Commands::SeedTime {
            from,
            to,
            granularity,
        } => {
            let start = Instant::now();
            let created = dimensions::ensure_time_buckets(&conn, from, to, granularity)?;
            log::info!(
                "Seeded {created} new time bucket(s) in {:.1}s",
                start.elapsed().as_secs_f64()
            );
        }
        Commands::SeedCatalogs => {
            let created = dimensions::seed_default_catalogs(&conn)?;
            log::info!("Seeded {created} new catalog row(s)");
        }
        Commands::Zone {
            code,
            name,
            kind,
            boundary,
            area_km2,
            population,
            replace,
        } => {
            let kind: ZoneKind = kind
                .parse()
                .map_err(|_| format!("Unknown zone kind: {kind}"))?;
            let boundary_geojson = match boundary {
                Some(path) => Some(std::fs::read_to_string(path)?),
                None => None,
            };

            let mut index = SpatialIndex::load(&conn)?;
            let id = dimensions::upsert_catalog_entry(
                &conn,
                &mut index,
                &CatalogEntry::Zone(ZoneSpec {
                    code: code.clone(),
                    name,
                    kind,
                    boundary_geojson,
                    area_km2,
                    population,
                }),
                replace,
            )?;
            log::info!("Zone {code} stored with id {id}");
        }
        Commands::Zones => {
            let zones = dimensions::all_zones(&conn)?;
            println!("{:<6} {:<16} {:<16} BOUNDARY", "ID", "CODE", "KIND");
            println!("{}", "-".repeat(60));
            for zone in &zones {
                println!(
                    "{:<6} {:<16} {:<16} {}",
                    zone.id,
                    zone.code,
                    zone.kind.as_ref(),
                    if zone.boundary_geojson.is_some() {
                        "yes"
                    } else {
                        "no"
                    }
                );
            }
        }
        Commands::LoadTraffic { file } => {
            let records: Vec<NewTrafficObservation> =
                serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            let start = Instant::now();
            let summary = load::load_traffic_batch(&conn, &file.display().to_string(), &records)?;
            log::info!(
                "Run {} {}: {}/{} accepted, {} rejected in {:.1}s",
                summary.run_id,
                summary.status,
                summary.accepted,
                summary.processed,
                summary.rejected,
                start.elapsed().as_secs_f64()
            );
        }
        Commands::LoadIncidents { file } => {
            let records: Vec<NewIncidentReport> =
                serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            let mut index = SpatialIndex::load(&conn)?;
            let start = Instant::now();
            let summary = load::load_incident_batch(
                &conn,
                &mut index,
                &file.display().to_string(),
                &records,
            )?;
            log::info!(
                "Run {} {}: {}/{} accepted, {} rejected in {:.1}s",
                summary.run_id,
                summary.status,
                summary.accepted,
                summary.processed,
                summary.rejected,
                start.elapsed().as_secs_f64()
            );
        }
        Commands::Runs { dataset } => {
            let runs = governance::query_runs(
                &conn,
                &RunQuery {
                    dataset_name: dataset,
                    ..RunQuery::default()
                },
            )?;
            println!(
                "{:<6} {:<20} {:<10} {:>9} {:>9} {:>9} STARTED",
                "ID", "DATASET", "STATUS", "PROCESSED", "ACCEPTED", "REJECTED"
            );
            println!("{}", "-".repeat(90));
            for run in &runs {
                println!(
                    "{:<6} {:<20} {:<10} {:>9} {:>9} {:>9} {}",
                    run.id,
                    run.dataset_name,
                    run.status.as_ref(),
                    run.records_processed,
                    run.records_accepted,
                    run.records_rejected,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                );
            }
        }
        Commands::Lineage { table } => {
            let edges = governance::query_lineage(&conn, table.as_deref())?;
            println!(
                "{:<20} {:<20} {:<24} RECORDED",
                "SOURCE", "DESTINATION", "TRANSFORMATION"
            );
            println!("{}", "-".repeat(90));
            for edge in &edges {
                println!(
                    "{:<20} {:<20} {:<24} {} by {}",
                    edge.source_table,
                    edge.destination_table,
                    edge.transformation,
                    edge.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    edge.recorded_by,
                );
            }
        }
        Commands::Stats => {
            println!("{:<20} ROWS", "TABLE");
            println!("{}", "-".repeat(30));
            for table in [
                "dim_time",
                "dim_zone",
                "dim_vehicle_class",
                "dim_incident_type",
                "fact_traffic",
                "fact_incident",
                "etl_runs",
                "etl_lineage",
            ] {
                println!("{:<20} {}", table, db::table_count(&conn, table)?);
            }
        }
    }

    Ok(())
}
