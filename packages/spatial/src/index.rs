//! In-memory R-tree indexes over geometry-bearing warehouse entities.
//!
//! Zone polygons and incident points are bulk-loaded from the warehouse
//! `DuckDB` at open and maintained incrementally as rows commit, so a
//! containment or intersection query never has to scan a fact table.

use geo::{BoundingRect, Contains, Intersects, MultiPolygon};
use rstar::{AABB, RTree, RTreeObject};

use crate::GeometryError;

/// A zone boundary stored in the R-tree with its surrogate id.
#[derive(Debug, Clone)]
struct ZoneEntry {
    zone_id: i64,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for ZoneEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// An incident point stored in the R-tree with its surrogate id.
#[derive(Debug, Clone, PartialEq)]
struct PointEntry {
    incident_id: i64,
    position: [f64; 2],
}

impl RTreeObject for PointEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

/// Pre-built spatial indexes over zones and incident reports.
///
/// Zone containment lookups run once per fact during analytics, so both
/// trees live in memory for the lifetime of the warehouse connection.
pub struct SpatialIndex {
    zones: RTree<ZoneEntry>,
    incidents: RTree<PointEntry>,
}

impl SpatialIndex {
    /// Creates an empty index (used before any geometry is committed).
    #[must_use]
    pub fn new() -> Self {
        Self {
            zones: RTree::new(),
            incidents: RTree::new(),
        }
    }

    /// Bulk-loads the index from committed warehouse rows.
    ///
    /// Zone rows with unparseable stored geometry are skipped with a
    /// warning rather than failing the load; they were validated at
    /// write time, so this only fires on out-of-band tampering.
    ///
    /// # Errors
    ///
    /// Returns an error if the database queries fail.
    pub fn load(conn: &duckdb::Connection) -> Result<Self, duckdb::Error> {
        let mut zone_entries = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT id, boundary_geojson FROM dim_zone WHERE boundary_geojson IS NOT NULL",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let zone_id: i64 = row.get(0)?;
                let geojson_str: String = row.get(1)?;
                match crate::validate_polygon(&geojson_str) {
                    Ok(polygon) => zone_entries.push(make_zone_entry(zone_id, polygon)),
                    Err(e) => log::warn!("Skipping zone {zone_id} with bad stored geometry: {e}"),
                }
            }
        }
        let zones = RTree::bulk_load(zone_entries);
        log::info!("Loaded {} zone boundaries into spatial index", zones.size());

        let mut point_entries = Vec::new();
        {
            let mut stmt = conn.prepare("SELECT id, longitude, latitude FROM fact_incident")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                point_entries.push(PointEntry {
                    incident_id: row.get(0)?,
                    position: [row.get(1)?, row.get(2)?],
                });
            }
        }
        let incidents = RTree::bulk_load(point_entries);
        log::info!("Loaded {} incident points into spatial index", incidents.size());

        Ok(Self { zones, incidents })
    }

    /// Adds a zone boundary to the index.
    pub fn insert_zone(&mut self, zone_id: i64, polygon: MultiPolygon<f64>) {
        self.zones.insert(make_zone_entry(zone_id, polygon));
    }

    /// Replaces (or inserts) the boundary for an existing zone.
    ///
    /// Zone catalogs are small, so the zone tree is rebuilt rather than
    /// surgically updated; the old entry's envelope may not match the
    /// new geometry, which makes in-place removal unreliable.
    pub fn replace_zone(&mut self, zone_id: i64, polygon: Option<MultiPolygon<f64>>) {
        let mut entries: Vec<ZoneEntry> = self
            .zones
            .iter()
            .filter(|entry| entry.zone_id != zone_id)
            .cloned()
            .collect();
        if let Some(polygon) = polygon {
            entries.push(make_zone_entry(zone_id, polygon));
        }
        self.zones = RTree::bulk_load(entries);
    }

    /// Adds a committed incident point to the index.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if the coordinates are outside WGS84.
    pub fn insert_incident(
        &mut self,
        incident_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), GeometryError> {
        crate::validate_point(latitude, longitude)?;
        self.incidents.insert(PointEntry {
            incident_id,
            position: [longitude, latitude],
        });
        Ok(())
    }

    /// Returns the ids of all zones whose boundary intersects the box,
    /// in ascending id order.
    #[must_use]
    pub fn zones_intersecting(&self, west: f64, south: f64, east: f64, north: f64) -> Vec<i64> {
        let envelope = AABB::from_corners([west, south], [east, north]);
        let region = geo::Rect::new(
            geo::coord! { x: west, y: south },
            geo::coord! { x: east, y: north },
        );

        let mut ids: Vec<i64> = self
            .zones
            .locate_in_envelope_intersecting(&envelope)
            .filter(|entry| entry.polygon.intersects(&region))
            .map(|entry| entry.zone_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the ids of all incident reports located inside the box,
    /// in ascending id order.
    #[must_use]
    pub fn incidents_intersecting(
        &self,
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    ) -> Vec<i64> {
        let envelope = AABB::from_corners([west, south], [east, north]);
        let mut ids: Vec<i64> = self
            .incidents
            .locate_in_envelope(&envelope)
            .map(|entry| entry.incident_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Looks up the zone containing a point.
    ///
    /// Administrative zones tile the city without overlap, so first
    /// match wins.
    #[must_use]
    pub fn locate_zone(&self, longitude: f64, latitude: f64) -> Option<i64> {
        let point = geo::Point::new(longitude, latitude);
        let query_env = AABB::from_point([longitude, latitude]);

        for entry in self.zones.locate_in_envelope_intersecting(&query_env) {
            if entry.polygon.contains(&point) {
                return Some(entry.zone_id);
            }
        }
        None
    }

    /// Number of indexed zone boundaries.
    #[must_use]
    pub fn zone_count(&self) -> usize {
        self.zones.size()
    }

    /// Number of indexed incident points.
    #[must_use]
    pub fn incident_count(&self) -> usize {
        self.incidents.size()
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a [`ZoneEntry`] with its envelope precomputed.
fn make_zone_entry(zone_id: i64, polygon: MultiPolygon<f64>) -> ZoneEntry {
    let envelope = polygon.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    );
    ZoneEntry {
        zone_id,
        envelope,
        polygon,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(west: f64, south: f64, size: f64) -> MultiPolygon<f64> {
        crate::validate_polygon(&format!(
            r#"{{"type":"Polygon","coordinates":[[[{w},{s}],[{e},{s}],[{e},{n}],[{w},{n}],[{w},{s}]]]}}"#,
            w = west,
            s = south,
            e = west + size,
            n = south + size,
        ))
        .unwrap()
    }

    #[test]
    fn locates_containing_zone() {
        let mut index = SpatialIndex::new();
        index.insert_zone(1, square(-75.60, 6.20, 0.05));
        index.insert_zone(2, square(-75.55, 6.20, 0.05));

        assert_eq!(index.locate_zone(-75.58, 6.22), Some(1));
        assert_eq!(index.locate_zone(-75.52, 6.22), Some(2));
        assert_eq!(index.locate_zone(-75.40, 6.22), None);
    }

    #[test]
    fn zone_intersection_query() {
        let mut index = SpatialIndex::new();
        index.insert_zone(1, square(-75.60, 6.20, 0.05));
        index.insert_zone(2, square(-75.55, 6.20, 0.05));
        index.insert_zone(3, square(-75.40, 6.40, 0.05));

        let hits = index.zones_intersecting(-75.61, 6.19, -75.54, 6.26);
        assert_eq!(hits, vec![1, 2]);
    }

    #[test]
    fn incident_point_query() {
        let mut index = SpatialIndex::new();
        index.insert_incident(10, 6.22, -75.58).unwrap();
        index.insert_incident(11, 6.22, -75.52).unwrap();
        index.insert_incident(12, 6.45, -75.40).unwrap();

        let hits = index.incidents_intersecting(-75.60, 6.20, -75.50, 6.30);
        assert_eq!(hits, vec![10, 11]);
        assert_eq!(index.incident_count(), 3);
    }

    #[test]
    fn replace_zone_updates_geometry() {
        let mut index = SpatialIndex::new();
        index.insert_zone(1, square(-75.60, 6.20, 0.05));
        assert_eq!(index.locate_zone(-75.58, 6.22), Some(1));

        index.replace_zone(1, Some(square(-75.50, 6.30, 0.05)));
        assert_eq!(index.locate_zone(-75.58, 6.22), None);
        assert_eq!(index.locate_zone(-75.48, 6.32), Some(1));

        index.replace_zone(1, None);
        assert_eq!(index.zone_count(), 0);
    }

    #[test]
    fn rejects_out_of_range_incident_point() {
        let mut index = SpatialIndex::new();
        assert!(index.insert_incident(1, 95.0, 0.0).is_err());
        assert_eq!(index.incident_count(), 0);
    }
}
