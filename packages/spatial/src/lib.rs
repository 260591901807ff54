#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Spatial integrity layer for the mobility-map warehouse.
//!
//! All geometry in the warehouse is WGS84 (EPSG:4326) and travels as
//! `GeoJSON` text. This crate validates polygons and points before they
//! are written, derives the canonical point geometry for incident
//! reports from their scalar coordinates, and maintains the in-process
//! R-tree indexes that back zone containment and bounding-box queries.

pub mod index;

pub use index::SpatialIndex;

use geo::{MultiPolygon, Validation as _};
use geojson::{GeoJson, Geometry, Value};

/// The coordinate reference system every geometry is expressed in.
pub const CRS_WGS84: &str = "EPSG:4326";

/// Tolerance (in degrees) when comparing stored coordinates against a
/// derived point geometry. Roughly 10cm at the equator.
pub const COORD_TOLERANCE: f64 = 1e-6;

/// Errors produced by geometry validation and derivation.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    /// The input was not parseable `GeoJSON`.
    #[error("Invalid GeoJSON: {message}")]
    Parse {
        /// Description of what went wrong.
        message: String,
    },

    /// A coordinate fell outside the WGS84 value domain.
    #[error("Coordinate out of range: {message}")]
    OutOfRange {
        /// Description of the offending coordinate.
        message: String,
    },

    /// The geometry is empty or not simple (e.g. self-intersecting).
    #[error("Invalid geometry: {message}")]
    Invalid {
        /// Description of the defect.
        message: String,
    },

    /// The `GeoJSON` held a geometry type the warehouse does not store.
    #[error("Unsupported geometry type: expected {expected}")]
    UnsupportedType {
        /// The geometry type that was expected.
        expected: &'static str,
    },
}

/// Validates that a latitude/longitude pair lies in the WGS84 domain.
///
/// # Errors
///
/// Returns [`GeometryError::OutOfRange`] if either coordinate is
/// non-finite or outside its valid range.
pub fn validate_point(latitude: f64, longitude: f64) -> Result<(), GeometryError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(GeometryError::OutOfRange {
            message: format!("latitude {latitude} outside [-90, 90]"),
        });
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(GeometryError::OutOfRange {
            message: format!("longitude {longitude} outside [-180, 180]"),
        });
    }
    Ok(())
}

/// Derives the canonical `GeoJSON` point geometry for a coordinate pair.
///
/// This is the only construction path for incident point geometry, so a
/// stored geometry is always checkable against its scalar columns with
/// [`parse_point`] and [`points_match`].
///
/// # Errors
///
/// Returns [`GeometryError`] if the coordinates are outside WGS84.
pub fn derive_point(latitude: f64, longitude: f64) -> Result<String, GeometryError> {
    validate_point(latitude, longitude)?;
    let geometry = Geometry::new(Value::Point(vec![longitude, latitude]));
    Ok(GeoJson::Geometry(geometry).to_string())
}

/// Parses a `GeoJSON` point back into a `(latitude, longitude)` pair.
///
/// # Errors
///
/// Returns [`GeometryError`] if the input is not a valid `GeoJSON` point
/// in the WGS84 domain.
pub fn parse_point(geojson_str: &str) -> Result<(f64, f64), GeometryError> {
    let geojson: GeoJson = geojson_str.parse().map_err(|e| GeometryError::Parse {
        message: format!("{e}"),
    })?;

    let GeoJson::Geometry(geometry) = geojson else {
        return Err(GeometryError::UnsupportedType { expected: "Point" });
    };

    let Value::Point(coords) = geometry.value else {
        return Err(GeometryError::UnsupportedType { expected: "Point" });
    };

    if coords.len() < 2 {
        return Err(GeometryError::Parse {
            message: format!("point has {} coordinates, expected 2", coords.len()),
        });
    }

    let (longitude, latitude) = (coords[0], coords[1]);
    validate_point(latitude, longitude)?;
    Ok((latitude, longitude))
}

/// Returns whether two coordinate pairs agree within [`COORD_TOLERANCE`].
#[must_use]
pub fn points_match(lat_a: f64, lng_a: f64, lat_b: f64, lng_b: f64) -> bool {
    (lat_a - lat_b).abs() <= COORD_TOLERANCE && (lng_a - lng_b).abs() <= COORD_TOLERANCE
}

/// Validates a zone boundary and returns it as a [`MultiPolygon`].
///
/// Accepts `Polygon` and `MultiPolygon` `GeoJSON` geometry. The geometry
/// must be non-empty, all coordinates must lie in the WGS84 domain, and
/// every ring must be simple (closed, non-self-intersecting).
///
/// # Errors
///
/// Returns [`GeometryError`] describing the first defect found.
pub fn validate_polygon(geojson_str: &str) -> Result<MultiPolygon<f64>, GeometryError> {
    let geojson: GeoJson = geojson_str.parse().map_err(|e| GeometryError::Parse {
        message: format!("{e}"),
    })?;

    let GeoJson::Geometry(geometry) = geojson else {
        return Err(GeometryError::UnsupportedType {
            expected: "Polygon or MultiPolygon",
        });
    };

    let geo_geometry: geo::Geometry<f64> =
        geometry.try_into().map_err(|e| GeometryError::Parse {
            message: format!("{e}"),
        })?;

    let multi_polygon = match geo_geometry {
        geo::Geometry::MultiPolygon(mp) => mp,
        geo::Geometry::Polygon(p) => MultiPolygon(vec![p]),
        _ => {
            return Err(GeometryError::UnsupportedType {
                expected: "Polygon or MultiPolygon",
            });
        }
    };

    if multi_polygon.0.is_empty()
        || multi_polygon
            .0
            .iter()
            .any(|p| p.exterior().0.len() < 4)
    {
        return Err(GeometryError::Invalid {
            message: "empty polygon or degenerate exterior ring".to_string(),
        });
    }

    for polygon in &multi_polygon {
        for coord in polygon.exterior().0.iter().chain(
            polygon
                .interiors()
                .iter()
                .flat_map(|ring| ring.0.iter()),
        ) {
            validate_point(coord.y, coord.x)?;
        }
    }

    if !multi_polygon.is_valid() {
        return Err(GeometryError::Invalid {
            message: "polygon is not simple (self-intersecting or malformed rings)".to_string(),
        });
    }

    Ok(multi_polygon)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r#"{"type":"Polygon","coordinates":[[[-75.6,6.2],[-75.5,6.2],[-75.5,6.3],[-75.6,6.3],[-75.6,6.2]]]}"#;
    const BOWTIE: &str = r#"{"type":"Polygon","coordinates":[[[0.0,0.0],[1.0,1.0],[1.0,0.0],[0.0,1.0],[0.0,0.0]]]}"#;

    #[test]
    fn accepts_simple_polygon() {
        let mp = validate_polygon(SQUARE).unwrap();
        assert_eq!(mp.0.len(), 1);
    }

    #[test]
    fn rejects_self_intersecting_polygon() {
        let err = validate_polygon(BOWTIE).unwrap_err();
        assert!(matches!(err, GeometryError::Invalid { .. }));
    }

    #[test]
    fn rejects_empty_polygon() {
        let empty = r#"{"type":"Polygon","coordinates":[]}"#;
        assert!(validate_polygon(empty).is_err());
    }

    #[test]
    fn rejects_out_of_range_polygon() {
        let bad = r#"{"type":"Polygon","coordinates":[[[-195.0,6.2],[-75.5,6.2],[-75.5,6.3],[-195.0,6.2]]]}"#;
        assert!(matches!(
            validate_polygon(bad),
            Err(GeometryError::OutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_point_geojson_as_polygon() {
        let point = r#"{"type":"Point","coordinates":[-75.57,6.24]}"#;
        assert!(matches!(
            validate_polygon(point),
            Err(GeometryError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn point_roundtrip_within_tolerance() {
        let geojson = derive_point(6.2442, -75.5812).unwrap();
        let (lat, lng) = parse_point(&geojson).unwrap();
        assert!(points_match(lat, lng, 6.2442, -75.5812));
    }

    #[test]
    fn rejects_out_of_range_point() {
        assert!(derive_point(95.0, -75.58).is_err());
        assert!(derive_point(6.24, 181.0).is_err());
        assert!(validate_point(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn tolerance_is_tight() {
        assert!(points_match(6.0, -75.0, 6.0 + 5e-7, -75.0));
        assert!(!points_match(6.0, -75.0, 6.0 + 1e-4, -75.0));
    }
}
