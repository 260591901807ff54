#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Transit taxonomy types shared across the mobility-map warehouse.
//!
//! This crate defines the closed catalogs the warehouse dimensions are
//! seeded from: congestion levels, incident kinds and severities, vehicle
//! classes, and zone kinds. All data sources normalize their
//! source-specific labels into this shared taxonomy before loading.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Categorical congestion level for a traffic observation.
///
/// The categorical level is the bounded companion of the unbounded
/// numeric congestion index carried on each observation.
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
pub enum CongestionLevel {
    /// Free-flowing traffic
    Low,
    /// Noticeable slowdowns, near-capacity flow
    Medium,
    /// Heavy congestion, stop-and-go
    High,
    /// Gridlock or blocked corridor
    Critical,
}

impl CongestionLevel {
    /// Classifies a numeric congestion index into a level.
    ///
    /// The index is an open-ended ratio (observed travel time over
    /// free-flow travel time); anything at or above 3.0 is gridlock.
    #[must_use]
    pub fn from_index(index: f64) -> Self {
        if index < 1.2 {
            Self::Low
        } else if index < 1.8 {
            Self::Medium
        } else if index < 3.0 {
            Self::High
        } else {
            Self::Critical
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Low, Self::Medium, Self::High, Self::Critical]
    }
}

/// Severity tier for an incident type, from 1 (minor) to 3 (severe).
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
pub enum IncidentSeverity {
    /// Level 1: no lasting impact on flow (stalled vehicle, debris)
    Minor = 1,
    /// Level 2: partial lane or corridor impact
    Moderate = 2,
    /// Level 3: injuries or full closures
    Severe = 3,
}

impl IncidentSeverity {
    /// Returns the numeric tier of this severity.
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Creates a severity from a numeric tier.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not in the range 1-3.
    pub const fn from_value(value: u8) -> Result<Self, InvalidSeverityError> {
        match value {
            1 => Ok(Self::Minor),
            2 => Ok(Self::Moderate),
            3 => Ok(Self::Severe),
            _ => Err(InvalidSeverityError { value }),
        }
    }
}

/// Error returned when attempting to create an [`IncidentSeverity`] from an
/// invalid numeric tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidSeverityError {
    /// The invalid severity value that was provided.
    pub value: u8,
}

impl std::fmt::Display for InvalidSeverityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid severity value {}: expected 1-3", self.value)
    }
}

impl std::error::Error for InvalidSeverityError {}

/// Canonical incident kinds tracked by the warehouse.
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
pub enum IncidentKind {
    /// Vehicle collision, with or without injuries
    Accident,
    /// Abnormal congestion not caused by a discrete event
    Congestion,
    /// Planned road work or maintenance closure
    Roadwork,
    /// Public event affecting the road network (marches, concerts)
    PublicEvent,
    /// Incidents that don't map to any other kind
    Other,
}

impl IncidentKind {
    /// Returns the default severity tier used when seeding the incident
    /// type catalog.
    #[must_use]
    pub const fn default_severity(self) -> IncidentSeverity {
        match self {
            Self::Accident => IncidentSeverity::Severe,
            Self::Roadwork | Self::Congestion => IncidentSeverity::Moderate,
            Self::PublicEvent | Self::Other => IncidentSeverity::Minor,
        }
    }

    /// Returns the catalog code for this kind.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Accident => "ACCIDENT",
            Self::Congestion => "CONGESTION",
            Self::Roadwork => "ROADWORK",
            Self::PublicEvent => "PUBLIC_EVENT",
            Self::Other => "OTHER",
        }
    }

    /// Returns the display name for this kind.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Accident => "Traffic accident",
            Self::Congestion => "Abnormal congestion",
            Self::Roadwork => "Road work",
            Self::PublicEvent => "Public event",
            Self::Other => "Other incident",
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Accident,
            Self::Congestion,
            Self::Roadwork,
            Self::PublicEvent,
            Self::Other,
        ]
    }
}

/// How much of the affected roadway an incident blocks.
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
pub enum ImpactScope {
    /// One or more lanes blocked, traffic still passing
    Partial,
    /// Full closure of the affected roadway
    Total,
}

/// Kind tag for a geographic zone dimension row.
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
pub enum ZoneKind {
    /// Administrative unit (comuna, corregimiento, borough)
    Administrative,
    /// Road corridor treated as a zone for flow analytics
    Corridor,
    /// Named neighborhood
    Neighborhood,
    /// Zones that don't map to any other kind
    Other,
}

/// Broad grouping for vehicle classes.
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
pub enum VehicleCategory {
    /// Privately owned passenger vehicles
    Private,
    /// Public transit (buses, BRT, taxis)
    PublicTransit,
    /// Goods transport
    Freight,
    /// Human-powered and micromobility
    ActiveTransport,
}

/// Canonical vehicle classes tracked by the traffic counters.
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
pub enum VehicleKind {
    /// Passenger cars
    Car,
    /// Buses, including BRT
    Bus,
    /// Motorcycles and mopeds
    Motorcycle,
    /// Trucks and delivery vehicles
    Truck,
    /// Bicycles and other micromobility
    Bicycle,
}

impl VehicleKind {
    /// Returns the parent [`VehicleCategory`] for this class.
    #[must_use]
    pub const fn category(self) -> VehicleCategory {
        match self {
            Self::Car => VehicleCategory::Private,
            Self::Bus => VehicleCategory::PublicTransit,
            Self::Truck => VehicleCategory::Freight,
            Self::Motorcycle => VehicleCategory::Private,
            Self::Bicycle => VehicleCategory::ActiveTransport,
        }
    }

    /// Returns the catalog code for this class.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Car => "CAR",
            Self::Bus => "BUS",
            Self::Motorcycle => "MOTORCYCLE",
            Self::Truck => "TRUCK",
            Self::Bicycle => "BICYCLE",
        }
    }

    /// Returns the display name for this class.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Car => "Passenger car",
            Self::Bus => "Bus",
            Self::Motorcycle => "Motorcycle",
            Self::Truck => "Truck",
            Self::Bicycle => "Bicycle",
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Car,
            Self::Bus,
            Self::Motorcycle,
            Self::Truck,
            Self::Bicycle,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr as _;

    #[test]
    fn severity_from_value_roundtrip() {
        for v in 1..=3u8 {
            let severity = IncidentSeverity::from_value(v).unwrap();
            assert_eq!(severity.value(), v);
        }
        assert!(IncidentSeverity::from_value(0).is_err());
        assert!(IncidentSeverity::from_value(4).is_err());
    }

    #[test]
    fn congestion_index_bins() {
        assert_eq!(CongestionLevel::from_index(0.9), CongestionLevel::Low);
        assert_eq!(CongestionLevel::from_index(1.5), CongestionLevel::Medium);
        assert_eq!(CongestionLevel::from_index(2.4), CongestionLevel::High);
        assert_eq!(CongestionLevel::from_index(5.0), CongestionLevel::Critical);
    }

    #[test]
    fn congestion_level_text_roundtrip() {
        for level in CongestionLevel::all() {
            let text = level.as_ref();
            assert_eq!(CongestionLevel::from_str(text).unwrap(), *level);
        }
        assert!(CongestionLevel::from_str("GRIDLOCK").is_err());
    }

    #[test]
    fn incident_kind_severity_in_range() {
        for kind in IncidentKind::all() {
            let val = kind.default_severity().value();
            assert!((1..=3).contains(&val), "{kind:?} severity {val} out of range");
        }
    }

    #[test]
    fn vehicle_codes_unique() {
        let codes: Vec<&str> = VehicleKind::all().iter().map(|k| k.code()).collect();
        let mut deduped = codes.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(codes.len(), deduped.len());
    }

    #[test]
    fn impact_scope_text_roundtrip() {
        assert_eq!(ImpactScope::Partial.as_ref(), "PARTIAL");
        assert_eq!(ImpactScope::from_str("TOTAL").unwrap(), ImpactScope::Total);
    }
}
