#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Star-schema analytical warehouse for urban-mobility events.
//!
//! The warehouse owns all tables exclusively; external collaborators
//! write through the contracts in [`dimensions`], [`facts`], and
//! [`governance`] and never touch storage directly. Dimensions load
//! before facts, facts resolve their foreign keys through dimension
//! lookups, and every batch load is tracked by a governance run with a
//! write-once terminal outcome plus a lineage edge per produced table.
//!
//! Storage is an embedded `DuckDB` file; all coordination relies on its
//! transactions and uniqueness constraints (insert-if-absent upserts)
//! rather than in-process locks.

pub mod db;
pub mod dimensions;
pub mod facts;
pub mod governance;
pub mod load;

use mobility_map_warehouse_models::CatalogKind;

/// Errors that can occur during warehouse operations.
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    /// Malformed seeding or query parameters.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what was malformed.
        message: String,
    },

    /// A catalog code collision without the replace flag set.
    #[error("Conflict: {kind} code '{code}' already exists")]
    Conflict {
        /// Which catalog the collision happened in.
        kind: CatalogKind,
        /// The colliding natural key.
        code: String,
    },

    /// A dimension lookup found no matching row.
    #[error("Not found: {entity} '{key}'")]
    NotFound {
        /// Which dimension was searched (catalog kind or "time bucket").
        entity: String,
        /// The missing natural key.
        key: String,
    },

    /// A fact row referenced a dimension row that does not exist.
    #[error("Referential error: {message}")]
    Referential {
        /// Which reference failed to resolve.
        message: String,
    },

    /// A value fell outside its declared domain.
    #[error("Domain error: {message}")]
    Domain {
        /// Description of the out-of-range value.
        message: String,
    },

    /// Invalid or inconsistent geometry.
    #[error("Geometry error: {0}")]
    Geometry(#[from] mobility_map_spatial::GeometryError),

    /// An illegal ingestion-run state transition.
    #[error("State error: {message}")]
    State {
        /// Description of the violated transition.
        message: String,
    },

    /// Storage-layer fault. Always retryable by the caller; the
    /// transactional write discipline guarantees no partial commit.
    #[error("Storage error: {0}")]
    Storage(#[from] duckdb::Error),

    /// A stored value could not be decoded into its model type.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

impl WarehouseError {
    /// Returns whether the caller may safely retry the operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns whether this error rejects a single input row rather than
    /// indicating a usage bug or storage fault.
    ///
    /// Batch loaders count these against the enclosing run's rejected
    /// total instead of aborting the batch.
    #[must_use]
    pub const fn is_row_rejection(&self) -> bool {
        matches!(
            self,
            Self::Referential { .. } | Self::Domain { .. } | Self::Geometry(_)
        )
    }
}
