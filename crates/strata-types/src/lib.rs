//! Foundation types for Strata, a versioned key-value store.
//!
//! Every other Strata crate depends on `strata-types`.
//!
//! # Key Types
//!
//! - [`VersionId`] — Time-ordered UUID v7 naming one immutable object version
//! - [`IdGenerator`] — Monotonic source of [`VersionId`]s
//! - [`JobId`] — Grouping identifier tying versions written together
//! - [`MetadataRecord`] — Per-key control record (latest version, job, tombstone)
//! - [`Object`] — The map-shaped payload every version stores
//! - [`Shape`] — Structural description of a payload, for diagnostics

pub mod error;
pub mod id;
pub mod payload;
pub mod record;
pub mod shape;

pub use error::TypeError;
pub use id::{IdGenerator, JobId, VersionId};
pub use payload::{require_object, value_kind, Object};
pub use record::{LastOp, MetadataRecord, ALIVE_TOKEN};
pub use shape::{describe, Shape, ShapeKind};
