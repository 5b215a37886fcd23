//! The Strata versioned key-value store.
//!
//! Clients register keys, write immutable versions of map-shaped objects
//! under them, read back the latest or a specific version, group writes
//! into jobs, and soft-delete keys without losing history.
//!
//! # Architecture
//!
//! ```text
//! VersionedStore ──> MetadataRegistry ──> Gateway (memory | sqlite)
//!    │    │                                  ▲
//!    │    └──> IdGenerator                   │
//!    └───────────────────────────────────────┘
//! ```
//!
//! - [`VersionedStore`] — public surface: register, set, get, has,
//!   unregister, publish, listings, jobs, bulk import
//! - [`MetadataRegistry`] — owns the per-key [`MetadataRecord`]
//! - [`StoreError`] — closed error enum; every variant carries an
//!   [`ErrorContext`]
//!
//! Writes that touch several records run in a single gateway transaction,
//! so a failed call leaves storage exactly as it found it.
//!
//! [`MetadataRecord`]: strata_types::MetadataRecord

pub mod config;
pub mod error;
pub mod import;
pub mod listing;
pub mod registry;
pub mod store;
pub mod validate;

pub use config::StoreConfig;
pub use error::{ErrorContext, ErrorKind, Operation, StoreError, StoreResult};
pub use import::{ImportOptions, ImportReport};
pub use listing::{VersionIter, VersionListing};
pub use registry::MetadataRegistry;
pub use store::{GetRequest, RegisterOptions, SetOptions, StoredObject, VersionedStore};
pub use validate::{AcceptAll, PayloadValidator, Verdict};
