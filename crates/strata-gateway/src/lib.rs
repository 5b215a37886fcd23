//! Persistence gateway for Strata.
//!
//! The gateway is the narrow, transactional storage interface the versioned
//! store is built on. It persists three record kinds, all as opaque byte
//! payloads:
//!
//! - **Metadata** — one live row per key, upserted in place
//! - **Object versions** — append-only, one row per version id
//! - **Job links** — append-only, one row per (job, version) pair
//!
//! # Backends
//!
//! All backends implement the [`Gateway`] trait:
//!
//! - [`InMemoryGateway`] — `RwLock`-guarded maps with an undo log, for tests
//!   and embedding; supports fault injection
//! - [`SqliteGateway`] — durable storage in a single SQLite database
//!
//! # Design Rules
//!
//! 1. Writes only happen inside a [`GatewayTx`]; dropping an uncommitted
//!    transaction rolls it back.
//! 2. Every call takes a [`Deadline`]. Lock waits and statements stop with
//!    [`GatewayError::Timeout`] once it expires.
//! 3. Version listings are returned in ascending version-id order.
//! 4. The gateway never interprets payloads.

pub mod deadline;
pub mod error;
pub mod memory;
pub mod pattern;
pub mod rows;
pub mod sqlite;
pub mod traits;

pub use deadline::Deadline;
pub use error::{GatewayError, GatewayResult};
pub use memory::{FaultPoint, InMemoryGateway};
pub use pattern::{glob_match, MATCH_ALL};
pub use rows::{expect_single, GatewayStats, ObjectVersionRow};
pub use sqlite::SqliteGateway;
pub use traits::{with_transaction, Gateway, GatewayTx};
