//! The per-key Metadata Record.
//!
//! One record exists per registered key and holds only the most recent
//! state: history lives in the chain of object versions, not here.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{JobId, VersionId};

/// Tombstone value carried by every live record.
///
/// Unregistering replaces it with a freshly generated id, which can never
/// equal this value.
pub const ALIVE_TOKEN: VersionId = VersionId::UNSET;

/// The last operation applied to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LastOp {
    #[serde(rename = "reg")]
    Register,
    #[serde(rename = "set")]
    Set,
    #[serde(rename = "reg&set")]
    RegisterAndSet,
}

impl LastOp {
    /// Text stored in the record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "reg",
            Self::Set => "set",
            Self::RegisterAndSet => "reg&set",
        }
    }
}

impl fmt::Display for LastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control record for one key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    /// The key this record controls.
    pub key: String,
    /// Grouping key; equals `key` unless the caller chose another.
    pub schema_key: String,
    /// Whether the key has been populated (or registration asked for it).
    pub init: bool,
    /// Last operation applied.
    #[serde(rename = "oper")]
    pub last_op: LastOp,
    /// Latest version, or [`VersionId::UNSET`] if nothing was written yet.
    #[serde(rename = "versionId")]
    pub version: VersionId,
    /// Job that wrote the latest version.
    #[serde(rename = "jobId", default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobId>,
    /// Validate payloads before writing them under this key.
    pub check: bool,
    /// [`ALIVE_TOKEN`] for live keys; any other value marks a soft delete.
    pub tombstone: VersionId,
}

impl MetadataRecord {
    /// A fresh registration with no version written yet.
    pub fn registered(key: impl Into<String>, schema_key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            schema_key: schema_key.into(),
            init: false,
            last_op: LastOp::Register,
            version: VersionId::UNSET,
            job: None,
            check: false,
            tombstone: ALIVE_TOKEN,
        }
    }

    /// Returns `true` unless the key has been unregistered.
    pub fn is_live(&self) -> bool {
        self.tombstone == ALIVE_TOKEN
    }

    /// The latest version, if one has been written.
    pub fn latest_version(&self) -> Option<VersionId> {
        (!self.version.is_unset()).then_some(self.version)
    }

    /// Point the record at a newly written version.
    pub fn point_to(&mut self, version: VersionId, job: JobId) {
        self.version = version;
        self.job = Some(job);
    }
}
