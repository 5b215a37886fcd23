use strata_types::{JobId, VersionId};

use crate::error::{GatewayError, GatewayResult};

/// One immutable object version as stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectVersionRow {
    pub version: VersionId,
    pub job: JobId,
    /// Key the version was written under.
    pub key: String,
    /// Schema key at write time; what type-scoped listings filter on.
    pub object_type: String,
    /// Encoded payload.
    pub payload: Vec<u8>,
}

/// Row counts per record kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub metadata: u64,
    pub object_versions: u64,
    pub job_links: u64,
}

/// Check that a single-row write touched exactly one row.
pub fn expect_single(affected: u64, what: &'static str) -> GatewayResult<()> {
    if affected != 1 {
        return Err(GatewayError::RowCount {
            what,
            actual: affected,
        });
    }
    Ok(())
}
