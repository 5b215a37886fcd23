use strata_types::{JobId, VersionId};

use crate::deadline::Deadline;
use crate::error::{GatewayError, GatewayResult};
use crate::rows::{GatewayStats, ObjectVersionRow};

/// An open storage transaction.
///
/// Writes become visible to other callers only after [`GatewayTx::commit`].
/// Dropping the transaction without committing rolls every write back.
pub trait GatewayTx {
    /// Append an object version. Returns rows affected.
    fn insert_object_version(&mut self, row: &ObjectVersionRow) -> GatewayResult<u64>;

    /// Insert or replace the metadata row for `key`. Returns rows affected.
    fn insert_metadata(&mut self, key: &str, schema_key: &str, payload: &[u8])
        -> GatewayResult<u64>;

    /// Link `version` to `job`. Returns rows affected; 0 if the link
    /// already exists.
    fn insert_job_link(
        &mut self,
        job: &JobId,
        version: &VersionId,
        payload: &[u8],
    ) -> GatewayResult<u64>;

    /// Read metadata as seen inside this transaction. See
    /// [`Gateway::get_metadata`] for lookup rules.
    fn get_metadata(&mut self, key: &str, schema_hint: Option<&str>)
        -> GatewayResult<Option<Vec<u8>>>;

    /// Make every write in this transaction durable.
    fn commit(self: Box<Self>) -> GatewayResult<()>;
}

/// Transactional storage for metadata, object versions and job links.
///
/// Implementations must be thread-safe (`Send + Sync`). Reads outside a
/// transaction observe only committed state.
pub trait Gateway: Send + Sync {
    /// Open a transaction. Waits for other writers until `deadline`.
    fn begin(&self, deadline: Deadline) -> GatewayResult<Box<dyn GatewayTx + '_>>;

    /// Look up metadata by exact key; on a miss, fall back to the first
    /// record (by key order) whose schema key equals `schema_hint`.
    fn get_metadata(
        &self,
        key: &str,
        schema_hint: Option<&str>,
        deadline: Deadline,
    ) -> GatewayResult<Option<Vec<u8>>>;

    /// Fetch one object version.
    fn get_object_version(
        &self,
        version: &VersionId,
        deadline: Deadline,
    ) -> GatewayResult<Option<ObjectVersionRow>>;

    /// Highest version id written under `key`.
    fn get_latest_version_id(&self, key: &str, deadline: Deadline)
        -> GatewayResult<Option<VersionId>>;

    /// Up to `limit` version ids of `object_type` whose job id matches the
    /// glob `job_pattern`, strictly after `after`, in ascending order.
    fn list_version_ids_by_type(
        &self,
        object_type: &str,
        job_pattern: &str,
        after: Option<VersionId>,
        limit: usize,
        deadline: Deadline,
    ) -> GatewayResult<Vec<VersionId>>;

    /// Version ids linked to `job`, ascending.
    fn list_job_versions(&self, job: &JobId, deadline: Deadline) -> GatewayResult<Vec<VersionId>>;

    /// Cheap liveness probe.
    fn ping(&self, deadline: Deadline) -> GatewayResult<()>;

    /// Row counts per record kind.
    fn stats(&self, deadline: Deadline) -> GatewayResult<GatewayStats>;
}

/// Run `work` inside a transaction.
///
/// Commits iff `work` succeeds; otherwise the transaction is dropped (rolled
/// back) and `work`'s error is returned. Failures to begin or commit are
/// converted into `E`.
pub fn with_transaction<'g, G, T, E, F>(gateway: &'g G, deadline: Deadline, work: F) -> Result<T, E>
where
    G: Gateway + ?Sized,
    E: From<GatewayError>,
    F: FnOnce(&mut (dyn GatewayTx + 'g)) -> Result<T, E>,
{
    let mut tx = gateway.begin(deadline)?;
    let value = work(tx.as_mut())?;
    tx.commit()?;
    Ok(value)
}
