//! In-memory gateway for tests and embedding.
//!
//! [`InMemoryGateway`] keeps all rows in ordered maps behind one `RwLock`.
//! A transaction holds the write lock for its whole lifetime and records an
//! undo entry for every write; dropping it uncommitted replays the undo log
//! in reverse.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, RwLock, RwLockWriteGuard};

use strata_types::{JobId, VersionId};
use tracing::debug;

use crate::deadline::Deadline;
use crate::error::{GatewayError, GatewayResult};
use crate::pattern::glob_match;
use crate::rows::{GatewayStats, ObjectVersionRow};
use crate::traits::{Gateway, GatewayTx};

/// A step at which a test can make the gateway fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultPoint {
    Begin,
    ObjectVersion,
    Metadata,
    JobLink,
    Commit,
}

#[derive(Clone, Debug)]
struct MetadataRow {
    schema_key: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct MemoryState {
    metadata: BTreeMap<String, MetadataRow>,
    versions: BTreeMap<VersionId, ObjectVersionRow>,
    job_links: BTreeMap<(JobId, VersionId), Vec<u8>>,
}

impl MemoryState {
    fn lookup_metadata(&self, key: &str, schema_hint: Option<&str>) -> Option<Vec<u8>> {
        if let Some(row) = self.metadata.get(key) {
            return Some(row.payload.clone());
        }
        let hint = schema_hint?;
        self.metadata
            .values()
            .find(|row| row.schema_key == hint)
            .map(|row| row.payload.clone())
    }
}

enum Undo {
    Version(VersionId),
    Metadata(String, Option<MetadataRow>),
    JobLink(JobId, VersionId),
}

/// In-memory implementation of [`Gateway`].
///
/// Data is lost when the gateway is dropped.
pub struct InMemoryGateway {
    state: RwLock<MemoryState>,
    faults: Mutex<Vec<FaultPoint>>,
}

impl InMemoryGateway {
    /// Create an empty gateway.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Arm a one-shot fault: the next operation reaching `point` fails with
    /// [`GatewayError::Injected`].
    pub fn inject_fault(&self, point: FaultPoint) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(point);
        }
    }

    fn read_state(
        &self,
        deadline: Deadline,
    ) -> GatewayResult<std::sync::RwLockReadGuard<'_, MemoryState>> {
        deadline.acquire(|| self.state.try_read())
    }
}

fn take_fault(faults: &Mutex<Vec<FaultPoint>>, point: FaultPoint) -> GatewayResult<()> {
    let mut faults = faults
        .lock()
        .map_err(|e| GatewayError::Poisoned(e.to_string()))?;
    if let Some(pos) = faults.iter().position(|p| *p == point) {
        faults.remove(pos);
        return Err(GatewayError::Injected(point));
    }
    Ok(())
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("InMemoryGateway");
        if let Ok(state) = self.state.try_read() {
            s.field("metadata", &state.metadata.len())
                .field("object_versions", &state.versions.len())
                .field("job_links", &state.job_links.len());
        }
        s.finish()
    }
}

struct MemoryTx<'g> {
    state: RwLockWriteGuard<'g, MemoryState>,
    faults: &'g Mutex<Vec<FaultPoint>>,
    deadline: Deadline,
    undo: Vec<Undo>,
    committed: bool,
}

impl MemoryTx<'_> {
    fn step(&self, point: FaultPoint) -> GatewayResult<()> {
        self.deadline.check()?;
        take_fault(self.faults, point)
    }
}

impl GatewayTx for MemoryTx<'_> {
    fn insert_object_version(&mut self, row: &ObjectVersionRow) -> GatewayResult<u64> {
        self.step(FaultPoint::ObjectVersion)?;
        if self.state.versions.contains_key(&row.version) {
            return Err(GatewayError::Duplicate {
                what: "object version",
                id: row.version.to_string(),
            });
        }
        self.state.versions.insert(row.version, row.clone());
        self.undo.push(Undo::Version(row.version));
        Ok(1)
    }

    fn insert_metadata(
        &mut self,
        key: &str,
        schema_key: &str,
        payload: &[u8],
    ) -> GatewayResult<u64> {
        self.step(FaultPoint::Metadata)?;
        let previous = self.state.metadata.insert(
            key.to_string(),
            MetadataRow {
                schema_key: schema_key.to_string(),
                payload: payload.to_vec(),
            },
        );
        self.undo.push(Undo::Metadata(key.to_string(), previous));
        Ok(1)
    }

    fn insert_job_link(
        &mut self,
        job: &JobId,
        version: &VersionId,
        payload: &[u8],
    ) -> GatewayResult<u64> {
        self.step(FaultPoint::JobLink)?;
        if !self.state.versions.contains_key(version) {
            return Err(GatewayError::NotFound {
                what: "object version",
                id: version.to_string(),
            });
        }
        let link = (job.clone(), *version);
        if self.state.job_links.contains_key(&link) {
            return Ok(0);
        }
        self.state.job_links.insert(link, payload.to_vec());
        self.undo.push(Undo::JobLink(job.clone(), *version));
        Ok(1)
    }

    fn get_metadata(
        &mut self,
        key: &str,
        schema_hint: Option<&str>,
    ) -> GatewayResult<Option<Vec<u8>>> {
        self.deadline.check()?;
        Ok(self.state.lookup_metadata(key, schema_hint))
    }

    fn commit(mut self: Box<Self>) -> GatewayResult<()> {
        self.step(FaultPoint::Commit)?;
        self.committed = true;
        self.undo.clear();
        Ok(())
    }
}

impl Drop for MemoryTx<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let writes = self.undo.len();
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::Version(version) => {
                    self.state.versions.remove(&version);
                }
                Undo::Metadata(key, Some(previous)) => {
                    self.state.metadata.insert(key, previous);
                }
                Undo::Metadata(key, None) => {
                    self.state.metadata.remove(&key);
                }
                Undo::JobLink(job, version) => {
                    self.state.job_links.remove(&(job, version));
                }
            }
        }
        if writes > 0 {
            debug!(writes, "in-memory transaction rolled back");
        }
    }
}

impl Gateway for InMemoryGateway {
    fn begin(&self, deadline: Deadline) -> GatewayResult<Box<dyn GatewayTx + '_>> {
        take_fault(&self.faults, FaultPoint::Begin)?;
        let state = deadline.acquire(|| self.state.try_write())?;
        Ok(Box::new(MemoryTx {
            state,
            faults: &self.faults,
            deadline,
            undo: Vec::new(),
            committed: false,
        }))
    }

    fn get_metadata(
        &self,
        key: &str,
        schema_hint: Option<&str>,
        deadline: Deadline,
    ) -> GatewayResult<Option<Vec<u8>>> {
        Ok(self.read_state(deadline)?.lookup_metadata(key, schema_hint))
    }

    fn get_object_version(
        &self,
        version: &VersionId,
        deadline: Deadline,
    ) -> GatewayResult<Option<ObjectVersionRow>> {
        Ok(self.read_state(deadline)?.versions.get(version).cloned())
    }

    fn get_latest_version_id(
        &self,
        key: &str,
        deadline: Deadline,
    ) -> GatewayResult<Option<VersionId>> {
        let state = self.read_state(deadline)?;
        Ok(state
            .versions
            .values()
            .rev()
            .find(|row| row.key == key)
            .map(|row| row.version))
    }

    fn list_version_ids_by_type(
        &self,
        object_type: &str,
        job_pattern: &str,
        after: Option<VersionId>,
        limit: usize,
        deadline: Deadline,
    ) -> GatewayResult<Vec<VersionId>> {
        let state = self.read_state(deadline)?;
        let rows: Box<dyn Iterator<Item = &ObjectVersionRow>> = match after {
            Some(after) => Box::new(
                state
                    .versions
                    .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                    .map(|(_, row)| row),
            ),
            None => Box::new(state.versions.values()),
        };
        Ok(rows
            .filter(|row| row.object_type == object_type)
            .filter(|row| glob_match(job_pattern, row.job.as_str()))
            .take(limit)
            .map(|row| row.version)
            .collect())
    }

    fn list_job_versions(&self, job: &JobId, deadline: Deadline) -> GatewayResult<Vec<VersionId>> {
        let state = self.read_state(deadline)?;
        Ok(state
            .job_links
            .range((job.clone(), VersionId::UNSET)..)
            .take_while(|((linked_job, _), _)| linked_job == job)
            .map(|((_, version), _)| *version)
            .collect())
    }

    fn ping(&self, deadline: Deadline) -> GatewayResult<()> {
        self.read_state(deadline).map(|_| ())
    }

    fn stats(&self, deadline: Deadline) -> GatewayResult<GatewayStats> {
        let state = self.read_state(deadline)?;
        Ok(GatewayStats {
            metadata: state.metadata.len() as u64,
            object_versions: state.versions.len() as u64,
            job_links: state.job_links.len() as u64,
        })
    }
}
