//! Bulk loading of JSON-LD style graphs.
//!
//! Each node of the document's `@graph` becomes one version, keyed by its
//! `@id` and typed by its `@type`. All versions of one import share a job,
//! so the batch can be listed or filtered as a unit afterwards.

use serde::Serialize;
use serde_json::Value;
use strata_gateway::Gateway;
use strata_types::{require_object, JobId};
use tracing::{debug, info, warn};

use crate::error::{ErrorContext, Operation, StoreError, StoreResult};
use crate::store::{SetOptions, VersionedStore};

const GRAPH: &str = "@graph";
const ID: &str = "@id";
const TYPE: &str = "@type";

/// Options for [`VersionedStore::import_graph`].
#[derive(Clone, Debug)]
pub struct ImportOptions {
    /// Job for the whole import; generated when absent.
    pub job: Option<JobId>,
    /// Log progress after this many nodes. Zero disables progress logs.
    pub progress_every: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            job: None,
            progress_every: 100,
        }
    }
}

/// Outcome of one import.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub job: JobId,
    /// Nodes written as new versions.
    pub written: usize,
    /// Nodes that were not objects or had no string `@id`.
    pub skipped: usize,
    /// Nodes whose write failed.
    pub failed: usize,
}

impl ImportReport {
    /// Number of nodes seen.
    pub fn total(&self) -> usize {
        self.written + self.skipped + self.failed
    }
}

impl<G: Gateway + ?Sized> VersionedStore<G> {
    /// Write every node of `document` as a version.
    ///
    /// Nodes come from the top-level `@graph` array; a document without one
    /// is treated as a single node. Per-node failures are counted, never
    /// fatal. Only a document that is not an object fails the whole import.
    pub fn import_graph(&self, document: Value, opts: ImportOptions) -> StoreResult<ImportReport> {
        let ctx = ErrorContext::new(Operation::Import);
        let mut document =
            require_object(document).map_err(|source| StoreError::InvalidPayload { ctx, source })?;

        let nodes = match document.remove(GRAPH) {
            Some(Value::Array(nodes)) => nodes,
            Some(node @ Value::Object(_)) => vec![node],
            Some(other) => {
                warn!(kind = strata_types::value_kind(&other), "@graph is neither array nor object");
                Vec::new()
            }
            None => vec![Value::Object(document)],
        };

        let job = opts
            .job
            .unwrap_or_else(|| JobId::from(self.registry().ids().next()));
        let mut report = ImportReport {
            job: job.clone(),
            written: 0,
            skipped: 0,
            failed: 0,
        };
        info!(%job, nodes = nodes.len(), "import started");

        for (index, node) in nodes.into_iter().enumerate() {
            let Some((key, schema_key)) = node_identity(&node) else {
                debug!(index, "skipping node without @id");
                report.skipped += 1;
                continue;
            };
            let set_opts = SetOptions {
                job: Some(job.clone()),
                schema_key,
                ..SetOptions::default()
            };
            match self.set(&key, node, set_opts) {
                Ok(_) => report.written += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "import of node failed");
                    report.failed += 1;
                }
            }

            let processed = index + 1;
            if opts.progress_every > 0 && processed % opts.progress_every == 0 {
                info!(
                    processed,
                    written = report.written,
                    skipped = report.skipped,
                    failed = report.failed,
                    "import progress"
                );
            }
        }

        info!(
            %job,
            written = report.written,
            skipped = report.skipped,
            failed = report.failed,
            "import finished"
        );
        Ok(report)
    }
}

/// The key and optional type of a graph node.
fn node_identity(node: &Value) -> Option<(String, Option<String>)> {
    let object = node.as_object()?;
    let key = object.get(ID)?.as_str().filter(|id| !id.is_empty())?;
    let schema_key = object
        .get(TYPE)
        .and_then(Value::as_str)
        .filter(|ty| !ty.is_empty())
        .map(str::to_string);
    Some((key.to_string(), schema_key))
}
