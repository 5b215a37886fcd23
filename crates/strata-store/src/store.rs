//! The Versioned Store: the public operation surface.
//!
//! Every write generates a fresh [`VersionId`] and commits the object
//! version, the key's metadata record and the job link in one gateway
//! transaction. Reads resolve "latest" through the metadata record unless
//! the caller names a version explicitly.
//!
//! Concurrent `set` calls on the same key are not serialized against each
//! other: the last metadata write to commit wins, and the losing call's
//! object version stays reachable by its explicit id.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use strata_gateway::{
    expect_single, with_transaction, Deadline, Gateway, GatewayStats, ObjectVersionRow,
};
use strata_types::{
    require_object, IdGenerator, JobId, LastOp, MetadataRecord, Object, VersionId, ALIVE_TOKEN,
};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{ErrorContext, ErrorKind, Operation, StoreError, StoreResult, TxError};
use crate::listing::VersionListing;
use crate::registry::{encode_failure, read_record, write_record, MetadataRegistry};
use crate::validate::{AcceptAll, PayloadValidator, Verdict};

/// Options for [`VersionedStore::register`].
#[derive(Clone, Debug, Default)]
pub struct RegisterOptions {
    /// Mark the key as initialized; requires an initial object.
    pub init: bool,
    /// Validate every write to this key.
    pub check: bool,
    /// Grouping key; defaults to the key itself.
    pub schema_key: Option<String>,
    /// Overrides the configured operation timeout.
    pub timeout: Option<Duration>,
}

/// Options for [`VersionedStore::set`].
#[derive(Clone, Debug, Default)]
pub struct SetOptions {
    /// Job to file the version under; a singleton job when absent.
    pub job: Option<JobId>,
    pub schema_key: Option<String>,
    /// Validate this write even if the key does not ask for it.
    pub check: bool,
    pub timeout: Option<Duration>,
}

impl SetOptions {
    /// Options with every field at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// File the version under `job`.
    pub fn job(mut self, job: JobId) -> Self {
        self.job = Some(job);
        self
    }

    /// Use `schema_key` as grouping key and object type.
    pub fn schema_key(mut self, schema_key: impl Into<String>) -> Self {
        self.schema_key = Some(schema_key.into());
        self
    }

    /// Force validation of this write.
    pub fn check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    /// Override the configured operation timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What to read with [`VersionedStore::get`].
///
/// An explicit version wins over the key. With only a key, the key's latest
/// version is read.
#[derive(Clone, Debug, Default)]
pub struct GetRequest {
    pub key: Option<String>,
    pub version: Option<VersionId>,
    pub timeout: Option<Duration>,
}

impl GetRequest {
    /// Read the latest version of `key`.
    pub fn for_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Read exactly `version`.
    pub fn for_version(version: VersionId) -> Self {
        Self {
            version: Some(version),
            ..Self::default()
        }
    }

    /// Also name the key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Read `version` instead of the latest.
    pub fn with_version(mut self, version: VersionId) -> Self {
        self.version = Some(version);
        self
    }

    /// Override the configured operation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// An object version together with where it was filed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub version: VersionId,
    pub job: JobId,
    pub key: String,
    pub object_type: String,
    pub object: Object,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobLinkPayload<'a> {
    job_id: &'a JobId,
    version_id: VersionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
}

/// A versioned key-value store over a [`Gateway`].
pub struct VersionedStore<G: Gateway + ?Sized> {
    registry: MetadataRegistry<G>,
    validator: Arc<dyn PayloadValidator>,
    config: StoreConfig,
}

impl<G: Gateway + ?Sized> VersionedStore<G> {
    /// Create a store drawing ids from the process-wide generator.
    pub fn new(gateway: Arc<G>, config: StoreConfig) -> Self {
        Self::with_generator(gateway, IdGenerator::shared(), config)
    }

    /// Create a store drawing ids from `ids`.
    pub fn with_generator(gateway: Arc<G>, ids: Arc<IdGenerator>, config: StoreConfig) -> Self {
        Self {
            registry: MetadataRegistry::new(gateway, ids, config.op_timeout()),
            validator: Arc::new(AcceptAll),
            config,
        }
    }

    /// Replace the validate-on-write hook.
    pub fn with_validator(mut self, validator: impl PayloadValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The metadata registry behind this store.
    pub fn registry(&self) -> &MetadataRegistry<G> {
        &self.registry
    }

    pub(crate) fn gateway(&self) -> &G {
        self.registry.gateway()
    }

    pub(crate) fn deadline(&self, timeout: Option<Duration>) -> Deadline {
        Deadline::after(timeout.unwrap_or_else(|| self.config.op_timeout()))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Register `key`, optionally populating it with `initial`.
    ///
    /// The registration record is committed before the initial object is
    /// written. If that write fails the registration stays in place with
    /// `init` cleared and [`StoreError::InitialPopulationFailed`] is
    /// returned. Re-registering an existing key keeps its version pointer.
    pub fn register(
        &self,
        key: &str,
        initial: Option<Value>,
        opts: RegisterOptions,
    ) -> StoreResult<MetadataRecord> {
        let ctx = ErrorContext::new(Operation::Register).with_key(key);
        if key.is_empty() {
            return Err(StoreError::EmptyKey { ctx });
        }
        if opts.init && initial.is_none() {
            return Err(StoreError::InvalidInit { ctx });
        }
        let initial = initial
            .map(require_object)
            .transpose()
            .map_err(|source| StoreError::InvalidPayload {
                ctx: ctx.clone(),
                source,
            })?;

        let deadline = self.deadline(opts.timeout);
        let strict = self.config.strict_registration;
        let record = with_transaction(self.gateway(), deadline, |tx| -> Result<_, TxError> {
            let existing = read_record(tx, key, None, &ctx)?;
            if strict && existing.as_ref().is_some_and(MetadataRecord::is_live) {
                return Err(StoreError::AlreadyRegistered { ctx: ctx.clone() }.into());
            }
            let schema_key = opts
                .schema_key
                .clone()
                .or_else(|| existing.as_ref().map(|r| r.schema_key.clone()))
                .unwrap_or_else(|| key.to_string());
            let mut record = MetadataRecord::registered(key, schema_key);
            if let Some(previous) = existing {
                record.version = previous.version;
                record.job = previous.job;
            }
            record.init = opts.init;
            record.check = opts.check;
            write_record(tx, &record, ErrorKind::RegistrationWriteFailed, &ctx)?;
            Ok(record)
        })
        .map_err(|e: TxError| e.attribute(ErrorKind::RegistrationWriteFailed, &ctx))?;
        debug!(key, schema_key = %record.schema_key, "registered");

        let Some(object) = initial else {
            return Ok(record);
        };
        let set_opts = SetOptions {
            job: None,
            schema_key: Some(record.schema_key.clone()),
            check: opts.check,
            timeout: opts.timeout,
        };
        let write = self.write(
            Operation::Set,
            key,
            object,
            &set_opts,
            LastOp::RegisterAndSet,
            deadline,
        );
        match write {
            Ok(updated) => Ok(updated),
            Err(err) => {
                // Own deadline: the shared one may be spent.
                if let Err(e) = self.clear_init(key, self.deadline(opts.timeout), &ctx) {
                    warn!(key, error = %e, "could not clear init flag after failed population");
                }
                Err(StoreError::InitialPopulationFailed {
                    ctx,
                    source: Box::new(err),
                })
            }
        }
    }

    /// Write a new version of `key`. Registers the key implicitly unless
    /// strict registration is configured.
    pub fn set(&self, key: &str, value: Value, opts: SetOptions) -> StoreResult<MetadataRecord> {
        self.set_as(Operation::Set, key, value, &opts)
    }

    /// Append a version of `key` filed under its own schema group.
    pub fn publish(
        &self,
        key: &str,
        value: Value,
        job: Option<JobId>,
    ) -> StoreResult<MetadataRecord> {
        let opts = SetOptions {
            job,
            schema_key: Some(key.to_string()),
            ..SetOptions::default()
        };
        self.set_as(Operation::Publish, key, value, &opts)
    }

    fn set_as(
        &self,
        op: Operation,
        key: &str,
        value: Value,
        opts: &SetOptions,
    ) -> StoreResult<MetadataRecord> {
        let ctx = ErrorContext::new(op).with_key(key);
        if key.is_empty() {
            return Err(StoreError::EmptyKey { ctx });
        }
        let object = require_object(value).map_err(|source| StoreError::InvalidPayload {
            ctx: ctx.clone(),
            source,
        })?;
        self.write(op, key, object, opts, LastOp::Set, self.deadline(opts.timeout))
    }

    fn write(
        &self,
        op: Operation,
        key: &str,
        object: Object,
        opts: &SetOptions,
        last_op: LastOp,
        deadline: Deadline,
    ) -> StoreResult<MetadataRecord> {
        let version = self.registry.ids().next();
        let job = opts.job.clone().unwrap_or_else(|| JobId::from(version));
        let ctx = ErrorContext::new(op).with_key(key).with_version(version);
        let hint = opts.schema_key.as_deref().unwrap_or(key);
        let strict = self.config.strict_registration;

        let record = with_transaction(self.gateway(), deadline, |tx| -> Result<_, TxError> {
            // A group match only contributes its check flag; the record
            // written is always the key's own.
            let (own, group_check) = match read_record(tx, key, Some(hint), &ctx)? {
                Some(found) if found.key == key => (Some(found), false),
                Some(found) => (None, found.check),
                None => (None, false),
            };
            if strict && !own.as_ref().is_some_and(MetadataRecord::is_live) {
                return Err(StoreError::NotRegistered { ctx: ctx.clone() }.into());
            }
            let implicit = own.is_none();
            let mut record = own.unwrap_or_else(|| {
                let mut fresh = MetadataRecord::registered(key, hint);
                fresh.check = opts.check;
                fresh
            });
            if let Some(schema_key) = &opts.schema_key {
                record.schema_key = schema_key.clone();
            }

            if opts.check || record.check || group_check {
                if let Verdict::Reject { reason } =
                    self.validator.validate(key, &record.schema_key, &object)
                {
                    return Err(StoreError::ValidationRejected {
                        ctx: ctx.clone(),
                        reason,
                    }
                    .into());
                }
            }

            let payload = serde_json::to_vec(&object)
                .map_err(|e| encode_failure(ErrorKind::PayloadWriteFailed, &ctx, e))?;
            let row = ObjectVersionRow {
                version,
                job: job.clone(),
                key: key.to_string(),
                object_type: record.schema_key.clone(),
                payload,
            };
            tx.insert_object_version(&row)
                .and_then(|n| expect_single(n, "object version"))
                .map_err(|e| StoreError::gateway(ErrorKind::PayloadWriteFailed, ctx.clone(), e))?;

            record.init = true;
            record.last_op = last_op;
            record.tombstone = ALIVE_TOKEN;
            record.point_to(version, job.clone());
            write_record(tx, &record, ErrorKind::MetadataWriteFailed, &ctx)?;

            let link = encode_link(&job, version, Some(key))
                .map_err(|e| encode_failure(ErrorKind::PayloadWriteFailed, &ctx, e))?;
            tx.insert_job_link(&job, &version, &link)
                .and_then(|n| expect_single(n, "job link"))
                .map_err(|e| StoreError::gateway(ErrorKind::PayloadWriteFailed, ctx.clone(), e))?;

            debug!(key, %version, %job, implicit, "object version written");
            Ok(record)
        })
        .map_err(|e: TxError| e.attribute(ErrorKind::PayloadWriteFailed, &ctx))?;
        Ok(record)
    }

    /// Re-read the key's own record and store it with `init` cleared.
    fn clear_init(&self, key: &str, deadline: Deadline, ctx: &ErrorContext) -> StoreResult<()> {
        with_transaction(self.gateway(), deadline, |tx| -> Result<_, TxError> {
            if let Some(mut record) = read_record(tx, key, None, ctx)? {
                record.init = false;
                write_record(tx, &record, ErrorKind::MetadataWriteFailed, ctx)?;
            }
            Ok(())
        })
        .map_err(|e: TxError| e.attribute(ErrorKind::MetadataWriteFailed, ctx))
    }

    /// Soft-delete `key`. Returns `false` if the key has no record.
    pub fn unregister(&self, key: &str) -> bool {
        self.registry.unregister(key)
    }

    /// Record an additional link from `job` to an existing `version`.
    ///
    /// Returns `true` only if a new link was created.
    pub fn link_job(&self, job: &JobId, version: VersionId) -> bool {
        let ctx = ErrorContext::new(Operation::LinkJob).with_version(version);
        let result = with_transaction(
            self.gateway(),
            self.deadline(None),
            |tx| -> Result<_, TxError> {
                let link = encode_link(job, version, None)
                    .map_err(|e| encode_failure(ErrorKind::PayloadWriteFailed, &ctx, e))?;
                let affected = tx.insert_job_link(job, &version, &link).map_err(|e| {
                    StoreError::gateway(ErrorKind::PayloadWriteFailed, ctx.clone(), e)
                })?;
                Ok(affected == 1)
            },
        )
        .map_err(|e: TxError| e.attribute(ErrorKind::PayloadWriteFailed, &ctx));

        match result {
            Ok(created) => created,
            Err(e) => {
                warn!(%job, %version, error = %e, "job link failed");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Read an object: the explicit version if given, else the key's latest.
    pub fn get(&self, request: GetRequest) -> StoreResult<Object> {
        self.fetch(request).map(|stored| stored.object)
    }

    /// Like [`get`](Self::get), also returning where the version was filed.
    pub fn fetch(&self, request: GetRequest) -> StoreResult<StoredObject> {
        let deadline = self.deadline(request.timeout);
        let key = request.key.as_deref().filter(|k| !k.is_empty());
        let mut ctx = ErrorContext::new(Operation::Get);
        if let Some(key) = key {
            ctx = ctx.with_key(key);
        }

        let version = match (request.version.filter(|v| !v.is_unset()), key) {
            (Some(version), _) => version,
            (None, Some(key)) => self.resolve_latest(key, deadline, &ctx)?,
            (None, None) => return Err(StoreError::MissingKey { ctx }),
        };
        let ctx = ctx.with_version(version);

        let row = self
            .gateway()
            .get_object_version(&version, deadline)
            .map_err(|e| StoreError::gateway(ErrorKind::FetchFailed, ctx.clone(), e))?
            .ok_or_else(|| StoreError::NoVersion { ctx: ctx.clone() })?;
        let object: Object = serde_json::from_slice(&row.payload)
            .map_err(|source| StoreError::DecodeFailed { ctx, source })?;

        debug!(%version, key = %row.key, "object version read");
        Ok(StoredObject {
            version,
            job: row.job,
            key: row.key,
            object_type: row.object_type,
            object,
        })
    }

    fn resolve_latest(
        &self,
        key: &str,
        deadline: Deadline,
        ctx: &ErrorContext,
    ) -> StoreResult<VersionId> {
        let record = self.registry.lookup(key, Some(key), deadline, ctx)?;
        record
            .filter(MetadataRecord::is_live)
            .and_then(|r| r.latest_version())
            .ok_or_else(|| StoreError::NoVersion { ctx: ctx.clone() })
    }

    /// Returns `true` iff `key` resolves to a live registration.
    pub fn has(&self, key: &str) -> bool {
        self.registry.is_registered(key)
    }

    /// The metadata record for `key`, resolved through `schema_hint` (the
    /// key itself by default) when the key has no record of its own.
    pub fn metadata(
        &self,
        key: &str,
        schema_hint: Option<&str>,
    ) -> StoreResult<Option<MetadataRecord>> {
        self.registry
            .get_metadata(key, Some(schema_hint.unwrap_or(key)))
    }

    /// Returns `true` iff an object version with this id exists.
    pub fn has_version(&self, version: VersionId) -> bool {
        match self.gateway().get_object_version(&version, self.deadline(None)) {
            Ok(row) => row.is_some(),
            Err(e) => {
                warn!(%version, error = %e, "version probe failed");
                false
            }
        }
    }

    /// Highest version id ever written under `key`, according to the
    /// object index rather than the metadata pointer.
    pub fn latest_version_id(&self, key: &str) -> StoreResult<Option<VersionId>> {
        let ctx = ErrorContext::new(Operation::LatestVersion).with_key(key);
        self.gateway()
            .get_latest_version_id(key, self.deadline(None))
            .map_err(|e| StoreError::gateway(ErrorKind::FetchFailed, ctx, e))
    }

    /// Versions linked to `job`, ascending.
    pub fn job_versions(&self, job: &JobId) -> StoreResult<Vec<VersionId>> {
        let ctx = ErrorContext::new(Operation::JobVersions);
        self.gateway()
            .list_job_versions(job, self.deadline(None))
            .map_err(|e| StoreError::gateway(ErrorKind::FetchFailed, ctx, e))
    }

    /// Lazily list versions whose object type is `object_type` and whose job
    /// matches the glob `job_pattern` (everything when `None`), in ascending
    /// version order.
    pub fn list_versions_by_type(
        &self,
        object_type: &str,
        job_pattern: Option<&str>,
    ) -> VersionListing<'_, G> {
        VersionListing::new(self, object_type, job_pattern)
    }

    /// Record counts per kind.
    pub fn stats(&self) -> StoreResult<GatewayStats> {
        self.gateway()
            .stats(self.deadline(None))
            .map_err(|e| {
                StoreError::gateway(ErrorKind::FetchFailed, ErrorContext::new(Operation::Stats), e)
            })
    }

    /// Check that the gateway answers.
    pub fn ping(&self) -> StoreResult<()> {
        self.gateway()
            .ping(self.deadline(None))
            .map_err(|e| {
                StoreError::gateway(ErrorKind::FetchFailed, ErrorContext::new(Operation::Stats), e)
            })
    }
}

fn encode_link(
    job: &JobId,
    version: VersionId,
    key: Option<&str>,
) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&JobLinkPayload {
        job_id: job,
        version_id: version,
        key,
    })
}
