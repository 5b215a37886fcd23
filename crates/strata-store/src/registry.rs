//! The Metadata Registry: owner of the per-key control record.
//!
//! Records are stored as JSON through the gateway's metadata table, one row
//! per key. Lookups try the exact key first and fall back to the record
//! group named by a schema hint.

use std::sync::Arc;
use std::time::Duration;

use strata_gateway::{expect_single, with_transaction, Deadline, Gateway, GatewayTx};
use strata_types::{IdGenerator, MetadataRecord};
use tracing::{debug, warn};

use crate::error::{ErrorContext, ErrorKind, Operation, StoreError, StoreResult, TxError};

/// Reads and writes [`MetadataRecord`]s.
pub struct MetadataRegistry<G: Gateway + ?Sized> {
    gateway: Arc<G>,
    ids: Arc<IdGenerator>,
    op_timeout: Duration,
}

impl<G: Gateway + ?Sized> MetadataRegistry<G> {
    /// Registry over `gateway`, drawing tombstones from `ids`.
    pub fn new(gateway: Arc<G>, ids: Arc<IdGenerator>, op_timeout: Duration) -> Self {
        Self {
            gateway,
            ids,
            op_timeout,
        }
    }

    /// The gateway records are stored through.
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// The id generator used for tombstones and new versions.
    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    /// A fresh deadline for one operation.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.op_timeout)
    }

    /// Upsert the record for `record.key`. Returns `false` on any failure.
    pub fn set_metadata(&self, record: &MetadataRecord) -> bool {
        match self.try_set_metadata(record) {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %record.key, error = %e, "metadata write failed");
                false
            }
        }
    }

    /// Upsert the record for `record.key`.
    pub fn try_set_metadata(&self, record: &MetadataRecord) -> StoreResult<()> {
        let ctx = ErrorContext::new(Operation::Metadata).with_key(&record.key);
        with_transaction(self.gateway.as_ref(), self.deadline(), |tx| {
            write_record(tx, record, ErrorKind::MetadataWriteFailed, &ctx)
        })
        .map_err(|e: TxError| e.attribute(ErrorKind::MetadataWriteFailed, &ctx))
    }

    /// Look up the record for `key`, falling back to the first record whose
    /// schema key equals `schema_hint`. Tombstoned records are returned too.
    pub fn get_metadata(
        &self,
        key: &str,
        schema_hint: Option<&str>,
    ) -> StoreResult<Option<MetadataRecord>> {
        let ctx = ErrorContext::new(Operation::Metadata).with_key(key);
        self.lookup(key, schema_hint, self.deadline(), &ctx)
    }

    pub(crate) fn lookup(
        &self,
        key: &str,
        schema_hint: Option<&str>,
        deadline: Deadline,
        ctx: &ErrorContext,
    ) -> StoreResult<Option<MetadataRecord>> {
        let bytes = self
            .gateway
            .get_metadata(key, schema_hint, deadline)
            .map_err(|e| StoreError::gateway(ErrorKind::FetchFailed, ctx.clone(), e))?;
        bytes.map(|b| decode_record(&b, ctx)).transpose()
    }

    /// Returns `true` iff a live record resolves for `key` (directly or via
    /// its group). Failures count as "not registered".
    pub fn is_registered(&self, key: &str) -> bool {
        match self.get_metadata(key, Some(key)) {
            Ok(Some(record)) => record.is_live(),
            Ok(None) => false,
            Err(e) => {
                warn!(key, error = %e, "registration probe failed");
                false
            }
        }
    }

    /// Soft-delete `key` by giving its record a fresh tombstone.
    ///
    /// Returns `false` if `key` has no record of its own or the write fails.
    /// Repeated calls re-tombstone the key and keep returning `true`.
    pub fn unregister(&self, key: &str) -> bool {
        let ctx = ErrorContext::new(Operation::Unregister).with_key(key);
        let result = with_transaction(
            self.gateway.as_ref(),
            self.deadline(),
            |tx| -> Result<_, TxError> {
                let Some(mut record) = read_record(tx, key, None, &ctx)? else {
                    return Ok(false);
                };
                record.tombstone = self.ids.next();
                write_record(tx, &record, ErrorKind::MetadataWriteFailed, &ctx)?;
                debug!(key, tombstone = %record.tombstone, "unregistered");
                Ok(true)
            },
        )
        .map_err(|e: TxError| e.attribute(ErrorKind::MetadataWriteFailed, &ctx));

        match result {
            Ok(done) => done,
            Err(e) => {
                warn!(key, error = %e, "unregister failed");
                false
            }
        }
    }
}

/// Read a record inside a transaction.
pub(crate) fn read_record(
    tx: &mut dyn GatewayTx,
    key: &str,
    schema_hint: Option<&str>,
    ctx: &ErrorContext,
) -> Result<Option<MetadataRecord>, TxError> {
    let bytes = tx
        .get_metadata(key, schema_hint)
        .map_err(|e| StoreError::gateway(ErrorKind::FetchFailed, ctx.clone(), e))?;
    Ok(bytes.map(|b| decode_record(&b, ctx)).transpose()?)
}

/// Upsert a record inside a transaction, attributing failures to `kind`.
pub(crate) fn write_record(
    tx: &mut dyn GatewayTx,
    record: &MetadataRecord,
    kind: ErrorKind,
    ctx: &ErrorContext,
) -> Result<(), TxError> {
    let payload = serde_json::to_vec(record).map_err(|e| encode_failure(kind, ctx, e))?;
    tx.insert_metadata(&record.key, &record.schema_key, &payload)
        .and_then(|n| expect_single(n, "metadata"))
        .map_err(|e| StoreError::gateway(kind, ctx.clone(), e))?;
    Ok(())
}

fn decode_record(bytes: &[u8], ctx: &ErrorContext) -> StoreResult<MetadataRecord> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::DecodeFailed {
        ctx: ctx.clone(),
        source,
    })
}

pub(crate) fn encode_failure(
    kind: ErrorKind,
    ctx: &ErrorContext,
    err: serde_json::Error,
) -> StoreError {
    let ctx = ctx.clone();
    let source = Box::new(err);
    match kind {
        ErrorKind::RegistrationWriteFailed => StoreError::RegistrationWriteFailed { ctx, source },
        ErrorKind::PayloadWriteFailed => StoreError::PayloadWriteFailed { ctx, source },
        _ => StoreError::MetadataWriteFailed { ctx, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_gateway::{FaultPoint, InMemoryGateway};
    use strata_types::VersionId;

    fn registry() -> (Arc<InMemoryGateway>, MetadataRegistry<InMemoryGateway>) {
        let gateway = Arc::new(InMemoryGateway::new());
        let registry = MetadataRegistry::new(
            Arc::clone(&gateway),
            Arc::new(IdGenerator::new()),
            Duration::from_secs(5),
        );
        (gateway, registry)
    }

    #[test]
    fn set_then_get() {
        let (_, reg) = registry();
        let record = MetadataRecord::registered("person", "person");
        assert!(reg.set_metadata(&record));
        assert_eq!(reg.get_metadata("person", None).unwrap(), Some(record));
        assert!(reg.is_registered("person"));
    }

    #[test]
    fn missing_key_is_none() {
        let (_, reg) = registry();
        assert_eq!(reg.get_metadata("nobody", Some("nobody")).unwrap(), None);
        assert!(!reg.is_registered("nobody"));
    }

    #[test]
    fn lookup_by_group() {
        let (_, reg) = registry();
        let record = MetadataRecord::registered("person/1", "person");
        reg.try_set_metadata(&record).unwrap();

        assert_eq!(reg.get_metadata("person", Some("person")).unwrap(), Some(record));
        assert!(reg.is_registered("person"));
        assert_eq!(reg.get_metadata("person", None).unwrap(), None);
    }

    #[test]
    fn unregister_missing_key_is_false() {
        let (gateway, reg) = registry();
        assert!(!reg.unregister("ghost"));
        assert_eq!(gateway.stats(Deadline::unbounded()).unwrap().metadata, 0);
    }

    #[test]
    fn unregister_is_repeatable() {
        let (_, reg) = registry();
        reg.try_set_metadata(&MetadataRecord::registered("k", "k")).unwrap();

        assert!(reg.unregister("k"));
        let first = reg.get_metadata("k", None).unwrap().unwrap().tombstone;
        assert!(!reg.is_registered("k"));

        assert!(reg.unregister("k"));
        let second = reg.get_metadata("k", None).unwrap().unwrap().tombstone;
        assert!(!reg.is_registered("k"));

        assert_ne!(first, VersionId::UNSET);
        assert_ne!(first, second);
    }

    #[test]
    fn unregister_does_not_follow_groups() {
        let (_, reg) = registry();
        reg.try_set_metadata(&MetadataRecord::registered("person/1", "person"))
            .unwrap();
        assert!(!reg.unregister("person"));
        assert!(reg.is_registered("person/1"));
    }

    #[test]
    fn failed_write_reports_false_and_leaves_nothing() {
        let (gateway, reg) = registry();
        gateway.inject_fault(FaultPoint::Metadata);
        assert!(!reg.set_metadata(&MetadataRecord::registered("k", "k")));
        assert_eq!(reg.get_metadata("k", None).unwrap(), None);
    }

    #[test]
    fn write_failure_kind() {
        let (gateway, reg) = registry();
        gateway.inject_fault(FaultPoint::Commit);
        let err = reg
            .try_set_metadata(&MetadataRecord::registered("k", "k"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MetadataWriteFailed);
    }

    #[test]
    fn corrupt_record_is_surfaced() {
        let (gateway, reg) = registry();
        with_transaction(gateway.as_ref(), Deadline::unbounded(), |tx| {
            tx.insert_metadata("k", "k", b"not json")
        })
        .unwrap();
        let err = reg.get_metadata("k", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeFailed);
        assert!(!reg.is_registered("k"));
    }
}
