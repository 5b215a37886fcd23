//! Lazy, restartable listings of version ids.
//!
//! A [`VersionListing`] is a description of a query. Each call to
//! [`VersionListing::iter`] starts a fresh pass that pulls pages of ids from
//! the gateway on demand, resuming after the last id it has seen.

use std::collections::VecDeque;

use strata_gateway::{Gateway, MATCH_ALL};
use strata_types::VersionId;

use crate::error::{ErrorContext, ErrorKind, Operation, StoreError, StoreResult};
use crate::store::VersionedStore;

/// Versions of one object type, optionally restricted to matching jobs.
pub struct VersionListing<'s, G: Gateway + ?Sized> {
    store: &'s VersionedStore<G>,
    object_type: String,
    job_pattern: String,
}

impl<'s, G: Gateway + ?Sized> VersionListing<'s, G> {
    pub(crate) fn new(
        store: &'s VersionedStore<G>,
        object_type: &str,
        job_pattern: Option<&str>,
    ) -> Self {
        Self {
            store,
            object_type: object_type.to_string(),
            job_pattern: job_pattern.unwrap_or(MATCH_ALL).to_string(),
        }
    }

    /// Object type the listing filters on.
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// Job glob the listing filters on (`*` when unrestricted).
    pub fn job_pattern(&self) -> &str {
        &self.job_pattern
    }

    /// Start a new pass over the listing.
    pub fn iter(&self) -> VersionIter<'_, G> {
        VersionIter {
            store: self.store,
            object_type: &self.object_type,
            job_pattern: &self.job_pattern,
            page_size: self.store.config().page_size(),
            cursor: None,
            buffer: VecDeque::new(),
            done: false,
        }
    }
}

impl<'a, 's, G: Gateway + ?Sized> IntoIterator for &'a VersionListing<'s, G> {
    type Item = StoreResult<VersionId>;
    type IntoIter = VersionIter<'a, G>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One pass over a [`VersionListing`].
///
/// Yields ids in ascending order. A gateway failure is yielded once as an
/// `Err`, after which the iterator is exhausted.
pub struct VersionIter<'a, G: Gateway + ?Sized> {
    store: &'a VersionedStore<G>,
    object_type: &'a str,
    job_pattern: &'a str,
    page_size: usize,
    cursor: Option<VersionId>,
    buffer: VecDeque<VersionId>,
    done: bool,
}

impl<G: Gateway + ?Sized> VersionIter<'_, G> {
    fn fill(&mut self) -> StoreResult<()> {
        let page = self
            .store
            .gateway()
            .list_version_ids_by_type(
                self.object_type,
                self.job_pattern,
                self.cursor,
                self.page_size,
                self.store.deadline(None),
            )
            .map_err(|e| {
                let mut ctx = ErrorContext::new(Operation::List).with_key(self.object_type);
                ctx.version = self.cursor;
                StoreError::gateway(ErrorKind::FetchFailed, ctx, e)
            })?;
        if page.len() < self.page_size {
            self.done = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some(*last);
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<G: Gateway + ?Sized> Iterator for VersionIter<'_, G> {
    type Item = StoreResult<VersionId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use strata_gateway::{Deadline, InMemoryGateway};
    use strata_types::{IdGenerator, JobId};

    use crate::config::StoreConfig;
    use crate::store::SetOptions;

    fn store(page: usize) -> (Arc<InMemoryGateway>, VersionedStore<InMemoryGateway>) {
        let gateway = Arc::new(InMemoryGateway::new());
        let config = StoreConfig {
            list_page_size: page,
            ..StoreConfig::default()
        };
        let store =
            VersionedStore::with_generator(Arc::clone(&gateway), Arc::new(IdGenerator::new()), config);
        (gateway, store)
    }

    fn write(store: &VersionedStore<InMemoryGateway>, key: &str, ty: &str, job: &str) -> VersionId {
        store
            .set(
                key,
                json!({"k": key}),
                SetOptions::new()
                    .schema_key(ty)
                    .job(JobId::new(job).unwrap()),
            )
            .unwrap()
            .version
    }

    fn collect(listing: &VersionListing<'_, InMemoryGateway>) -> Vec<VersionId> {
        listing.iter().collect::<StoreResult<_>>().unwrap()
    }

    #[test]
    fn pages_through_everything_in_order() {
        let (_, store) = store(2);
        let expected: Vec<_> = (0..7)
            .map(|i| write(&store, &format!("p{i}"), "Person", "bulk"))
            .collect();
        write(&store, "x", "Place", "bulk");

        let listing = store.list_versions_by_type("Person", None);
        assert_eq!(listing.job_pattern(), "*");
        assert_eq!(collect(&listing), expected);
    }

    #[test]
    fn exact_page_multiple() {
        let (_, store) = store(2);
        let expected: Vec<_> = (0..4)
            .map(|i| write(&store, &format!("p{i}"), "T", "j"))
            .collect();
        assert_eq!(collect(&store.list_versions_by_type("T", None)), expected);
    }

    #[test]
    fn job_pattern_filters() {
        let (_, store) = store(3);
        let a = write(&store, "a", "T", "import-2024-01");
        write(&store, "b", "T", "manual");
        let c = write(&store, "c", "T", "import-2024-02");

        let listing = store.list_versions_by_type("T", Some("import-*"));
        assert_eq!(collect(&listing), vec![a, c]);
    }

    #[test]
    fn listing_is_restartable_and_sees_new_writes() {
        let (_, store) = store(2);
        let first = write(&store, "a", "T", "j");
        let listing = store.list_versions_by_type("T", None);
        assert_eq!(collect(&listing), vec![first]);

        let second = write(&store, "b", "T", "j");
        assert_eq!(collect(&listing), vec![first, second]);
        assert_eq!((&listing).into_iter().count(), 2);
    }

    #[test]
    fn iteration_is_lazy() {
        let (_, store) = store(1);
        for i in 0..3 {
            write(&store, &format!("k{i}"), "T", "j");
        }
        let listing = store.list_versions_by_type("T", None);
        let first_two: Vec<_> = listing.iter().take(2).collect::<StoreResult<_>>().unwrap();
        assert_eq!(first_two.len(), 2);
    }

    #[test]
    fn unknown_type_is_empty() {
        let (_, store) = store(4);
        write(&store, "a", "T", "j");
        assert!(collect(&store.list_versions_by_type("Nope", None)).is_empty());
    }

    #[test]
    fn gateway_failure_is_yielded_once() {
        let (gateway, store) = store(4);
        write(&store, "a", "T", "j");
        let _held = gateway.begin(Deadline::unbounded()).unwrap();

        let store = VersionedStore::with_generator(
            Arc::clone(&gateway),
            Arc::new(IdGenerator::new()),
            StoreConfig {
                op_timeout_ms: 10,
                ..StoreConfig::default()
            },
        );
        let listing = store.list_versions_by_type("T", None);
        let mut iter = listing.iter();
        let err = iter.next().unwrap().unwrap_err();
        assert!(err.is_timeout());
        assert!(iter.next().is_none());
    }
}
