//! Durable gateway backed by a single SQLite database.
//!
//! One connection is shared behind a mutex. Write transactions start with
//! `BEGIN IMMEDIATE` so lock contention surfaces at `begin` rather than at
//! the first write. The connection's busy timeout is re-armed before every
//! statement with whatever is left of the caller's deadline.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use strata_types::{JobId, VersionId};
use tracing::{debug, info, warn};

use crate::deadline::Deadline;
use crate::error::{GatewayError, GatewayResult};
use crate::pattern::to_sqlite_glob;
use crate::rows::{GatewayStats, ObjectVersionRow};
use crate::traits::{Gateway, GatewayTx};

/// Busy timeout used for unbounded deadlines.
const UNBOUNDED_BUSY: Duration = Duration::from_secs(86_400);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metadata (
    meta_key   TEXT PRIMARY KEY NOT NULL,
    schema_key TEXT NOT NULL,
    payload    BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS metadata_schema_key ON metadata (schema_key, meta_key);

CREATE TABLE IF NOT EXISTS object_version (
    version_id TEXT PRIMARY KEY NOT NULL,
    job_id     TEXT NOT NULL,
    obj_key    TEXT NOT NULL,
    obj_type   TEXT NOT NULL,
    payload    BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS object_version_key ON object_version (obj_key, version_id);
CREATE INDEX IF NOT EXISTS object_version_type ON object_version (obj_type, version_id);

CREATE TABLE IF NOT EXISTS job_link (
    job_id     TEXT NOT NULL,
    version_id TEXT NOT NULL REFERENCES object_version (version_id),
    payload    BLOB NOT NULL,
    PRIMARY KEY (job_id, version_id)
);
";

/// SQLite implementation of [`Gateway`].
pub struct SqliteGateway {
    conn: Mutex<Connection>,
    location: String,
}

impl SqliteGateway {
    /// Open (or create) the database at `path`, creating parent directories
    /// as needed.
    pub fn open(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
        let gateway = Self::with_connection(conn, path.display().to_string())?;
        info!(location = %gateway.location, "opened sqlite gateway");
        Ok(gateway)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> GatewayResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, ":memory:".to_string())
    }

    fn with_connection(conn: Connection, location: String) -> GatewayResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    /// Where the database lives.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Close the connection, reporting any error SQLite raises while doing so.
    pub fn close(self) -> GatewayResult<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|e| GatewayError::Poisoned(e.to_string()))?;
        conn.close().map_err(|(_, err)| GatewayError::Sqlite(err))?;
        debug!(location = %self.location, "closed sqlite gateway");
        Ok(())
    }

    fn connection(&self, deadline: Deadline) -> GatewayResult<MutexGuard<'_, Connection>> {
        let conn = deadline.acquire(|| self.conn.try_lock())?;
        arm(&conn, &deadline)?;
        Ok(conn)
    }
}

impl fmt::Debug for SqliteGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteGateway")
            .field("location", &self.location)
            .finish()
    }
}

/// Fail if the deadline passed, otherwise let SQLite wait on locks for at
/// most the remaining budget.
fn arm(conn: &Connection, deadline: &Deadline) -> GatewayResult<()> {
    deadline.check()?;
    let busy = deadline.remaining().unwrap_or(UNBOUNDED_BUSY);
    conn.busy_timeout(busy)
        .map_err(|e| classify(e, deadline))
}

fn classify(err: rusqlite::Error, deadline: &Deadline) -> GatewayError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => deadline.timeout(),
        _ => GatewayError::Sqlite(err),
    }
}

fn parse_version(text: &str) -> GatewayResult<VersionId> {
    text.parse()
        .map_err(|e| GatewayError::CorruptRow(format!("version id {text:?}: {e}")))
}

fn parse_job(text: String) -> GatewayResult<JobId> {
    JobId::new(text).map_err(|e| GatewayError::CorruptRow(e.to_string()))
}

fn lookup_metadata(
    conn: &Connection,
    key: &str,
    schema_hint: Option<&str>,
    deadline: &Deadline,
) -> GatewayResult<Option<Vec<u8>>> {
    let exact = conn
        .query_row(
            "SELECT payload FROM metadata WHERE meta_key = ?1",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| classify(e, deadline))?;
    if exact.is_some() {
        return Ok(exact);
    }
    let Some(hint) = schema_hint else {
        return Ok(None);
    };
    conn.query_row(
        "SELECT payload FROM metadata WHERE schema_key = ?1 ORDER BY meta_key LIMIT 1",
        params![hint],
        |row| row.get::<_, Vec<u8>>(0),
    )
    .optional()
    .map_err(|e| classify(e, deadline))
}

fn collect_versions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    deadline: &Deadline,
) -> GatewayResult<Vec<VersionId>> {
    let mut stmt = conn.prepare_cached(sql).map_err(|e| classify(e, deadline))?;
    let ids = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(|e| classify(e, deadline))?;
    let mut out = Vec::new();
    for id in ids {
        let id = id.map_err(|e| classify(e, deadline))?;
        out.push(parse_version(&id)?);
    }
    Ok(out)
}

fn count(conn: &Connection, table: &str, deadline: &Deadline) -> GatewayResult<u64> {
    let n: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .map_err(|e| classify(e, deadline))?;
    Ok(n.max(0) as u64)
}

struct SqliteTx<'g> {
    conn: MutexGuard<'g, Connection>,
    deadline: Deadline,
    finished: bool,
}

impl SqliteTx<'_> {
    fn arm(&self) -> GatewayResult<()> {
        arm(&self.conn, &self.deadline)
    }
}

impl GatewayTx for SqliteTx<'_> {
    fn insert_object_version(&mut self, row: &ObjectVersionRow) -> GatewayResult<u64> {
        self.arm()?;
        let affected = self
            .conn
            .execute(
                "INSERT INTO object_version (version_id, job_id, obj_key, obj_type, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.version.to_string(),
                    row.job.as_str(),
                    row.key,
                    row.object_type,
                    row.payload
                ],
            )
            .map_err(|e| match e.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => GatewayError::Duplicate {
                    what: "object version",
                    id: row.version.to_string(),
                },
                _ => classify(e, &self.deadline),
            })?;
        Ok(affected as u64)
    }

    fn insert_metadata(
        &mut self,
        key: &str,
        schema_key: &str,
        payload: &[u8],
    ) -> GatewayResult<u64> {
        self.arm()?;
        let affected = self
            .conn
            .execute(
                "INSERT INTO metadata (meta_key, schema_key, payload) VALUES (?1, ?2, ?3)
                 ON CONFLICT (meta_key) DO UPDATE
                 SET schema_key = excluded.schema_key, payload = excluded.payload",
                params![key, schema_key, payload],
            )
            .map_err(|e| classify(e, &self.deadline))?;
        Ok(affected as u64)
    }

    fn insert_job_link(
        &mut self,
        job: &JobId,
        version: &VersionId,
        payload: &[u8],
    ) -> GatewayResult<u64> {
        self.arm()?;
        let version_text = version.to_string();
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM object_version WHERE version_id = ?1",
                params![version_text],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| classify(e, &self.deadline))?
            .is_some();
        if !exists {
            return Err(GatewayError::NotFound {
                what: "object version",
                id: version_text,
            });
        }
        let affected = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO job_link (job_id, version_id, payload) VALUES (?1, ?2, ?3)",
                params![job.as_str(), version_text, payload],
            )
            .map_err(|e| classify(e, &self.deadline))?;
        Ok(affected as u64)
    }

    fn get_metadata(
        &mut self,
        key: &str,
        schema_hint: Option<&str>,
    ) -> GatewayResult<Option<Vec<u8>>> {
        self.arm()?;
        lookup_metadata(&self.conn, key, schema_hint, &self.deadline)
    }

    fn commit(mut self: Box<Self>) -> GatewayResult<()> {
        self.arm()?;
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| classify(e, &self.deadline))?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            warn!(error = %e, "sqlite rollback failed");
        }
    }
}

impl Gateway for SqliteGateway {
    fn begin(&self, deadline: Deadline) -> GatewayResult<Box<dyn GatewayTx + '_>> {
        let conn = self.connection(deadline)?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| classify(e, &deadline))?;
        Ok(Box::new(SqliteTx {
            conn,
            deadline,
            finished: false,
        }))
    }

    fn get_metadata(
        &self,
        key: &str,
        schema_hint: Option<&str>,
        deadline: Deadline,
    ) -> GatewayResult<Option<Vec<u8>>> {
        let conn = self.connection(deadline)?;
        lookup_metadata(&conn, key, schema_hint, &deadline)
    }

    fn get_object_version(
        &self,
        version: &VersionId,
        deadline: Deadline,
    ) -> GatewayResult<Option<ObjectVersionRow>> {
        let conn = self.connection(deadline)?;
        let row = conn
            .query_row(
                "SELECT job_id, obj_key, obj_type, payload FROM object_version
                 WHERE version_id = ?1",
                params![version.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| classify(e, &deadline))?;
        let Some((job, key, object_type, payload)) = row else {
            return Ok(None);
        };
        Ok(Some(ObjectVersionRow {
            version: *version,
            job: parse_job(job)?,
            key,
            object_type,
            payload,
        }))
    }

    fn get_latest_version_id(
        &self,
        key: &str,
        deadline: Deadline,
    ) -> GatewayResult<Option<VersionId>> {
        let conn = self.connection(deadline)?;
        let latest = collect_versions(
            &conn,
            "SELECT version_id FROM object_version WHERE obj_key = ?1
             ORDER BY version_id DESC LIMIT 1",
            params![key],
            &deadline,
        )?;
        Ok(latest.into_iter().next())
    }

    fn list_version_ids_by_type(
        &self,
        object_type: &str,
        job_pattern: &str,
        after: Option<VersionId>,
        limit: usize,
        deadline: Deadline,
    ) -> GatewayResult<Vec<VersionId>> {
        let conn = self.connection(deadline)?;
        let after = after.map(|v| v.to_string()).unwrap_or_default();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        collect_versions(
            &conn,
            "SELECT version_id FROM object_version
             WHERE obj_type = ?1 AND job_id GLOB ?2 AND version_id > ?3
             ORDER BY version_id LIMIT ?4",
            params![object_type, to_sqlite_glob(job_pattern), after, limit],
            &deadline,
        )
    }

    fn list_job_versions(&self, job: &JobId, deadline: Deadline) -> GatewayResult<Vec<VersionId>> {
        let conn = self.connection(deadline)?;
        collect_versions(
            &conn,
            "SELECT version_id FROM job_link WHERE job_id = ?1 ORDER BY version_id",
            params![job.as_str()],
            &deadline,
        )
    }

    fn ping(&self, deadline: Deadline) -> GatewayResult<()> {
        let conn = self.connection(deadline)?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| classify(e, &deadline))?;
        Ok(())
    }

    fn stats(&self, deadline: Deadline) -> GatewayResult<GatewayStats> {
        let conn = self.connection(deadline)?;
        Ok(GatewayStats {
            metadata: count(&conn, "metadata", &deadline)?,
            object_versions: count(&conn, "object_version", &deadline)?,
            job_links: count(&conn, "job_link", &deadline)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::with_transaction;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn v(n: u128) -> VersionId {
        VersionId::from_parts(1_000, n)
    }

    fn row(version: VersionId, job: &str, key: &str, object_type: &str) -> ObjectVersionRow {
        ObjectVersionRow {
            version,
            job: JobId::new(job).unwrap(),
            key: key.into(),
            object_type: object_type.into(),
            payload: br#"{"n":1}"#.to_vec(),
        }
    }

    fn write_version(gw: &SqliteGateway, r: &ObjectVersionRow) {
        with_transaction(gw, deadline(), |tx| -> GatewayResult<()> {
            tx.insert_object_version(r)?;
            tx.insert_metadata(&r.key, &r.object_type, b"meta")?;
            tx.insert_job_link(&r.job, &r.version, b"link")?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("strata.db");

        let gw = SqliteGateway::open(&path).unwrap();
        write_version(&gw, &row(v(1), "job", "person", "person"));
        gw.close().unwrap();

        let gw = SqliteGateway::open(&path).unwrap();
        let stored = gw.get_object_version(&v(1), deadline()).unwrap().unwrap();
        assert_eq!(stored, row(v(1), "job", "person", "person"));
        assert_eq!(
            gw.get_metadata("person", None, deadline()).unwrap(),
            Some(b"meta".to_vec())
        );
        assert_eq!(gw.stats(deadline()).unwrap().job_links, 1);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        {
            let mut tx = gw.begin(deadline()).unwrap();
            tx.insert_object_version(&row(v(1), "j", "k", "k")).unwrap();
            tx.insert_metadata("k", "k", b"m").unwrap();
        }
        assert_eq!(gw.stats(deadline()).unwrap(), GatewayStats::default());
        gw.ping(deadline()).unwrap();
    }

    #[test]
    fn metadata_upsert_replaces_payload() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        for payload in [b"one".as_slice(), b"two".as_slice()] {
            with_transaction(&gw, deadline(), |tx| tx.insert_metadata("k", "group", payload))
                .unwrap();
        }
        assert_eq!(
            gw.get_metadata("k", None, deadline()).unwrap(),
            Some(b"two".to_vec())
        );
        assert_eq!(gw.stats(deadline()).unwrap().metadata, 1);
    }

    #[test]
    fn metadata_falls_back_to_schema_key() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        with_transaction(&gw, deadline(), |tx| -> GatewayResult<()> {
            tx.insert_metadata("b", "person", b"b")?;
            tx.insert_metadata("a", "person", b"a")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(
            gw.get_metadata("person", Some("person"), deadline()).unwrap(),
            Some(b"a".to_vec())
        );
    }

    #[test]
    fn duplicate_version_and_missing_link_target() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        let r = row(v(1), "j", "k", "k");
        write_version(&gw, &r);

        let mut tx = gw.begin(deadline()).unwrap();
        assert!(matches!(
            tx.insert_object_version(&r).unwrap_err(),
            GatewayError::Duplicate { .. }
        ));
        assert!(matches!(
            tx.insert_job_link(&r.job, &v(2), b"l").unwrap_err(),
            GatewayError::NotFound { .. }
        ));
        assert_eq!(tx.insert_job_link(&r.job, &r.version, b"l").unwrap(), 0);
        let other = JobId::new("other").unwrap();
        assert_eq!(tx.insert_job_link(&other, &r.version, b"l").unwrap(), 1);
        tx.commit().unwrap();

        assert_eq!(gw.list_job_versions(&other, deadline()).unwrap(), vec![v(1)]);
    }

    #[test]
    fn listing_orders_filters_and_pages() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        write_version(&gw, &row(v(3), "manual", "c", "Person"));
        write_version(&gw, &row(v(1), "import-1", "a", "Person"));
        write_version(&gw, &row(v(2), "import-1", "b", "Place"));
        write_version(&gw, &row(v(4), "import-2", "d", "Person"));

        let all = gw
            .list_version_ids_by_type("Person", "*", None, 10, deadline())
            .unwrap();
        assert_eq!(all, vec![v(1), v(3), v(4)]);

        let imports = gw
            .list_version_ids_by_type("Person", "import-?", None, 10, deadline())
            .unwrap();
        assert_eq!(imports, vec![v(1), v(4)]);

        let page = gw
            .list_version_ids_by_type("Person", "*", Some(v(1)), 1, deadline())
            .unwrap();
        assert_eq!(page, vec![v(3)]);
    }

    #[test]
    fn brackets_in_job_ids_match_literally() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        write_version(&gw, &row(v(1), "[batch]", "a", "t"));
        write_version(&gw, &row(v(2), "b", "b", "t"));
        let found = gw
            .list_version_ids_by_type("t", "[batch]", None, 10, deadline())
            .unwrap();
        assert_eq!(found, vec![v(1)]);
    }

    #[test]
    fn latest_version_for_key() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        write_version(&gw, &row(v(1), "j", "a", "t"));
        write_version(&gw, &row(v(2), "j", "a", "t"));
        assert_eq!(gw.get_latest_version_id("a", deadline()).unwrap(), Some(v(2)));
        assert_eq!(gw.get_latest_version_id("zz", deadline()).unwrap(), None);
    }

    #[test]
    fn begin_times_out_while_transaction_open() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        let _tx = gw.begin(deadline()).unwrap();
        let err = gw
            .begin(Deadline::after(Duration::from_millis(20)))
            .err()
            .expect("second transaction should time out");
        assert!(err.is_timeout());
    }

    #[test]
    fn debug_shows_location() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        assert_eq!(gw.location(), ":memory:");
        assert!(format!("{gw:?}").contains(":memory:"));
    }
}
