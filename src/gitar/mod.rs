//! Incremental SQLite index over the git history of the dump archive.
//!
//! The archive keeps two branches: the full one (every release, metadata in
//! commit bodies) and a light one holding only a sample of releases whose
//! author time is the signing time. [`GitarLog::poll_fs`] merges whatever
//! was committed since the previous poll into the `log` and `log100` tables.

mod history;
mod parse;
pub mod schema;

pub use history::{CommitHistory, CommitId, GitCli, LogFormat};
pub use parse::{
    parse_line, CommitLogParser, FileDigests, LogLine, LogRecord, ParseError, PartialRecord,
    COMMIT_BOUNDARY, REGISTRY_EPOCH,
};

use crate::hashing::XmlSha256;
use crate::sqlite_persistence::SqliteStore;
use parse::parse_signing_time;
use rusqlite::types::ValueRef;
use rusqlite::{params, OptionalExtension, Statement, Transaction};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::process::ExitStatus;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_HEAD_REF: &str = "HEAD";
pub const DEFAULT_LIGHT_BRANCH: &str = "main100";

/// Columns `dumps_since` can return.
pub const PUBLIC_COLUMNS: [&str; 13] = [
    "update_time",
    "update_time_urgently",
    "signing_time",
    "xml_mtime",
    "sig_mtime",
    "xml_md5",
    "sig_md5",
    "xml_sha1",
    "sig_sha1",
    "xml_sha256",
    "sig_sha256",
    "xml_sha512",
    "sig_sha512",
];

#[derive(Debug, Error)]
pub enum GitarError {
    #[error("Failed to run git: {0}")]
    Spawn(std::io::Error),

    #[error("`{command}` failed with {status}")]
    GitFailed { command: String, status: ExitStatus },

    #[error("Unknown or invalid ref {0:?}")]
    BadRef(String),

    #[error("Stored `{table}` pointer is {len} bytes, expected a 20-byte commit id")]
    BadPointer { table: &'static str, len: usize },

    #[error("Cannot parse log line {line:?} ({reason}), record so far: {record:?}")]
    BadLine {
        line: String,
        record: Box<PartialRecord>,
        reason: String,
    },

    #[error("Incomplete record, missing {missing:?}: {record:?}")]
    IncompleteRecord {
        missing: Vec<&'static str>,
        record: Box<PartialRecord>,
    },

    #[error("Bad columns set, unknown: {unknown:?}")]
    BadColumns { unknown: Vec<String> },

    #[error("Empty columns set")]
    NoColumns,

    #[error("Row count must be positive")]
    InvalidCount,

    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] anyhow::Error),
}

impl From<ParseError> for GitarError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::BadLine {
                line,
                record,
                reason,
            } => GitarError::BadLine {
                line,
                record: Box::new(record),
                reason,
            },
            ParseError::Incomplete { missing, record } => GitarError::IncompleteRecord {
                missing,
                record: Box::new(record),
            },
        }
    }
}

/// Rows added by one [`GitarLog::poll_fs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub log_rows: usize,
    pub log100_rows: usize,
}

/// A value of a [`DumpRow`]: timestamps are integers, digests hex strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DumpValue {
    Null,
    Integer(i64),
    Digest(#[serde(serialize_with = "hex::serde::serialize")] Vec<u8>),
}

impl DumpValue {
    fn from_sql(value: ValueRef<'_>) -> rusqlite::Result<Self> {
        match value {
            ValueRef::Null => Ok(DumpValue::Null),
            ValueRef::Integer(i) => Ok(DumpValue::Integer(i)),
            ValueRef::Blob(b) => Ok(DumpValue::Digest(b.to_vec())),
            other => Err(rusqlite::Error::InvalidColumnType(
                0,
                "dump value".to_string(),
                other.data_type(),
            )),
        }
    }
}

/// One `dumps_since` row: column name to value.
pub type DumpRow = BTreeMap<&'static str, DumpValue>;

#[derive(Clone, Copy)]
enum Pointer {
    Head,
    Main100,
}

impl Pointer {
    fn table(&self) -> &'static str {
        match self {
            Pointer::Head => "head",
            Pointer::Main100 => "main100",
        }
    }

    fn read(&self, tx: &Transaction) -> Result<Option<CommitId>, GitarError> {
        let sql = format!("SELECT commit_hash FROM {}", self.table());
        let hash: Option<Vec<u8>> = tx.query_row(&sql, [], |row| row.get(0)).optional()?;
        hash.map(|v| {
            let len = v.len();
            <[u8; 20]>::try_from(v)
                .map(CommitId::from_bytes)
                .map_err(|_| GitarError::BadPointer {
                    table: self.table(),
                    len,
                })
        })
        .transpose()
    }

    fn write(&self, tx: &Transaction, commit: CommitId) -> rusqlite::Result<()> {
        let (update, insert) = match self {
            Pointer::Head => (
                "UPDATE head SET commit_hash = ?1",
                "INSERT INTO head (commit_hash) VALUES (?1)",
            ),
            Pointer::Main100 => (
                "UPDATE main100 SET commit_hash = ?1",
                "INSERT INTO main100 (commit_hash) VALUES (?1)",
            ),
        };
        let hash = &commit.as_bytes()[..];
        if tx.execute(update, params![hash])? == 0 {
            tx.execute(insert, params![hash])?;
        }
        Ok(())
    }
}

const INSERT_LOG: &str = "INSERT INTO log (
        update_time, update_time_urgently, signing_time, xml_mtime, sig_mtime,
        xml_md5, sig_md5, xml_sha1, sig_sha1, xml_git, sig_git,
        xml_sha256, sig_sha256, xml_sha512, sig_sha512)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)";

fn insert_record(stmt: &mut Statement, record: &LogRecord) -> rusqlite::Result<usize> {
    stmt.execute(params![
        record.update_time,
        record.update_time_urgently,
        record.signing_time,
        record.xml_mtime,
        record.sig_mtime,
        &record.xml.md5[..],
        &record.sig.md5[..],
        &record.xml.sha1[..],
        &record.sig.sha1[..],
        &record.xml.git[..],
        &record.sig.git[..],
        &record.xml.sha256[..],
        &record.sig.sha256[..],
        &record.xml.sha512[..],
        &record.sig.sha512[..],
    ])
}

pub struct GitarLog {
    store: SqliteStore,
    history: Box<dyn CommitHistory>,
    head_ref: String,
    light_branch: String,
}

impl GitarLog {
    /// Binds the index to `history`, creating missing tables.
    ///
    /// Construction doesn't poll: call [`GitarLog::poll_fs`] to catch up.
    pub fn new(store: SqliteStore, history: Box<dyn CommitHistory>) -> Result<Self, GitarError> {
        crate::ensure_schema(&store)?;
        Ok(Self {
            store,
            history,
            head_ref: DEFAULT_HEAD_REF.to_string(),
            light_branch: DEFAULT_LIGHT_BRANCH.to_string(),
        })
    }

    pub fn with_refs(mut self, head_ref: impl Into<String>, light_branch: impl Into<String>) -> Self {
        self.head_ref = head_ref.into();
        self.light_branch = light_branch.into();
        self
    }

    /// Merges commits made since the previous poll into the index.
    ///
    /// Each branch is synced in its own exclusive transaction. A parse error
    /// anywhere in a branch's new range rolls that branch back entirely, its
    /// stored commit pointer included.
    pub fn poll_fs(&self) -> Result<SyncReport, GitarError> {
        let head_tip = self.history.rev_parse(&self.head_ref)?;
        let light_tip = self.history.rev_parse(&self.light_branch)?;

        let log_rows = self.store.exclusive(|tx| {
            let known = Pointer::Head.read(tx)?;
            if known == Some(head_tip) {
                return Ok(0);
            }
            let inserted = self.merge_full(tx, known, head_tip)?;
            Pointer::Head.write(tx, head_tip)?;
            Ok::<_, GitarError>(inserted)
        })?;

        let log100_rows = self.store.exclusive(|tx| {
            let known = Pointer::Main100.read(tx)?;
            if known == Some(light_tip) {
                return Ok(0);
            }
            let inserted = self.merge_light(tx, known, light_tip)?;
            Pointer::Main100.write(tx, light_tip)?;
            Ok::<_, GitarError>(inserted)
        })?;

        let report = SyncReport {
            log_rows,
            log100_rows,
        };
        if log_rows > 0 || log100_rows > 0 {
            info!(
                "Indexed {} new dumps up to {}, {} signing times up to {}",
                log_rows, head_tip, log100_rows, light_tip
            );
        } else {
            debug!("Index is up to date at {}", head_tip);
        }
        Ok(report)
    }

    fn merge_full(
        &self,
        tx: &Transaction,
        since: Option<CommitId>,
        upto: CommitId,
    ) -> Result<usize, GitarError> {
        let mut parser = CommitLogParser::default();
        let mut stmt = tx.prepare_cached(INSERT_LOG)?;
        let mut inserted = 0;
        self.history
            .for_each_log_line(since, upto, LogFormat::Bodies, &mut |line: &str| {
                if let Some(record) = parser.feed(line)? {
                    inserted += insert_record(&mut stmt, &record)?;
                }
                Ok(())
            })?;
        parser.finish()?;
        Ok(inserted)
    }

    fn merge_light(
        &self,
        tx: &Transaction,
        since: Option<CommitId>,
        upto: CommitId,
    ) -> Result<usize, GitarError> {
        let mut stmt = tx.prepare_cached("INSERT INTO log100 (signing_time) VALUES (?1)")?;
        let mut inserted = 0;
        self.history
            .for_each_log_line(since, upto, LogFormat::AuthorTimes, &mut |line: &str| {
                let signing_time = parse_signing_time(line).map_err(|reason| {
                    GitarError::BadLine {
                        line: line.to_string(),
                        record: Box::default(),
                        reason,
                    }
                })?;
                if let Some(signing_time) = signing_time {
                    inserted += stmt.execute(params![signing_time])?;
                }
                Ok(())
            })?;
        Ok(inserted)
    }

    /// Newest `update_time` in the index, 0 when empty.
    pub fn max_update_time(&self) -> Result<i64, GitarError> {
        Ok(self.store.with_conn(|conn| {
            conn.query_row("SELECT COALESCE(MAX(update_time), 0) FROM log", [], |row| {
                row.get(0)
            })
        })?)
    }

    /// True when no indexed dump has this `dump.xml` digest.
    pub fn needs_xml_sha256(&self, xml_sha256: &XmlSha256) -> Result<bool, GitarError> {
        let count: i64 = self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM log WHERE xml_sha256 = ?1",
                params![&xml_sha256[..]],
                |row| row.get(0),
            )
        })?;
        Ok(count == 0)
    }

    /// Maps a legacy SHA-1 of `dump.xml` to its git blob id.
    pub fn xml_git_by_sha1(&self, xml_sha1: &[u8; 20]) -> Result<Option<[u8; 20]>, GitarError> {
        let git: Option<Vec<u8>> = self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT xml_git FROM log WHERE xml_sha1 = ?1",
                params![&xml_sha1[..]],
                |row| row.get(0),
            )
            .optional()
        })?;
        Ok(git.and_then(|v| v.try_into().ok()))
    }

    /// Order-independent fingerprint of the indexed set: XOR of every
    /// `xml_sha1`. All zeroes for an empty index.
    pub fn digest_xml_sha1(&self) -> Result<[u8; 20], GitarError> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT xml_sha1 FROM log")?;
            let mut rows = stmt.query([])?;
            let mut digest = [0u8; 20];
            while let Some(row) = rows.next()? {
                let sha1: Vec<u8> = row.get(0)?;
                for (acc, byte) in digest.iter_mut().zip(sha1) {
                    *acc ^= byte;
                }
            }
            Ok(digest)
        })
    }

    /// Up to `count` dumps with `update_time >= since`, oldest first.
    ///
    /// `columns` restricts the returned fields to a subset of
    /// [`PUBLIC_COLUMNS`]; `None` returns all of them.
    pub fn dumps_since(
        &self,
        since: i64,
        count: usize,
        columns: Option<&[&str]>,
    ) -> Result<Vec<DumpRow>, GitarError> {
        let selected: BTreeSet<&'static str> = match columns {
            None => PUBLIC_COLUMNS.iter().copied().collect(),
            Some(requested) => {
                let unknown: Vec<String> = requested
                    .iter()
                    .filter(|c| !PUBLIC_COLUMNS.contains(*c))
                    .map(|c| c.to_string())
                    .collect();
                if !unknown.is_empty() {
                    return Err(GitarError::BadColumns { unknown });
                }
                PUBLIC_COLUMNS
                    .iter()
                    .copied()
                    .filter(|c| requested.contains(c))
                    .collect()
            }
        };
        if selected.is_empty() {
            return Err(GitarError::NoColumns);
        }
        let limit = match i64::try_from(count) {
            Ok(limit) if limit > 0 => limit,
            _ => return Err(GitarError::InvalidCount),
        };

        let names: Vec<&'static str> = selected.into_iter().collect();
        let sql = format!(
            "SELECT {} FROM log WHERE update_time >= ?1
             ORDER BY update_time, xml_sha1, sig_sha1 LIMIT ?2",
            names.join(", ")
        );
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![since, limit], |row| {
                    let mut dump = DumpRow::new();
                    for (i, name) in names.iter().enumerate() {
                        dump.insert(*name, DumpValue::from_sql(row.get_ref(i)?)?);
                    }
                    Ok(dump)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Signing times from the light branch in `[from, to)`, ascending.
    pub fn signing_times_between(&self, from: i64, to: i64) -> Result<Vec<i64>, GitarError> {
        Ok(self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT signing_time FROM log100
                 WHERE signing_time >= ?1 AND signing_time < ?2
                 ORDER BY signing_time",
            )?;
            let times = stmt
                .query_map(params![from, to], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok::<_, rusqlite::Error>(times)
        })?)
    }

    /// Releases this handle's share of the database connection.
    pub fn close(self) -> Result<(), GitarError> {
        Ok(self.store.close()?)
    }
}
