//! The zavod donor: a plain directory listing of `registry-*.zip` files.

use super::dump::{extract_dump, DUMP_ZIP};
use super::{check_limit, Donor, DonorError, DonorHandle};
use crate::hashing::{file_sha256, XmlSha256};
use crate::http::save_url;
use crate::sqlite_persistence::SqliteStore;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::blocking::Client;
use rusqlite::params;
use std::path::Path;
use tracing::{debug, info};

/// Rows not seen in a listing for this long are dropped.
pub const LISTING_TTL_SECS: i64 = 24 * 60 * 60;

lazy_static! {
    static ref ARCHIVE_HREF: Regex = Regex::new(r#"^<a href="registry-[-0-9]+\.zip">"#).unwrap();
    static ref LISTING_LINE: Regex = Regex::new(
        r#"^<a href="(registry-[-0-9]+\.zip)">(registry-[-0-9]+\.zip)</a> +[^ ]+ [^ ]+ +(\d+)$"#
    )
    .unwrap();
}

/// One `registry-*.zip` file as announced by the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub zip_fname: String,
    pub zip_size: u64,
}

/// Parses an autoindex page into `(file name, size)` entries.
///
/// Lines that don't link a `registry-*.zip` archive (parent directory,
/// checksums and other sidecar files) are skipped. A line that does link an
/// archive but doesn't match the expected shape is an error, so a changed
/// upstream format can't silently look like an empty directory.
pub fn parse_listing(page: &str) -> Result<Vec<ListingEntry>, DonorError> {
    let mut entries = Vec::new();
    for line in page.lines() {
        let line = line.trim_end_matches('\r');
        if !ARCHIVE_HREF.is_match(line) {
            continue;
        }
        let bad_line = || DonorError::ListingParse {
            line: line.to_string(),
        };
        let caps = LISTING_LINE.captures(line).ok_or_else(bad_line)?;
        if caps[1] != caps[2] {
            return Err(bad_line());
        }
        // Sizes are stored as SQLite integers.
        let zip_size = caps[3]
            .parse::<i64>()
            .ok()
            .and_then(|size| u64::try_from(size).ok())
            .ok_or_else(bad_line)?;
        entries.push(ListingEntry {
            zip_fname: caps[1].to_string(),
            zip_size,
        });
    }
    Ok(entries)
}

pub struct DonorZavod {
    store: SqliteStore,
    client: Client,
    dir_url: String,
}

impl DonorZavod {
    pub fn new(
        store: SqliteStore,
        client: Client,
        dir_url: impl Into<String>,
    ) -> Result<Self, DonorError> {
        crate::ensure_schema(&store)?;
        Ok(Self {
            store,
            client,
            dir_url: dir_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// [`Donor::list_handles`] with an explicit clock, `now` in epoch seconds.
    ///
    /// The whole reconciliation (listing upsert, TTL purge, selection) runs in
    /// one exclusive transaction; any failure leaves the table untouched.
    pub fn list_handles_at(
        &mut self,
        limit: usize,
        now: i64,
    ) -> Result<Vec<DonorHandle>, DonorError> {
        check_limit(limit)?;
        let entries = self.store.exclusive(|tx| {
            let page = self
                .client
                .get(format!("{}/", self.dir_url))
                .send()?
                .error_for_status()?
                .text()?;
            let listing = parse_listing(&page)?;
            debug!("{}: listing has {} archives", self.name(), listing.len());

            for entry in &listing {
                let zip_size =
                    i64::try_from(entry.zip_size).map_err(|_| DonorError::ListingParse {
                        line: entry.zip_fname.clone(),
                    })?;
                tx.execute(
                    "INSERT INTO zavod (zip_fname, zip_size, fetched, last_seen)
                     VALUES (?1, ?2, 0, ?3)
                     ON CONFLICT (zip_fname) DO UPDATE SET last_seen = ?3",
                    params![entry.zip_fname, zip_size, now],
                )?;
            }

            let purged = tx.execute(
                "DELETE FROM zavod WHERE last_seen < ?1",
                params![now - LISTING_TTL_SECS],
            )?;
            if purged > 0 {
                debug!("{}: purged {} stale rows", self.name(), purged);
            }

            // Fetched-but-unindexed rows come back: their archiving never happened.
            let mut stmt = tx.prepare(
                "SELECT zip_fname, zip_size FROM zavod
                 WHERE NOT fetched
                    OR xml_sha256 IS NOT NULL AND xml_sha256 NOT IN (SELECT xml_sha256 FROM log)
                 ORDER BY zip_fname
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(ListingEntry {
                        zip_fname: row.get(0)?,
                        zip_size: row.get::<_, i64>(1)? as u64,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<_, DonorError>(rows)
        })?;

        Ok(entries.into_iter().map(DonorHandle::Zavod).collect())
    }
}

impl Donor for DonorZavod {
    fn name(&self) -> &'static str {
        "zavod"
    }

    fn list_handles(&mut self, limit: usize) -> Result<Vec<DonorHandle>, DonorError> {
        self.list_handles_at(limit, chrono::Utc::now().timestamp())
    }

    fn fetch_xml_and_sig(
        &mut self,
        scratch_dir: &Path,
        handle: &mut DonorHandle,
    ) -> Result<XmlSha256, DonorError> {
        let DonorHandle::Zavod(entry) = handle else {
            return Err(DonorError::ForeignHandle { donor: self.name() });
        };

        let zip_path = scratch_dir.join(DUMP_ZIP);
        let url = format!("{}/{}", self.dir_url, entry.zip_fname);
        let size = save_url(&self.client, &url, &zip_path)?;
        info!("{}: got {}, {} bytes", self.name(), entry.zip_fname, size);
        if size != entry.zip_size {
            return Err(DonorError::Truncated {
                name: entry.zip_fname.clone(),
                expected: entry.zip_size,
                actual: size,
            });
        }

        let (xml_path, _) = extract_dump(&zip_path, scratch_dir)?;
        let xml_sha256 = file_sha256(&xml_path)?;

        self.store.exclusive(|tx| {
            tx.execute(
                "UPDATE zavod SET fetched = 1, xml_sha256 = ?1 WHERE zip_fname = ?2",
                params![&xml_sha256[..], entry.zip_fname],
            )
        })?;
        Ok(xml_sha256)
    }
}
