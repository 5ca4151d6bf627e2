//! The che donor: one URL, polled with `If-None-Match` / `If-Modified-Since`.

use super::dump::{extract_dump, DUMP_ZIP};
use super::{check_limit, Donor, DonorError, DonorHandle};
use crate::hashing::{file_sha256, XmlSha256};
use crate::http::save_response;
use crate::sqlite_persistence::SqliteStore;
use reqwest::blocking::{Client, Response};
use reqwest::header::{
    HeaderName, CONTENT_LENGTH, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::StatusCode;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

/// `Last-Modified` stored before the first successful fetch.
pub const LAST_MODIFIED_EPOCH: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Single-slot donor: at most one pending dump per poll.
///
/// There is no retry queue. The validators are committed before the payload
/// is archived, so if the process dies in between, the next poll gets
/// `304 Not Modified` and that dump is never offered again by this donor.
pub struct DonorChe {
    store: SqliteStore,
    client: Client,
    file_url: String,
    etag: String,
    last_modified: String,
}

impl DonorChe {
    pub fn new(
        store: SqliteStore,
        client: Client,
        file_url: impl Into<String>,
    ) -> Result<Self, DonorError> {
        crate::ensure_schema(&store)?;
        let (etag, last_modified) = store.exclusive(|tx| {
            let row = tx
                .query_row("SELECT etag, last_modified FROM che LIMIT 1", [], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .optional()?;
            if let Some(row) = row {
                return Ok::<_, rusqlite::Error>(row);
            }
            // A validator that can't match anything upstream forces a full first GET.
            let etag = format!("\"{}\"", hex::encode(rand::random::<[u8; 16]>()));
            tx.execute(
                "INSERT INTO che (etag, last_modified) VALUES (?1, ?2)",
                params![etag, LAST_MODIFIED_EPOCH],
            )?;
            Ok((etag, LAST_MODIFIED_EPOCH.to_string()))
        })?;

        Ok(Self {
            store,
            client,
            file_url: file_url.into(),
            etag,
            last_modified,
        })
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn last_modified(&self) -> &str {
        &self.last_modified
    }

    /// Digest of the last payload fetched, `None` while a fetch is in flight
    /// or when it failed after the validators were updated.
    pub fn xml_sha256(&self) -> Result<Option<XmlSha256>, DonorError> {
        let sha: Option<Vec<u8>> = self.store.with_conn(|conn| {
            conn.query_row("SELECT xml_sha256 FROM che LIMIT 1", [], |row| row.get(0))
        })?;
        Ok(sha.and_then(|v| v.try_into().ok()))
    }

    /// Newest `update_time` among indexed dumps that came from this donor, 0 if none.
    pub fn max_update_time(&self) -> Result<i64, DonorError> {
        Ok(self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(MAX(update_time), 0) FROM che JOIN log USING (xml_sha256)",
                [],
                |row| row.get(0),
            )
        })?)
    }
}

fn header_str(response: &Response, name: HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

impl Donor for DonorChe {
    fn name(&self) -> &'static str {
        "che"
    }

    fn list_handles(&mut self, limit: usize) -> Result<Vec<DonorHandle>, DonorError> {
        check_limit(limit)?;
        let response = self
            .client
            .get(&self.file_url)
            .header(IF_NONE_MATCH, self.etag.as_str())
            .header(IF_MODIFIED_SINCE, self.last_modified.as_str())
            .send()?
            .error_for_status()?;

        if response.status() == StatusCode::OK {
            debug!("{}: {} has new data", self.name(), self.file_url);
            Ok(vec![DonorHandle::Che(response)])
        } else {
            debug!(
                "{}: {} answered {}, nothing new",
                self.name(),
                self.file_url,
                response.status()
            );
            Ok(Vec::new())
        }
    }

    fn fetch_xml_and_sig(
        &mut self,
        scratch_dir: &Path,
        handle: &mut DonorHandle,
    ) -> Result<XmlSha256, DonorError> {
        let DonorHandle::Che(response) = handle else {
            return Err(DonorError::ForeignHandle { donor: self.name() });
        };

        let zip_path = scratch_dir.join(DUMP_ZIP);
        let size = save_response(response, &zip_path)?;
        let content_length = header_str(response, CONTENT_LENGTH);
        let etag = header_str(response, ETAG);
        let last_modified = header_str(response, LAST_MODIFIED);
        info!(
            "{}: got {}, {} bytes, content-length: {}, last-modified: {}, etag: {}",
            self.name(),
            DUMP_ZIP,
            size,
            content_length.as_deref().unwrap_or("?"),
            last_modified.as_deref().unwrap_or("?"),
            etag.as_deref().unwrap_or("?"),
        );

        if let Some(expected) = content_length.and_then(|v| v.parse::<u64>().ok()) {
            if expected != size {
                return Err(DonorError::Truncated {
                    name: self.file_url.clone(),
                    expected,
                    actual: size,
                });
            }
        }
        let etag = etag.ok_or(DonorError::MissingHeader("ETag"))?;
        let last_modified = last_modified.ok_or(DonorError::MissingHeader("Last-Modified"))?;

        self.store.exclusive(|tx| {
            tx.execute(
                "UPDATE che SET etag = ?1, last_modified = ?2, xml_sha256 = NULL",
                params![etag, last_modified],
            )
        })?;
        self.etag = etag;
        self.last_modified = last_modified;

        let (xml_path, _) = extract_dump(&zip_path, scratch_dir)?;
        let xml_sha256 = file_sha256(&xml_path)?;

        self.store.exclusive(|tx| {
            tx.execute("UPDATE che SET xml_sha256 = ?1", params![&xml_sha256[..]])
        })?;
        Ok(xml_sha256)
    }
}
