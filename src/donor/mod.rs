//! Upstream sources of registry dumps.
//!
//! Each donor knows how to discover payloads that have not been ingested yet
//! and how to fetch one of them into a scratch directory:
//! - [`DonorChe`]: a single URL polled with conditional HTTP requests
//! - [`DonorZavod`]: a directory listing reconciled against local state

mod che;
mod dump;
pub mod schema;
mod zavod;

pub use che::{DonorChe, LAST_MODIFIED_EPOCH};
pub use dump::{extract_dump, DumpFileMeta, DUMP_SIG, DUMP_XML, DUMP_ZIP};
pub use zavod::{parse_listing, DonorZavod, ListingEntry, LISTING_TTL_SECS};

use crate::hashing::XmlSha256;
use crate::http::SaveUrlError;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while polling or fetching from a donor.
#[derive(Debug, Error)]
pub enum DonorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Truncated payload {name}: expected {expected} bytes, got {actual}")]
    Truncated {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] anyhow::Error),

    #[error("Response lacks {0} header")]
    MissingHeader(&'static str),

    #[error("Bad line in directory listing: {line:?}")]
    ListingParse { line: String },

    #[error("Handle limit must be at least 1, got {0}")]
    InvalidLimit(usize),

    #[error("Handle does not belong to donor {donor}")]
    ForeignHandle { donor: &'static str },
}

impl From<SaveUrlError> for DonorError {
    fn from(err: SaveUrlError) -> Self {
        match err {
            SaveUrlError::Http(e) => DonorError::Http(e),
            SaveUrlError::Io(e) => DonorError::Io(e),
        }
    }
}

/// One pending payload, as handed out by [`Donor::list_handles`].
#[derive(Debug)]
pub enum DonorHandle {
    /// The open, not yet consumed, `200 OK` response of a conditional GET.
    Che(reqwest::blocking::Response),
    /// A file seen in the zavod directory listing.
    Zavod(ListingEntry),
}

/// The fetch-and-dedup contract shared by every donor.
///
/// A scheduler holds a collection of `Box<dyn Donor>` and drives each one
/// through `list_handles` → `fetch_xml_and_sig` → (external archiving) →
/// `sanity_cb`.
pub trait Donor {
    fn name(&self) -> &'static str;

    /// Returns at most `limit` payloads not yet known to be ingested.
    ///
    /// May record what was observed upstream, never marks anything ingested.
    fn list_handles(&mut self, limit: usize) -> Result<Vec<DonorHandle>, DonorError>;

    /// Downloads the payload behind `handle` into `scratch_dir`, extracts
    /// [`DUMP_XML`] and [`DUMP_SIG`] next to it and returns the SHA-256 of
    /// the XML.
    fn fetch_xml_and_sig(
        &mut self,
        scratch_dir: &Path,
        handle: &mut DonorHandle,
    ) -> Result<XmlSha256, DonorError>;

    /// Called by the scheduler once the fetched files are archived.
    fn sanity_cb(
        &self,
        _handle: &DonorHandle,
        _xml: &DumpFileMeta,
        _sig: &DumpFileMeta,
        _update_time: i64,
        _update_time_urgently: Option<i64>,
    ) -> Result<(), DonorError> {
        Ok(())
    }
}

fn check_limit(limit: usize) -> Result<(), DonorError> {
    if limit == 0 {
        return Err(DonorError::InvalidLimit(limit));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_persistence::SqliteStore;
    use std::time::Duration;

    #[test]
    fn test_check_limit() {
        assert!(matches!(check_limit(0), Err(DonorError::InvalidLimit(0))));
        assert!(check_limit(1).is_ok());
    }

    #[test]
    fn test_default_sanity_cb_accepts_everything() {
        let store = SqliteStore::open_in_memory().unwrap();
        let client = crate::http::build_client("test", Duration::from_secs(1)).unwrap();
        let donors: Vec<Box<dyn Donor>> = vec![
            Box::new(DonorZavod::new(store.clone(), client.clone(), "http://127.0.0.1:9/").unwrap()),
            Box::new(DonorChe::new(store, client, "http://127.0.0.1:9/dump.zip").unwrap()),
        ];
        let meta = DumpFileMeta {
            size: 3,
            mtime: None,
            sha256: [0; 32],
        };
        let handle = DonorHandle::Zavod(ListingEntry {
            zip_fname: "registry-1.zip".to_string(),
            zip_size: 3,
        });

        let names: Vec<_> = donors.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["zavod", "che"]);
        for donor in &donors {
            donor
                .sanity_cb(&handle, &meta, &meta, 1_546_387_260, None)
                .unwrap();
        }
    }
}
