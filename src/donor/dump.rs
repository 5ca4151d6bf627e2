//! The dump package: a zip holding the registry XML and its detached signature.

use super::DonorError;
use crate::hashing::{file_sha256, XmlSha256};
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use zip::ZipArchive;

pub const DUMP_ZIP: &str = "dump.zip";
pub const DUMP_XML: &str = "dump.xml";
pub const DUMP_SIG: &str = "dump.xml.sig";

/// Extracts exactly [`DUMP_SIG`] and [`DUMP_XML`] from `zip_path` into `dest`.
///
/// Returns the paths of the extracted XML and signature.
pub fn extract_dump(zip_path: &Path, dest: &Path) -> Result<(PathBuf, PathBuf), DonorError> {
    let mut archive = ZipArchive::new(File::open(zip_path)?)?;
    let sig = extract_entry(&mut archive, DUMP_SIG, dest)?;
    let xml = extract_entry(&mut archive, DUMP_XML, dest)?;
    Ok((xml, sig))
}

fn extract_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    dest: &Path,
) -> Result<PathBuf, DonorError> {
    let mut entry = archive.by_name(name)?;
    let out_path = dest.join(name);
    let mut out = File::create(&out_path)?;
    io::copy(&mut entry, &mut out)?;
    Ok(out_path)
}

/// What the scheduler knows about an archived dump file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpFileMeta {
    pub size: u64,
    /// Modification time in epoch seconds, if the filesystem reports one.
    pub mtime: Option<i64>,
    pub sha256: XmlSha256,
}

impl DumpFileMeta {
    pub fn read(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        Ok(Self {
            size: metadata.len(),
            mtime,
            sha256: file_sha256(path)?,
        })
    }
}
