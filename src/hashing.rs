//! Content digests of fetched dump files.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// SHA-256 of a dump payload, the deduplication key of the whole mirror.
pub type XmlSha256 = [u8; 32];

const READ_CHUNK: usize = 64 * 1024;

/// Computes the SHA-256 of a file without loading it into memory.
pub fn file_sha256(path: &Path) -> io::Result<XmlSha256> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}
