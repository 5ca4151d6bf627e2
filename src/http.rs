//! Blocking HTTP plumbing shared by the donors.

use reqwest::blocking::{Client, Response};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

/// Size of the buffer used to stream response bodies to disk.
pub const DOWNLOAD_CHUNK: usize = 64 * 1024;

pub fn default_user_agent() -> String {
    format!("rkndex/{}", env!("CARGO_PKG_VERSION"))
}

/// Builds the client every donor uses: fixed user agent, bounded timeout.
pub fn build_client(user_agent: &str, timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
}

/// Streams `response`'s body into `path` in fixed-size chunks.
///
/// Returns the number of bytes written.
pub fn save_response(response: &mut Response, path: &Path) -> io::Result<u64> {
    let mut file = File::create(path)?;
    let mut buf = vec![0u8; DOWNLOAD_CHUNK];
    let mut total = 0u64;
    loop {
        let n = response.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        total += n as u64;
    }
    file.sync_all()?;
    Ok(total)
}

/// GETs `url` and saves the body into `path`, failing on non-success status.
pub fn save_url(client: &Client, url: &str, path: &Path) -> Result<u64, SaveUrlError> {
    let mut response = client.get(url).send()?.error_for_status()?;
    Ok(save_response(&mut response, path)?)
}

#[derive(Debug, thiserror::Error)]
pub enum SaveUrlError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
