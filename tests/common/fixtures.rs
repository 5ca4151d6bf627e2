//! Test fixture creation for dump packages and the database

use rkndex::SqliteStore;
use rusqlite::params;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Builds a dump package holding `dump.xml` and `dump.xml.sig`.
pub fn dump_zip(xml: &str, sig: &str) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in [("dump.xml", xml), ("dump.xml.sig", sig)] {
        zip.start_file(name, SimpleFileOptions::default())
            .expect("Failed to start zip entry");
        zip.write_all(data.as_bytes())
            .expect("Failed to write zip entry");
    }
    zip.finish().expect("Failed to finish zip").into_inner()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Creates a file-backed store in a fresh temporary directory.
pub fn create_test_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = rkndex::open_store(&dir.path().join("rkndex.sqlite"), std::time::Duration::from_secs(5))
        .expect("Failed to open store");
    (dir, store)
}

/// Renders an nginx-style autoindex page for `(file name, size)` pairs.
pub fn listing_page(entries: &[(&str, usize)]) -> String {
    let mut page = String::from(
        "<html>\r\n<head><title>Index of /zavod/</title></head>\r\n<body>\r\n\
         <h1>Index of /zavod/</h1><hr><pre><a href=\"../\">../</a>\r\n",
    );
    for (name, size) in entries {
        page.push_str(&format!(
            "<a href=\"{name}\">{name}</a>                 02-Jan-2019 03:01            {size}\r\n"
        ));
    }
    page.push_str("</pre><hr></body>\r\n</html>\r\n");
    page
}

/// Inserts an index row as if the archive writer had stored this dump.
pub fn insert_log_row(store: &SqliteStore, xml_sha256: &[u8; 32], update_time: i64) {
    let filler = |len: usize, tag: u8| {
        let mut v = vec![tag; len];
        v[..8].copy_from_slice(&xml_sha256[..8]);
        v
    };
    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO log (update_time, signing_time, xml_md5, sig_md5, xml_sha1,
                 sig_sha1, xml_git, sig_git, xml_sha256, sig_sha256, xml_sha512, sig_sha512)
                 VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    update_time,
                    filler(16, 1),
                    filler(16, 2),
                    filler(20, 3),
                    filler(20, 4),
                    filler(20, 5),
                    filler(20, 6),
                    &xml_sha256[..],
                    filler(32, 7),
                    filler(64, 8),
                    filler(64, 9),
                ],
            )
        })
        .expect("Failed to insert log row");
}

/// Body of an archive commit in the format the archive writer produces.
pub fn archive_commit_body(seed: u8, update_time: i64) -> String {
    let mut body = String::new();
    for (value, field) in [
        (update_time, "updateTime"),
        (1343462400, "updateTimeUrgently"),
        (update_time - 60, "signingTime"),
        (update_time + 5, "dump.xml mtime"),
        (update_time + 6, "dump.xml.sig mtime"),
    ] {
        body.push_str(&format!("2019-01-01T00:00:00+03:00 {} {}\n", value, field));
    }
    for (file, salt) in [("dump.xml", 0u8), ("dump.xml.sig", 0x80u8)] {
        for (algo, len) in [("MD5", 16usize), ("SHA1", 20), ("GIT", 20), ("SHA256", 32), ("SHA512", 64)] {
            let byte = seed ^ salt ^ (len as u8);
            body.push_str(&format!("{} {} {}\n", algo, hex::encode(vec![byte; len]), file));
        }
    }
    body
}
