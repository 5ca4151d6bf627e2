//! Local bookkeeping tables of the donors.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table};

/// Cache validators of the che donor. Always exactly one row.
///
/// `xml_sha256` arrived after the first deployments and is appended to
/// existing stores on startup.
pub const CHE_TABLE: Table = Table {
    name: "che",
    columns: &[
        sqlite_column!("etag", &SqlType::Text, non_null = true),
        sqlite_column!("last_modified", &SqlType::Text, non_null = true),
        sqlite_column!("xml_sha256", &SqlType::Blob),
    ],
    indices: &[],
};

/// One row per file observed in the zavod directory listing.
pub const ZAVOD_TABLE: Table = Table {
    name: "zavod",
    columns: &[
        sqlite_column!("zip_fname", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("zip_size", &SqlType::Integer, non_null = true),
        sqlite_column!("fetched", &SqlType::Integer, non_null = true),
        sqlite_column!("xml_sha256", &SqlType::Blob),
        sqlite_column!("last_seen", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

pub const DONOR_TABLES: &[Table] = &[CHE_TABLE, ZAVOD_TABLE];
