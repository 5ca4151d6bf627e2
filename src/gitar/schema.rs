use crate::sqlite_column;
use crate::sqlite_persistence::{Column, Index, SqlType, Table};

/// Last commit of the full branch already merged into `log`. At most one row.
pub const HEAD_TABLE: Table = Table {
    name: "head",
    columns: &[sqlite_column!("commit_hash", &SqlType::Blob, non_null = true)],
    indices: &[],
};

/// Last commit of the light branch already merged into `log100`. At most one row.
pub const MAIN100_TABLE: Table = Table {
    name: "main100",
    columns: &[sqlite_column!("commit_hash", &SqlType::Blob, non_null = true)],
    indices: &[],
};

pub const LOG_TABLE: Table = Table {
    name: "log",
    columns: &[
        sqlite_column!("update_time", &SqlType::Integer, non_null = true),
        sqlite_column!("update_time_urgently", &SqlType::Integer),
        sqlite_column!("signing_time", &SqlType::Integer, non_null = true),
        sqlite_column!("xml_mtime", &SqlType::Integer),
        sqlite_column!("sig_mtime", &SqlType::Integer),
        sqlite_column!("xml_md5", &SqlType::Blob, non_null = true),
        sqlite_column!("sig_md5", &SqlType::Blob, non_null = true),
        sqlite_column!("xml_sha1", &SqlType::Blob, non_null = true, is_unique = true),
        sqlite_column!("sig_sha1", &SqlType::Blob, non_null = true),
        sqlite_column!("xml_git", &SqlType::Blob, non_null = true),
        sqlite_column!("sig_git", &SqlType::Blob, non_null = true),
        sqlite_column!("xml_sha256", &SqlType::Blob, non_null = true),
        sqlite_column!("sig_sha256", &SqlType::Blob, non_null = true),
        sqlite_column!("xml_sha512", &SqlType::Blob, non_null = true),
        sqlite_column!("sig_sha512", &SqlType::Blob, non_null = true),
    ],
    indices: &[
        Index {
            name: "log_update_time",
            columns: "update_time",
            unique: false,
        },
        Index {
            name: "log_xml_sha256",
            columns: "xml_sha256",
            unique: true,
        },
        Index {
            name: "log_signing_time",
            columns: "signing_time",
            unique: false,
        },
    ],
};

/// Signing times of the light branch, one row per commit.
pub const LOG100_TABLE: Table = Table {
    name: "log100",
    columns: &[sqlite_column!("signing_time", &SqlType::Integer, non_null = true)],
    indices: &[Index {
        name: "log100_signing_time",
        columns: "signing_time",
        unique: false,
    }],
};

pub const GITAR_TABLES: &[Table] = &[HEAD_TABLE, MAIN100_TABLE, LOG_TABLE, LOG100_TABLE];
