//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{dump_zip, DonorServer, DUMP_SIG_1, DUMP_XML_1};
//!
//! #[test]
//! fn test_something() {
//!     let server = DonorServer::spawn();
//!     server.put_file("registry-1.zip", dump_zip(DUMP_XML_1, DUMP_SIG_1));
//! }
//! ```

#![allow(dead_code)]

mod constants;
mod fixtures;
mod server;

// Public API - this is what tests import
pub use constants::*;
pub use fixtures::{
    archive_commit_body, create_test_store, dump_zip, insert_log_row, listing_page, sha256,
};
pub use server::{CheFile, DonorServer, RecordedRequest};

/// Client the donors use in tests: short timeout, identifiable agent.
pub fn test_client() -> reqwest::blocking::Client {
    rkndex::http::build_client(
        &rkndex::http::default_user_agent(),
        std::time::Duration::from_secs(10),
    )
    .expect("Failed to build HTTP client")
}
