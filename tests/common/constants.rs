//! Shared constants for end-to-end tests

/// Validators served by the che endpoint in the first release.
pub const CHE_ETAG_1: &str = "\"5c2c3a3c-1e00000\"";
pub const CHE_LAST_MODIFIED_1: &str = "Wed, 02 Jan 2019 00:01:00 GMT";

/// Validators of the next release.
pub const CHE_ETAG_2: &str = "\"5c2c4840-1e00010\"";
pub const CHE_LAST_MODIFIED_2: &str = "Wed, 02 Jan 2019 01:01:00 GMT";

pub const DUMP_XML_1: &str = "<?xml version=\"1.0\" encoding=\"windows-1251\"?><reg:register updateTime=\"2019-01-02T03:01:00+03:00\"/>";
pub const DUMP_SIG_1: &str = "-----BEGIN PKCS7-----\nAAAA\n-----END PKCS7-----\n";
pub const DUMP_XML_2: &str = "<?xml version=\"1.0\" encoding=\"windows-1251\"?><reg:register updateTime=\"2019-01-02T04:02:00+03:00\"/>";
pub const DUMP_SIG_2: &str = "-----BEGIN PKCS7-----\nBBBB\n-----END PKCS7-----\n";

pub const ZIP_NAME_1: &str = "registry-2019-01-02-0301.zip";
pub const ZIP_NAME_2: &str = "registry-2019-01-02-0402.zip";

/// Wall clock used by zavod reconciliation tests, epoch seconds.
pub const T0: i64 = 1_546_387_260;
pub const HOUR: i64 = 60 * 60;
