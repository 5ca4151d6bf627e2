//! Parsing of `git log` output of the dump archive.
//!
//! Each commit of the full branch is rendered as its body followed by the
//! [`COMMIT_BOUNDARY`] line. Body lines are whitespace-separated triples:
//!
//! ```text
//! 2019-01-02T03:01:00+03:00 1546387260 updateTime
//! SHA256 9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08 dump.xml
//! . . .
//! ```

use std::fmt;

/// Upstream writes this instant where a timestamp is absent.
pub const REGISTRY_EPOCH: i64 = 1343462400;

/// Line closing every commit in [`super::LogFormat::Bodies`] output.
pub const COMMIT_BOUNDARY: &str = ". . .";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    UpdateTime,
    UpdateTimeUrgently,
    SigningTime,
    XmlMtime,
    SigMtime,
}

impl TimeField {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "updateTime" => Some(TimeField::UpdateTime),
            "updateTimeUrgently" => Some(TimeField::UpdateTimeUrgently),
            "signingTime" => Some(TimeField::SigningTime),
            "dump.xml mtime" => Some(TimeField::XmlMtime),
            "dump.xml.sig mtime" => Some(TimeField::SigMtime),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Md5,
    Sha1,
    /// Git blob id of the archived file.
    Git,
    Sha256,
    Sha512,
}

impl HashAlgo {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "MD5" => Some(HashAlgo::Md5),
            "SHA1" => Some(HashAlgo::Sha1),
            "GIT" => Some(HashAlgo::Git),
            "SHA256" => Some(HashAlgo::Sha256),
            "SHA512" => Some(HashAlgo::Sha512),
            _ => None,
        }
    }

    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgo::Md5 => 16,
            HashAlgo::Sha1 | HashAlgo::Git => 20,
            HashAlgo::Sha256 => 32,
            HashAlgo::Sha512 => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFile {
    Xml,
    Sig,
}

impl DumpFile {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "dump.xml" => Some(DumpFile::Xml),
            "dump.xml.sig" => Some(DumpFile::Sig),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    Blank,
    Time(TimeField, Option<i64>),
    Digest(HashAlgo, DumpFile, Vec<u8>),
    Boundary,
}

/// Splits like a whitespace split limited to three fields; the last field
/// keeps its inner whitespace.
fn split3(line: &str) -> Option<(&str, &str, &str)> {
    let (a, rest) = line.trim().split_once(char::is_whitespace)?;
    let (b, rest) = rest.trim_start().split_once(char::is_whitespace)?;
    let c = rest.trim_start();
    if c.is_empty() {
        None
    } else {
        Some((a, b, c))
    }
}

pub fn parse_line(line: &str) -> Result<LogLine, String> {
    if line.trim().is_empty() {
        return Ok(LogLine::Blank);
    }
    let (a, b, c) = split3(line).ok_or_else(|| "expected three fields".to_string())?;

    if let Some(field) = TimeField::parse(c) {
        let value: i64 = b
            .parse()
            .map_err(|e| format!("bad timestamp {:?}: {}", b, e))?;
        let value = if value == REGISTRY_EPOCH { None } else { Some(value) };
        return Ok(LogLine::Time(field, value));
    }

    if let Some(algo) = HashAlgo::parse(a) {
        let file = DumpFile::parse(c).ok_or_else(|| format!("unknown file {:?}", c))?;
        let digest = hex::decode(b).map_err(|e| format!("bad hex digest: {}", e))?;
        if digest.len() != algo.digest_len() {
            return Err(format!(
                "{:?} digest is {} bytes, expected {}",
                algo,
                digest.len(),
                algo.digest_len()
            ));
        }
        return Ok(LogLine::Digest(algo, file, digest));
    }

    if a == "." && b == "." && c == "." {
        return Ok(LogLine::Boundary);
    }

    Err("unrecognized line".to_string())
}

/// Digests of one archived file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
    pub git: [u8; 20],
    pub sha256: [u8; 32],
    pub sha512: [u8; 64],
}

/// One release, as stored in the `log` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub update_time: i64,
    pub update_time_urgently: Option<i64>,
    pub signing_time: i64,
    pub xml_mtime: Option<i64>,
    pub sig_mtime: Option<i64>,
    pub xml: FileDigests,
    pub sig: FileDigests,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PartialDigests {
    md5: Option<Vec<u8>>,
    sha1: Option<Vec<u8>>,
    git: Option<Vec<u8>>,
    sha256: Option<Vec<u8>>,
    sha512: Option<Vec<u8>>,
}

impl PartialDigests {
    fn slot(&mut self, algo: HashAlgo) -> &mut Option<Vec<u8>> {
        match algo {
            HashAlgo::Md5 => &mut self.md5,
            HashAlgo::Sha1 => &mut self.sha1,
            HashAlgo::Git => &mut self.git,
            HashAlgo::Sha256 => &mut self.sha256,
            HashAlgo::Sha512 => &mut self.sha512,
        }
    }

    fn finish(&self, prefix: &'static str, missing: &mut Vec<&'static str>) -> Option<FileDigests> {
        fn take<const N: usize>(
            value: &Option<Vec<u8>>,
            name: &'static str,
            missing: &mut Vec<&'static str>,
        ) -> Option<[u8; N]> {
            let array = value.as_deref().and_then(|v| v.try_into().ok());
            if array.is_none() {
                missing.push(name);
            }
            array
        }
        let xml = prefix == "xml";
        let md5 = take(&self.md5, if xml { "xml_md5" } else { "sig_md5" }, missing);
        let sha1 = take(&self.sha1, if xml { "xml_sha1" } else { "sig_sha1" }, missing);
        let git = take(&self.git, if xml { "xml_git" } else { "sig_git" }, missing);
        let sha256 = take(&self.sha256, if xml { "xml_sha256" } else { "sig_sha256" }, missing);
        let sha512 = take(&self.sha512, if xml { "xml_sha512" } else { "sig_sha512" }, missing);
        Some(FileDigests {
            md5: md5?,
            sha1: sha1?,
            git: git?,
            sha256: sha256?,
            sha512: sha512?,
        })
    }
}

/// A record being accumulated from the lines of one commit.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PartialRecord {
    recognized_lines: usize,
    update_time: Option<i64>,
    update_time_urgently: Option<i64>,
    signing_time: Option<i64>,
    xml_mtime: Option<i64>,
    sig_mtime: Option<i64>,
    xml: PartialDigests,
    sig: PartialDigests,
}

impl fmt::Debug for PartialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = |v: &Option<Vec<u8>>| v.as_ref().map(hex::encode);
        f.debug_struct("PartialRecord")
            .field("update_time", &self.update_time)
            .field("update_time_urgently", &self.update_time_urgently)
            .field("signing_time", &self.signing_time)
            .field("xml_mtime", &self.xml_mtime)
            .field("sig_mtime", &self.sig_mtime)
            .field("xml_sha1", &hex(&self.xml.sha1))
            .field("xml_sha256", &hex(&self.xml.sha256))
            .field("sig_sha1", &hex(&self.sig.sha1))
            .finish_non_exhaustive()
    }
}

impl PartialRecord {
    pub fn is_empty(&self) -> bool {
        self.recognized_lines == 0
    }

    fn apply(&mut self, line: LogLine) {
        match line {
            LogLine::Time(field, value) => {
                let slot = match field {
                    TimeField::UpdateTime => &mut self.update_time,
                    TimeField::UpdateTimeUrgently => &mut self.update_time_urgently,
                    TimeField::SigningTime => &mut self.signing_time,
                    TimeField::XmlMtime => &mut self.xml_mtime,
                    TimeField::SigMtime => &mut self.sig_mtime,
                };
                *slot = value;
            }
            LogLine::Digest(algo, file, digest) => {
                let digests = match file {
                    DumpFile::Xml => &mut self.xml,
                    DumpFile::Sig => &mut self.sig,
                };
                *digests.slot(algo) = Some(digest);
            }
            LogLine::Blank | LogLine::Boundary => return,
        }
        self.recognized_lines += 1;
    }

    /// Validates that every required field is present.
    ///
    /// On failure returns the names of the missing columns.
    pub fn finish(&self) -> Result<LogRecord, Vec<&'static str>> {
        let mut missing = Vec::new();
        if self.update_time.is_none() {
            missing.push("update_time");
        }
        if self.signing_time.is_none() {
            missing.push("signing_time");
        }
        let xml = self.xml.finish("xml", &mut missing);
        let sig = self.sig.finish("sig", &mut missing);
        match (self.update_time, self.signing_time, xml, sig) {
            (Some(update_time), Some(signing_time), Some(xml), Some(sig)) if missing.is_empty() => {
                Ok(LogRecord {
                    update_time,
                    update_time_urgently: self.update_time_urgently,
                    signing_time,
                    xml_mtime: self.xml_mtime,
                    sig_mtime: self.sig_mtime,
                    xml,
                    sig,
                })
            }
            _ => Err(missing),
        }
    }
}

/// Outcome of feeding one line to [`CommitLogParser`].
#[derive(Debug)]
pub enum ParseError {
    BadLine {
        line: String,
        record: PartialRecord,
        reason: String,
    },
    Incomplete {
        missing: Vec<&'static str>,
        record: PartialRecord,
    },
}

/// Streams `git log` body output into complete [`LogRecord`]s.
#[derive(Debug, Default)]
pub struct CommitLogParser {
    current: PartialRecord,
}

impl CommitLogParser {
    /// Consumes one output line; returns a record when it closes a commit.
    ///
    /// Commits without any recognized line (the very first and last commits
    /// of the archive) close without producing a record.
    pub fn feed(&mut self, line: &str) -> Result<Option<LogRecord>, ParseError> {
        let parsed = parse_line(line).map_err(|reason| ParseError::BadLine {
            line: line.to_string(),
            record: self.current.clone(),
            reason,
        })?;
        if parsed != LogLine::Boundary {
            self.current.apply(parsed);
            return Ok(None);
        }

        let record = std::mem::take(&mut self.current);
        if record.is_empty() {
            return Ok(None);
        }
        match record.finish() {
            Ok(log_record) => Ok(Some(log_record)),
            Err(missing) => Err(ParseError::Incomplete { missing, record }),
        }
    }

    /// Fails when output ended in the middle of a commit.
    pub fn finish(self) -> Result<(), ParseError> {
        if self.current.is_empty() {
            Ok(())
        } else {
            Err(ParseError::BadLine {
                line: String::new(),
                record: self.current,
                reason: "output ended before the commit boundary".to_string(),
            })
        }
    }
}

/// Parses one line of [`super::LogFormat::AuthorTimes`] output.
pub fn parse_signing_time(line: &str) -> Result<Option<i64>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    line.parse()
        .map(Some)
        .map_err(|e| format!("bad author time {:?}: {}", line, e))
}
