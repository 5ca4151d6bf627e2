//! Access to the commit history of the dump archive.

use super::GitarError;
use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId([u8; 20]);

impl CommitId {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self)
    }
}

/// How each commit of a range is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Commit body followed by the `. . .` boundary line.
    Bodies,
    /// Author time in epoch seconds, one commit per line.
    AuthorTimes,
}

impl LogFormat {
    pub fn git_arg(&self) -> &'static str {
        match self {
            LogFormat::Bodies => "--format=tformat:%b%n. . .",
            LogFormat::AuthorTimes => "--format=format:%at",
        }
    }
}

/// Read-only view of a git repository.
pub trait CommitHistory {
    /// Resolves a ref to the commit it points at.
    fn rev_parse(&self, rev: &str) -> Result<CommitId, GitarError>;

    /// Feeds every output line of `git log` for the commits reachable from
    /// `upto` but not from `since` (all of history when `since` is `None`).
    ///
    /// Stops and returns the first error produced by `f`.
    fn for_each_log_line(
        &self,
        since: Option<CommitId>,
        upto: CommitId,
        format: LogFormat,
        f: &mut dyn FnMut(&str) -> Result<(), GitarError>,
    ) -> Result<(), GitarError>;
}

/// [`CommitHistory`] backed by the `git` executable.
pub struct GitCli {
    git_dir: PathBuf,
}

impl GitCli {
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("--git-dir").arg(&self.git_dir);
        cmd
    }
}

impl CommitHistory for GitCli {
    fn rev_parse(&self, rev: &str) -> Result<CommitId, GitarError> {
        let output = self
            .command()
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{}^{{commit}}", rev))
            .stderr(Stdio::null())
            .output()
            .map_err(GitarError::Spawn)?;
        if !output.status.success() {
            return Err(GitarError::BadRef(rev.to_string()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        CommitId::from_hex(stdout.trim()).ok_or_else(|| GitarError::BadRef(rev.to_string()))
    }

    fn for_each_log_line(
        &self,
        since: Option<CommitId>,
        upto: CommitId,
        format: LogFormat,
        f: &mut dyn FnMut(&str) -> Result<(), GitarError>,
    ) -> Result<(), GitarError> {
        let range = match since {
            Some(since) => format!("{}..{}", since, upto),
            None => upto.to_string(),
        };
        debug!("git log {} {}", format.git_arg(), range);

        let mut child = self
            .command()
            .arg("log")
            .arg(format.git_arg())
            .arg(&range)
            .stdout(Stdio::piped())
            .spawn()
            .map_err(GitarError::Spawn)?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(GitarError::Spawn(std::io::Error::other("git stdout not captured")));
        };

        if let Err(e) = feed_lines(BufReader::new(stdout), f) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }

        let status = child.wait().map_err(GitarError::Io)?;
        if !status.success() {
            return Err(GitarError::GitFailed {
                command: format!("git log {}", range),
                status,
            });
        }
        Ok(())
    }
}

fn feed_lines(
    mut reader: impl BufRead,
    f: &mut dyn FnMut(&str) -> Result<(), GitarError>,
) -> Result<(), GitarError> {
    let mut line = String::new();
    while reader.read_line(&mut line).map_err(GitarError::Io)? > 0 {
        f(line.trim_end_matches(['\n', '\r']))?;
        line.clear();
    }
    Ok(())
}
