mod file_config;

pub use file_config::{ArchiveConfig, DonorsConfig, FileConfig};

use crate::gitar::{DEFAULT_HEAD_REF, DEFAULT_LIGHT_BRANCH};
use crate::http::default_user_agent;
use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub git_dir: Option<PathBuf>,
    pub che_url: Option<String>,
    pub zavod_url: Option<String>,
    pub http_timeout_sec: u64,
    pub sqlite_timeout_sec: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub git_dir: Option<PathBuf>,
    pub che_url: Option<String>,
    pub zavod_url: Option<String>,
    pub http_timeout: Duration,
    pub sqlite_timeout: Duration,
    pub user_agent: String,
    pub head_ref: String,
    pub light_branch: String,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| anyhow!("db_path must be specified via --db or in config file"))?;

        // The database file itself is created on demand, its directory is not.
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let git_dir = file
            .git_dir
            .map(PathBuf::from)
            .or_else(|| cli.git_dir.clone());

        let donors = file.donors.unwrap_or_default();
        let che_url = donors.che_url.or_else(|| cli.che_url.clone());
        let zavod_url = donors.zavod_url.or_else(|| cli.zavod_url.clone());

        let http_timeout_sec = file.http_timeout_sec.unwrap_or(cli.http_timeout_sec);
        let sqlite_timeout_sec = file.sqlite_timeout_sec.unwrap_or(cli.sqlite_timeout_sec);
        if http_timeout_sec == 0 {
            bail!("http_timeout_sec must be positive");
        }

        let archive = file.archive.unwrap_or_default();

        Ok(Self {
            db_path,
            git_dir,
            che_url,
            zavod_url,
            http_timeout: Duration::from_secs(http_timeout_sec),
            sqlite_timeout: Duration::from_secs(sqlite_timeout_sec),
            user_agent: file.user_agent.unwrap_or_else(default_user_agent),
            head_ref: archive
                .head_ref
                .unwrap_or_else(|| DEFAULT_HEAD_REF.to_string()),
            light_branch: archive
                .light_branch
                .unwrap_or_else(|| DEFAULT_LIGHT_BRANCH.to_string()),
        })
    }

    pub fn require_git_dir(&self) -> Result<&PathBuf> {
        self.git_dir
            .as_ref()
            .ok_or_else(|| anyhow!("git_dir must be specified via --git-dir or in config file"))
    }

    pub fn require_che_url(&self) -> Result<&str> {
        self.che_url
            .as_deref()
            .ok_or_else(|| anyhow!("che_url must be specified via --che-url or in config file"))
    }

    pub fn require_zavod_url(&self) -> Result<&str> {
        self.zavod_url
            .as_deref()
            .ok_or_else(|| anyhow!("zavod_url must be specified via --zavod-url or in config file"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli_with_db(dir: &TempDir) -> CliConfig {
        CliConfig {
            db_path: Some(dir.path().join("rkndex.sqlite")),
            http_timeout_sec: 60,
            sqlite_timeout_sec: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            git_dir: Some(PathBuf::from("/srv/archive.git")),
            che_url: Some("http://che.example/dump.zip".to_string()),
            http_timeout_sec: 15,
            ..cli_with_db(&temp_dir)
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_path, temp_dir.path().join("rkndex.sqlite"));
        assert_eq!(config.git_dir, Some(PathBuf::from("/srv/archive.git")));
        assert_eq!(config.che_url.as_deref(), Some("http://che.example/dump.zip"));
        assert_eq!(config.zavod_url, None);
        assert_eq!(config.http_timeout, Duration::from_secs(15));
        assert_eq!(config.sqlite_timeout, Duration::from_secs(60));
        assert_eq!(config.head_ref, "HEAD");
        assert_eq!(config.light_branch, "main100");
        assert!(config.user_agent.starts_with("rkndex/"));
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/should/be/overridden.sqlite")),
            zavod_url: Some("http://cli.example/".to_string()),
            che_url: Some("http://cli.example/dump.zip".to_string()),
            http_timeout_sec: 60,
            sqlite_timeout_sec: 60,
            ..Default::default()
        };
        let file_config = FileConfig {
            db_path: Some(temp_dir.path().join("db.sqlite").to_string_lossy().to_string()),
            sqlite_timeout_sec: Some(5),
            user_agent: Some("mirror/1".to_string()),
            donors: Some(DonorsConfig {
                zavod_url: Some("http://toml.example/".to_string()),
                ..Default::default()
            }),
            archive: Some(ArchiveConfig {
                head_ref: Some("refs/heads/main".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        // TOML values should override CLI
        assert_eq!(config.db_path, temp_dir.path().join("db.sqlite"));
        assert_eq!(config.zavod_url.as_deref(), Some("http://toml.example/"));
        assert_eq!(config.sqlite_timeout, Duration::from_secs(5));
        assert_eq!(config.user_agent, "mirror/1");
        assert_eq!(config.head_ref, "refs/heads/main");
        // CLI value used when TOML doesn't specify
        assert_eq!(config.che_url.as_deref(), Some("http://cli.example/dump.zip"));
        assert_eq!(config.http_timeout, Duration::from_secs(60));
        assert_eq!(config.light_branch, "main100");
    }

    #[test]
    fn test_resolve_missing_db_path_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_path must be specified"));
    }

    #[test]
    fn test_resolve_missing_db_directory_error() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/nonexistent/dir/rkndex.sqlite")),
            http_timeout_sec: 60,
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_relative_db_path() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("rkndex.sqlite")),
            http_timeout_sec: 60,
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, None).is_ok());
    }

    #[test]
    fn test_resolve_zero_http_timeout_error() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            http_timeout_sec: 0,
            ..cli_with_db(&temp_dir)
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_require_helpers() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli_with_db(&temp_dir), None).unwrap();

        assert!(config
            .require_git_dir()
            .unwrap_err()
            .to_string()
            .contains("git_dir"));
        assert!(config.require_che_url().is_err());
        assert!(config.require_zavod_url().is_err());
    }
}
