use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rkndex::config::{AppConfig, CliConfig, FileConfig};
use rkndex::donor::{DUMP_SIG, DUMP_XML};
use rkndex::http::build_client;
use rkndex::{open_store, Donor, DonorChe, DonorZavod, GitCli, GitarLog, SqliteStore};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[clap(version, about = "Registry dump mirror and archive index")]
struct CliArgs {
    /// Path to a TOML config file. Values found there override the flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database file.
    #[clap(long = "db", value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Path to the git directory of the dump archive.
    #[clap(long, value_parser = parse_path)]
    pub git_dir: Option<PathBuf>,

    /// URL of the che dump file.
    #[clap(long)]
    pub che_url: Option<String>,

    /// URL of the zavod directory listing.
    #[clap(long)]
    pub zavod_url: Option<String>,

    /// Timeout in seconds for each HTTP request.
    #[clap(long, default_value_t = 60)]
    pub http_timeout_sec: u64,

    /// How long to wait for another process holding the database lock.
    #[clap(long, default_value_t = 60)]
    pub sqlite_timeout_sec: u64,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge new archive commits into the index.
    Sync,
    /// Print index freshness and the XOR digest of all dump.xml SHA-1s.
    Stats,
    /// Print indexed dumps as JSON lines, oldest first.
    DumpsSince {
        /// Lower bound on update_time, epoch seconds.
        #[clap(long)]
        since: i64,
        #[clap(long, default_value_t = 100)]
        count: usize,
        /// Comma-separated subset of columns to print.
        #[clap(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,
    },
    /// Print the git blob id of the dump.xml with this SHA-1.
    LookupSha1 { sha1: String },
    /// Fetch pending dumps from a donor into OUT_DIR/<sha256>/ for archiving.
    Fetch {
        #[clap(long, value_enum)]
        donor: DonorKind,
        #[clap(long, default_value_t = 1)]
        limit: usize,
        #[clap(long, value_parser = parse_path)]
        out_dir: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DonorKind {
    Che,
    Zavod,
}

impl CliArgs {
    fn cli_config(&self) -> CliConfig {
        CliConfig {
            db_path: self.db_path.clone(),
            git_dir: self.git_dir.clone(),
            che_url: self.che_url.clone(),
            zavod_url: self.zavod_url.clone(),
            http_timeout_sec: self.http_timeout_sec,
            sqlite_timeout_sec: self.sqlite_timeout_sec,
        }
    }
}

fn open_index(config: &AppConfig, store: &SqliteStore) -> Result<GitarLog> {
    let git_dir = config.require_git_dir()?;
    Ok(GitarLog::new(store.clone(), Box::new(GitCli::new(git_dir)))?
        .with_refs(&config.head_ref, &config.light_branch))
}

fn run_sync(config: &AppConfig, store: &SqliteStore) -> Result<()> {
    let index = open_index(config, store)?;
    let report = index.poll_fs()?;
    info!(
        "Sync done: {} dumps, {} signing times added",
        report.log_rows, report.log100_rows
    );
    Ok(())
}

fn run_stats(config: &AppConfig, store: &SqliteStore) -> Result<()> {
    let index = open_index(config, store)?;
    let stats = serde_json::json!({
        "max_update_time": index.max_update_time()?,
        "digest_xml_sha1": hex::encode(index.digest_xml_sha1()?),
    });
    println!("{}", stats);
    Ok(())
}

fn run_dumps_since(
    config: &AppConfig,
    store: &SqliteStore,
    since: i64,
    count: usize,
    columns: Option<&[String]>,
) -> Result<()> {
    let index = open_index(config, store)?;
    let columns: Option<Vec<&str>> = columns.map(|c| c.iter().map(String::as_str).collect());
    for row in index.dumps_since(since, count, columns.as_deref())? {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}

fn run_lookup_sha1(config: &AppConfig, store: &SqliteStore, sha1: &str) -> Result<()> {
    let mut xml_sha1 = [0u8; 20];
    hex::decode_to_slice(sha1, &mut xml_sha1)
        .with_context(|| format!("Not a SHA-1 hex digest: {}", sha1))?;
    let index = open_index(config, store)?;
    match index.xml_git_by_sha1(&xml_sha1)? {
        Some(git) => println!("{}", hex::encode(git)),
        None => bail!("No dump with dump.xml SHA-1 {}", sha1),
    }
    Ok(())
}

/// One scheduler round: poll the archive, then stage every pending donor
/// payload the archive doesn't hold yet.
fn run_fetch(
    config: &AppConfig,
    store: &SqliteStore,
    kind: DonorKind,
    limit: usize,
    out_dir: &Path,
) -> Result<()> {
    let index = open_index(config, store)?;
    index.poll_fs()?;

    let client = build_client(&config.user_agent, config.http_timeout)?;
    let mut donor: Box<dyn Donor> = match kind {
        DonorKind::Che => Box::new(DonorChe::new(
            store.clone(),
            client,
            config.require_che_url()?,
        )?),
        DonorKind::Zavod => Box::new(DonorZavod::new(
            store.clone(),
            client,
            config.require_zavod_url()?,
        )?),
    };

    let mut handles = donor.list_handles(limit)?;
    info!("{}: {} pending payloads", donor.name(), handles.len());
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {:?}", out_dir))?;

    for handle in handles.iter_mut() {
        // Same filesystem as the destination so the final move is a rename.
        let scratch = TempDir::new_in(out_dir)?;
        let xml_sha256 = donor.fetch_xml_and_sig(scratch.path(), handle)?;
        let digest = hex::encode(xml_sha256);

        if !index.needs_xml_sha256(&xml_sha256)? {
            info!("{}: {} is already archived", donor.name(), digest);
            continue;
        }
        let dest = out_dir.join(&digest);
        if dest.exists() {
            info!("{}: {} is already staged", donor.name(), digest);
            continue;
        }
        fs::create_dir(&dest)?;
        for name in [DUMP_XML, DUMP_SIG] {
            fs::rename(scratch.path().join(name), dest.join(name))?;
        }
        info!("{}: staged {}", donor.name(), dest.display());
        println!("{}", dest.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install the log subscriber")?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let config = AppConfig::resolve(&cli_args.cli_config(), file_config)?;

    info!("Opening SQLite database at {:?}...", config.db_path);
    let store = open_store(&config.db_path, config.sqlite_timeout)?;

    match &cli_args.command {
        Command::Sync => run_sync(&config, &store)?,
        Command::Stats => run_stats(&config, &store)?,
        Command::DumpsSince {
            since,
            count,
            columns,
        } => run_dumps_since(&config, &store, *since, *count, columns.as_deref())?,
        Command::LookupSha1 { sha1 } => run_lookup_sha1(&config, &store, sha1)?,
        Command::Fetch {
            donor,
            limit,
            out_dir,
        } => run_fetch(&config, &store, *donor, *limit, out_dir)?,
    }

    store.close()?;
    Ok(())
}
