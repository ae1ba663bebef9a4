use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use cildata_util::app::{self, DownloadOptions};
use cildata_util::config::{ConfigLoader, Endpoints};
use cildata_util::db::SqliteStatusStore;
use cildata_util::error::CilError;
use cildata_util::fetch::RetryingFetcher;
use cildata_util::layout::ArchiveLayout;

#[derive(Parser)]
#[command(name = "cildata")]
#[command(about = "Retrieval, conversion and status tracking for the legacy image/video archive")]
#[command(version)]
struct Cli {
    /// Set the logging level
    #[arg(long = "log", value_enum, global = true, default_value_t = LogLevel::Warning)]
    log: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    #[value(name = "DEBUG")]
    Debug,
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARNING")]
    Warning,
    #[value(name = "ERROR")]
    Error,
    #[value(name = "CRITICAL")]
    Critical,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download all expected files for every public dataset id")]
    Download(DownloadArgs),
    #[command(about = "Normalize downloaded raw assets into the canonical archive layout")]
    Convert(ConvertArgs),
    #[command(about = "Download files missing from a single dataset directory")]
    Check(CheckArgs),
    #[command(about = "Insert download status rows for persisted records")]
    UpdateDb(UpdateDbArgs),
    #[command(about = "Repair a batch file: flatten legacy headers, fill missing sizes")]
    FixJson(FixJsonArgs),
    #[command(about = "Reconcile persisted has_raw flags with the database")]
    UpdateHasRaw(UpdateHasRawArgs),
}

#[derive(Args)]
struct FetchTuning {
    /// Additional fetch attempts after the first
    #[arg(long = "numretries", default_value_t = 2)]
    num_retries: u32,

    /// Seconds to sleep between fetch attempts
    #[arg(long = "retrysleep", default_value_t = 30)]
    retry_sleep: u64,

    /// Per-request timeout in seconds
    #[arg(long = "timeout", default_value_t = 600)]
    timeout: u64,
}

impl FetchTuning {
    fn build_fetcher(&self) -> Result<RetryingFetcher, CilError> {
        RetryingFetcher::new(
            self.num_retries,
            Duration::from_secs(self.retry_sleep),
            Duration::from_secs(self.timeout),
        )
    }
}

#[derive(Args)]
struct DownloadArgs {
    /// Database configuration file
    databaseconf: PathBuf,

    /// Directory where images and videos will be saved
    destdir: Utf8PathBuf,

    /// Only download data with this id
    #[arg(long)]
    id: Option<u64>,

    /// Skip download if directory for id exists on filesystem
    #[arg(long = "skipifexists")]
    skip_if_exists: bool,

    /// Replay persisted batches and retry records that have not succeeded
    #[arg(long = "retryfailed")]
    retry_failed: bool,

    #[command(flatten)]
    tuning: FetchTuning,
}

#[derive(Args)]
struct ConvertArgs {
    /// Directory where images and videos reside
    downloaddir: Utf8PathBuf,

    /// Only convert data with this id
    #[arg(long)]
    id: Option<u64>,

    /// Examine raw image zip files and report entry counts without converting
    #[arg(long = "onlycheckzipfiles")]
    only_check_zip_files: bool,
}

#[derive(Args)]
struct CheckArgs {
    /// Directory containing a single dataset
    datasetfolder: PathBuf,

    /// Print what would be downloaded without changing anything
    #[arg(long = "dryrun")]
    dry_run: bool,

    #[command(flatten)]
    tuning: FetchTuning,
}

#[derive(Args)]
struct UpdateDbArgs {
    /// Database configuration file
    databaseconf: PathBuf,

    /// Directory where images and videos reside
    downloaddir: Utf8PathBuf,

    /// Only update database for this id
    #[arg(long)]
    id: Option<u64>,
}

#[derive(Args)]
struct FixJsonArgs {
    /// Batch file to fix
    jsonfile: PathBuf,
}

#[derive(Args)]
struct UpdateHasRawArgs {
    /// Database configuration file
    databaseconf: PathBuf,

    /// Directory where images and videos are saved
    downloaddir: Utf8PathBuf,

    /// Only update the batch with this id
    #[arg(long)]
    id: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log.directive())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("caught fatal exception: {err}");
            ExitCode::from(1)
        }
    }
}

fn run(command: Commands) -> Result<(), CilError> {
    match command {
        Commands::Download(args) => {
            let config = ConfigLoader::load(&args.databaseconf)?;
            let store = SqliteStatusStore::open(&config.database)?;
            let fetcher = args.tuning.build_fetcher()?;
            let layout = ArchiveLayout::new(args.destdir);
            let options = DownloadOptions {
                id: args.id,
                skip_if_exists: args.skip_if_exists,
                retry_failed: args.retry_failed,
            };
            let summary =
                app::run_download(&store, &fetcher, &config.endpoints, &layout, &options)?;
            tracing::info!(
                attempted = summary.attempted,
                succeeded = summary.succeeded,
                failed = summary.failed,
                batches = summary.batches_written,
                "download finished"
            );
            Ok(())
        }
        Commands::Convert(args) => {
            let layout = ArchiveLayout::new(args.downloaddir);
            let rewritten = app::run_convert(&layout, args.id, args.only_check_zip_files)?;
            tracing::info!(rewritten, "convert finished");
            Ok(())
        }
        Commands::Check(args) => {
            let fetcher = args.tuning.build_fetcher()?;
            let downloads =
                app::run_check(&fetcher, &Endpoints::default(), &args.datasetfolder, args.dry_run)?;
            tracing::info!(downloads, "check finished");
            Ok(())
        }
        Commands::UpdateDb(args) => {
            let config = ConfigLoader::load(&args.databaseconf)?;
            let store = SqliteStatusStore::open(&config.database)?;
            let layout = ArchiveLayout::new(args.downloaddir);
            let inserted = app::run_update_db(&store, &layout, args.id)?;
            tracing::info!(inserted, "database update finished");
            Ok(())
        }
        Commands::FixJson(args) => {
            let rewritten = app::run_fix_json(&args.jsonfile)?;
            tracing::info!(rewritten, "fix-json finished");
            Ok(())
        }
        Commands::UpdateHasRaw(args) => {
            let config = ConfigLoader::load(&args.databaseconf)?;
            let store = SqliteStatusStore::open(&config.database)?;
            let layout = ArchiveLayout::new(args.downloaddir);
            let rewritten = app::run_update_has_raw(&store, &layout, args.id)?;
            tracing::info!(rewritten, "has_raw update finished");
            Ok(())
        }
    }
}
