mod config;
mod job;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use regsweep_crawler::{
    CheckpointStore, CrawlOutcome, Crawler, ErrorCounter, FetchClient, FetchLimiter,
    FileErrorCounter, JsonCheckpointStore, OnError, PrefixSpace,
};
use regsweep_store::{PgCheckpointStore, PgEntityStore};
use tokio::runtime;

use crate::config::{AppConfig, CheckpointBackend};
use crate::job::DailyJob;

const DEFAULT_LOG_FILTER: &str =
    "regsweep=info,regsweep_crawler=info,regsweep_store=info,regsweep_export=info";

/// Exit status of a crawl stopped before covering every prefix.
const EXIT_INTERRUPTED: u8 = 2;

/// Daily sweep of newly registered businesses
#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: SubCommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum SubCommand {
    Crawl(CrawlArgs),
    Export(ExportArgs),
    Prefixes(PrefixesArgs),
    #[command(hide = true)]
    Completion {
        #[arg(value_enum, default_value_t = Shell::Bash)]
        shell: Shell,
    },
}

#[derive(Debug, clap::Args)]
pub struct CommonArgs {
    /// Optional yaml configuration file
    #[arg(env = "REGSWEEP_CONFIG", long, short)]
    pub config: Option<PathBuf>,
    /// Override the database connection string
    #[arg(env = "DATABASE_URL", long, hide_env_values = true)]
    pub database_url: Option<String>,
    /// Day to work on (UTC), defaults to today
    #[arg(long)]
    pub day: Option<NaiveDate>,
    /// When quiet no logs are outputted
    #[arg(long, short)]
    pub quiet: bool,
}

impl CommonArgs {
    fn day(&self) -> NaiveDate {
        self.day.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn load(&self) -> anyhow::Result<AppConfig> {
        let mut conf = AppConfig::load(self.config.as_deref())?;
        if let Some(database_url) = &self.database_url {
            conf.storage.database_url = Some(database_url.clone());
        }
        Ok(conf)
    }
}

/// Crawl every search prefix, persist new entities, export once complete
#[derive(Debug, clap::Args)]
pub struct CrawlArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    /// Override the session cookies, as `name=value; name2=value2`
    #[arg(env = "REGSWEEP_COOKIES", long, hide_env_values = true)]
    pub cookies: Option<String>,
    /// Override the user agent
    #[arg(long)]
    pub user_agent: Option<String>,
    /// Stop after this many prefixes
    #[arg(long)]
    pub limit: Option<usize>,
    /// Override the maximum number of in-flight requests
    #[arg(long)]
    pub max_concurrent_requests: Option<usize>,
    /// Override the number of prefixes searched at once
    #[arg(long)]
    pub prefix_concurrency: Option<usize>,
    /// Override how many days back a filing still counts as new
    #[arg(long)]
    pub retention_days: Option<u32>,
    /// Override the search error handling strategy
    #[arg(value_enum, long)]
    pub on_search_error: Option<OnError>,
    /// Override where checkpoints are kept
    #[arg(value_enum, long)]
    pub checkpoints: Option<CheckpointBackend>,
    /// Override the directory for error counters and file checkpoints
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
    /// Override the export root directory
    #[arg(long)]
    pub export_root: Option<PathBuf>,
    /// Skip the export after a complete crawl
    #[arg(long)]
    pub no_export: bool,
}

impl TryFrom<&CrawlArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: &CrawlArgs) -> Result<Self, Self::Error> {
        let mut conf = args.common.load()?;
        let crawler = &mut conf.crawler;
        if let Some(cookies) = &args.cookies {
            crawler.request = crawler.request.clone().with_cookie_string(cookies);
        }
        if let Some(user_agent) = &args.user_agent {
            crawler.request.user_agent = user_agent.to_string();
        }
        if let Some(limit) = args.limit {
            crawler.limit = Some(limit);
        }
        if let Some(max_concurrent_requests) = args.max_concurrent_requests {
            crawler.max_concurrent_requests = max_concurrent_requests;
        }
        if let Some(prefix_concurrency) = args.prefix_concurrency {
            crawler.prefix_concurrency = prefix_concurrency;
        }
        if let Some(retention_days) = args.retention_days {
            crawler.retention_days = retention_days;
        }
        if let Some(on_search_error) = args.on_search_error {
            crawler.on_search_error = on_search_error;
        }
        if let Some(checkpoints) = args.checkpoints {
            conf.storage.checkpoints = checkpoints;
        }
        if let Some(state_dir) = &args.state_dir {
            conf.storage.state_dir = state_dir.clone();
        }
        if let Some(export_root) = &args.export_root {
            conf.export.root = export_root.clone();
        }
        Ok(conf)
    }
}

/// Export what was persisted on a given day without crawling
#[derive(Debug, clap::Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    /// Override the export root directory
    #[arg(long)]
    pub export_root: Option<PathBuf>,
    /// Error count written to the manifest instead of the day's counter
    #[arg(long)]
    pub errors: Option<u64>,
}

/// Print search prefixes, starting after a checkpoint if given
#[derive(Debug, clap::Args)]
pub struct PrefixesArgs {
    /// Optional yaml configuration file
    #[arg(env = "REGSWEEP_CONFIG", long, short)]
    pub config: Option<PathBuf>,
    /// Start right after this prefix
    #[arg(long)]
    pub after: Option<String>,
    /// Number of prefixes to print
    #[arg(long, short = 'n', default_value_t = 10)]
    pub count: usize,
}

struct Stores {
    entities: Arc<PgEntityStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    errors: Arc<FileErrorCounter>,
}

async fn open_stores(conf: &AppConfig, day: NaiveDate) -> anyhow::Result<Stores> {
    let Some(database_url) = conf.storage.database_url.as_deref() else {
        bail!("No database configured, set DATABASE_URL or storage.databaseUrl");
    };
    let pool = regsweep_store::connect(database_url, conf.storage.max_connections).await?;
    regsweep_store::migrate(&pool).await?;

    let jurisdiction = conf.crawler.registry.jurisdiction.as_str();
    let checkpoints: Arc<dyn CheckpointStore> = match conf.storage.checkpoints {
        CheckpointBackend::Database => Arc::new(PgCheckpointStore::new(pool.clone())),
        CheckpointBackend::File => Arc::new(JsonCheckpointStore::new(&conf.storage.state_dir)),
    };
    fs_err::create_dir_all(&conf.storage.state_dir)?;
    let errors = Arc::new(FileErrorCounter::daily(
        &conf.storage.state_dir,
        jurisdiction,
        day,
    ));

    Ok(Stores {
        entities: Arc::new(PgEntityStore::new(pool)),
        checkpoints,
        errors,
    })
}

async fn crawl(args: CrawlArgs) -> anyhow::Result<ExitCode> {
    let conf = AppConfig::try_from(&args)?;
    let day = args.common.day();
    let stores = open_stores(&conf, day).await?;

    let crawler_conf = conf.crawler.clone();
    let client = FetchClient::new(
        &crawler_conf.request,
        crawler_conf.retry,
        FetchLimiter::new(crawler_conf.max_concurrent_requests),
        stores.errors.clone(),
    )?;
    let crawler = Crawler::new(
        crawler_conf,
        client,
        stores.entities.clone(),
        stores.checkpoints.clone(),
    )?;

    let shutdown = crawler.shutdown_token();
    tokio::spawn(async move {
        if let Some(signal) = shutdown_signal().await {
            log::warn!("Received {signal}, finishing in-flight prefixes");
            shutdown.cancel();
        }
    });

    let started = Instant::now();
    match crawler.run(day).await? {
        CrawlOutcome::Completed(_) => {
            let job = DailyJob {
                jurisdiction: conf.crawler.registry.jurisdiction.clone(),
                entities: stores.entities,
                checkpoints: stores.checkpoints,
                errors: stores.errors,
                export: (!args.no_export).then(|| conf.export.clone()),
            };
            job.finalize(day, started.elapsed()).await?;
            Ok(ExitCode::SUCCESS)
        }
        CrawlOutcome::Interrupted(stats) => {
            log::warn!(
                "Crawl for {day} interrupted after {} prefixes, checkpoint kept at {:?}",
                stats.prefixes,
                stats.last_prefix
            );
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
    }
}

/// Resolves with the name of the first stop signal received, or `None` when
/// no signal can be listened for.
async fn shutdown_signal() -> Option<&'static str> {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some("Ctrl-C"),
            Err(e) => {
                log::error!("Couldn't listen for Ctrl-C: {e}");
                None
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => sigterm.recv().await.map(|()| "SIGTERM"),
            Err(e) => {
                log::error!("Couldn't listen for SIGTERM: {e}");
                None
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<&'static str>>();

    tokio::select! {
        Some(name) = ctrl_c => Some(name),
        Some(name) = terminate => Some(name),
        else => None,
    }
}

async fn export(args: ExportArgs) -> anyhow::Result<ExitCode> {
    let mut conf = args.common.load()?;
    if let Some(export_root) = &args.export_root {
        conf.export.root = export_root.clone();
    }
    let day = args.common.day();
    let stores = open_stores(&conf, day).await?;
    let crawl_errors = args.errors.unwrap_or_else(|| stores.errors.load());

    let job = DailyJob {
        jurisdiction: conf.crawler.registry.jurisdiction.clone(),
        entities: stores.entities,
        checkpoints: stores.checkpoints,
        errors: stores.errors,
        export: None,
    };
    let output = job
        .export(&conf.export, day, std::time::Duration::ZERO, crawl_errors)
        .await?;
    println!("{}", output.dir.display());
    Ok(ExitCode::SUCCESS)
}

fn prefixes(args: PrefixesArgs) -> anyhow::Result<ExitCode> {
    let conf = AppConfig::load(args.config.as_deref())?;
    let space = PrefixSpace::new(&conf.crawler.prefix_alphabet, conf.crawler.prefix_length)?;
    let start = match &args.after {
        Some(prefix) => space
            .position(prefix)
            .map(|index| index + 1)
            .with_context(|| format!("{prefix:?} is not part of the prefix space"))?,
        None => 0,
    };
    eprintln!("{} prefixes in total, starting at index {start}", space.len());
    for prefix in space.iter_from(start).take(args.count) {
        println!("{prefix}");
    }
    Ok(ExitCode::SUCCESS)
}

fn init_logging(quiet: bool) {
    if !quiet {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_LOG_FILTER))
            .init();
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    match args.cmd {
        SubCommand::Crawl(args) => {
            init_logging(args.common.quiet);
            let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
            rt.block_on(crawl(args))
        }
        SubCommand::Export(args) => {
            init_logging(args.common.quiet);
            let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
            rt.block_on(export(args))
        }
        SubCommand::Prefixes(args) => prefixes(args),
        SubCommand::Completion { shell } => {
            generate(shell, &mut Args::command(), "regsweep", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Ignoring .env: {e}");
        }
    }
    match run(Args::parse()) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_is_a_shutdown_signal() {
        let waiter = tokio::spawn(shutdown_signal());
        // Let the listeners register before signalling.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let pid = std::process::id().to_string();
        let status = std::process::Command::new("kill")
            .args(["-TERM", &pid])
            .status()
            .unwrap();
        assert!(status.success());

        let received = tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Some("SIGTERM"));
    }

    #[test]
    fn cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn crawl_flags_override_config() {
        let args = Args::parse_from([
            "regsweep",
            "crawl",
            "--day",
            "2024-06-10",
            "--limit",
            "5",
            "--retention-days",
            "2",
            "--on-search-error",
            "fail",
            "--checkpoints",
            "file",
            "--cookies",
            "a=1; b=2",
            "--database-url",
            "postgres://localhost/regsweep",
        ]);
        let SubCommand::Crawl(args) = args.cmd else {
            panic!("expected crawl");
        };
        let conf = AppConfig::try_from(&args).unwrap();
        assert_eq!(args.common.day(), NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        assert_eq!(conf.crawler.limit, Some(5));
        assert_eq!(conf.crawler.retention_days, 2);
        assert_eq!(conf.crawler.on_search_error, OnError::Fail);
        assert_eq!(conf.storage.checkpoints, CheckpointBackend::File);
        assert_eq!(conf.crawler.request.cookie_header().as_deref(), Some("a=1; b=2"));
        assert_eq!(
            conf.storage.database_url.as_deref(),
            Some("postgres://localhost/regsweep")
        );
    }
}
