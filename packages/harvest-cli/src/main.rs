// Command-line entry point for profile harvesting runs

mod config;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvester::{
    export_profiles, BrowserOptions, CacheStore, ChunkConfig, ChunkingSummarizer,
    CookieAuthenticator, FetchConfig, FetchWorker, HttpBrowser, ModelConfig, OpenAiSummarizer,
    Orchestrator, PipelineConfig, ProfileExtractor, ProfileSearch, RateConfig, RateGovernor,
    RotatingIdentityPool, RunReport, SessionConfig, SessionManager, SqliteKv, TargetId,
};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "harvest", version, about = "Rate-governed profile harvesting")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Acquire and summarize a worklist of profiles
    Run(RunArgs),
    /// Show cache counts and failure kinds
    Status,
    /// Export DONE profiles as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Profile URLs
    targets: Vec<String>,

    /// File with one profile URL per line
    #[arg(long)]
    targets_file: Option<PathBuf>,

    /// Build the worklist from a people search
    #[arg(long)]
    discover: Option<String>,

    /// Search result pages to walk with --discover
    #[arg(long, default_value_t = 3)]
    max_pages: u32,

    #[arg(long, env = "HARVEST_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    #[arg(long)]
    headful: bool,

    /// Re-process profiles that are already DONE
    #[arg(long)]
    force_refresh: bool,

    /// Re-process profiles that FAILED
    #[arg(long)]
    retry_failed: bool,

    #[arg(long, env = "HARVEST_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvester=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let kv = Arc::new(
        SqliteKv::new(&config.database_url)
            .await
            .context("Failed to open cache database")?,
    );

    match cli.command {
        Command::Run(args) => run(&config, kv, args).await,
        Command::Status => status(kv).await,
        Command::Export { out } => export(kv, out).await,
    }
}

async fn run(config: &Config, kv: Arc<SqliteKv>, args: RunArgs) -> Result<()> {
    let api_key = config
        .openai_api_key
        .clone()
        .context("OPENAI_API_KEY must be set")?;

    let mut authenticator = CookieAuthenticator::new();
    if let Some(cookie) = &config.session_cookie {
        authenticator = authenticator.with_cookie(cookie.clone());
    }
    if let Some(credentials) = config.credentials() {
        authenticator = authenticator.with_credentials(credentials);
    }

    let identities = RotatingIdentityPool::from_lists(config.user_agents.clone(), config.proxies.clone());
    tracing::info!(identities = identities.len(), "identity pool ready");

    let session = Arc::new(
        SessionManager::new(
            Arc::new(authenticator),
            Arc::new(identities),
            SessionConfig::default(),
        )
        .with_store(kv.clone()),
    );
    if session.restore().await.context("Failed to restore session")? {
        tracing::info!("resuming stored session");
    }

    let rate = RateConfig::default().with_requests_per_minute(config.requests_per_minute);
    let governor = Arc::new(RateGovernor::new(rate).context("Invalid rate configuration")?);

    let browser = Arc::new(HttpBrowser::new(BrowserOptions {
        headless: !args.headful,
        ..Default::default()
    }));

    let mut worklist = read_targets(&args)?;
    if let Some(keyword) = &args.discover {
        let identity = session
            .ensure_valid()
            .await
            .context("Discovery needs a logged-in session")?;
        let found = ProfileSearch::new(keyword.as_str())
            .with_max_pages(args.max_pages)
            .discover(browser.as_ref(), &identity, &governor)
            .await
            .context("Profile discovery failed")?;
        println!("{} {} profiles for {:?}", "✓ Discovered".green(), found.len(), keyword);
        worklist.extend(found);
    }
    if worklist.is_empty() {
        bail!("No targets: pass profile URLs, --targets-file or --discover");
    }

    let fetcher = Arc::new(FetchWorker::new(
        browser,
        Arc::new(ProfileExtractor::new()),
        governor,
        FetchConfig::default(),
    ));

    let mut model = OpenAiSummarizer::new(api_key);
    if let Some(base_url) = &config.openai_base_url {
        model = model.with_base_url(base_url.as_str());
    }
    let summarizer = Arc::new(ChunkingSummarizer::new(
        Arc::new(model),
        ChunkConfig::new(ModelConfig::new(config.model.as_str(), config.token_budget)),
    ));

    let pipeline = PipelineConfig::new()
        .with_concurrency(args.concurrency)
        .with_max_attempts(args.max_attempts);
    let pipeline = if args.force_refresh { pipeline.force_refresh() } else { pipeline };
    let pipeline = if args.retry_failed { pipeline.retry_failed() } else { pipeline };

    let orchestrator = Orchestrator::new(CacheStore::new(kv), session, fetcher, summarizer, pipeline);

    let stop = orchestrator.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("stop requested, letting in-flight targets finish");
            stop.cancel();
        }
    });

    println!("\n🚀 Harvesting {} profiles...\n", worklist.len());
    let report = orchestrator.run(worklist).await.context("Run aborted")?;
    print_report(&report);

    if let Some(kind) = report.halted {
        bail!("run halted: {}", kind);
    }
    Ok(())
}

/// Targets from arguments and --targets-file, in order. Blank lines and `#`
/// comments are ignored.
fn read_targets(args: &RunArgs) -> Result<Vec<TargetId>> {
    let mut raw: Vec<String> = args.targets.clone();
    if let Some(path) = &args.targets_file {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read targets file {}", path.display()))?;
        raw.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }

    Ok(parse_targets(&raw))
}

/// Profile URLs become targets; anything else is logged and dropped.
fn parse_targets(lines: &[String]) -> Vec<TargetId> {
    lines
        .iter()
        .filter_map(|line| {
            let target = TargetId::from_profile_url(line).filter(|id| {
                id.as_str().starts_with("http://") || id.as_str().starts_with("https://")
            });
            if target.is_none() {
                tracing::warn!(line = %line, "skipping target that is not a profile URL");
            }
            target
        })
        .collect()
}

fn print_report(report: &RunReport) {
    println!("\n{}", "═".repeat(60));
    println!("Run {}", report.run_id);
    println!("  {} {}", "DONE:".green(), report.done.len());
    println!("  {} {}", "FAILED:".red(), report.failed.len());
    println!("  {} {}", "Skipped:".dimmed(), report.skipped.len());
    if !report.not_started.is_empty() {
        println!("  {} {}", "Not started:".yellow(), report.not_started.len());
    }
    if !report.recovered.is_empty() {
        println!("  {} {}", "Recovered:".yellow(), report.recovered.len());
    }

    for (target, kind) in &report.failed {
        println!("  {} {} ({})", "✗".red(), target, kind);
    }

    if let Some(kind) = report.halted {
        println!("\n{} {}", "⚠ Halted:".red().bold(), kind);
    }
    if report.stopped {
        println!("\n{}", "⚠ Stopped by user; rerun to resume".yellow());
    }
    println!("{}", "═".repeat(60));
}

async fn status(kv: Arc<SqliteKv>) -> Result<()> {
    let cache = CacheStore::new(kv);
    let counts = cache.counts().await.context("Failed to read cache")?;

    println!("{} {}", "DONE:".green(), counts.done);
    println!("{} {}", "FAILED:".red(), counts.failed);
    println!("{} {}", "PENDING:".yellow(), counts.pending);

    let mut breakdown: Vec<_> = cache
        .failure_breakdown()
        .await
        .context("Failed to read cache")?
        .into_iter()
        .collect();
    breakdown.sort_by(|a, b| b.1.cmp(&a.1));
    for (kind, count) in breakdown {
        println!("  {:<24} {}", kind.to_string(), count);
    }
    Ok(())
}

async fn export(kv: Arc<SqliteKv>, out: Option<PathBuf>) -> Result<()> {
    let export = export_profiles(&CacheStore::new(kv))
        .await
        .context("Failed to read cache")?;
    let json = export.to_json_pretty().context("Failed to encode export")?;

    match out {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{} {} profiles to {} at {}",
                "✓ Exported".green(),
                export.profiles.len(),
                path.display(),
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}
