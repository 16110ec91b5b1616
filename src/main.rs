//! infra-lens - AI summaries of infrastructure diffs
//!
//! Command-line entry point, usually run as a GitHub Actions step.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use infra_lens::cache::{CacheStatsReport, CacheStore};
use infra_lens::config::Config;
use infra_lens::output::{self, ActionOutputs, SummaryMetadata};
use infra_lens::retry::ResilientInvoker;
use infra_lens::sink::{DryRunSink, GithubCommentSink, SummarySink};
use infra_lens::summarizer::{load_diff, OpenAiClient, Summarizer, SummaryReport};
use infra_lens::tasks::spawn_cleanup_task;

#[derive(Parser, Debug)]
#[command(name = "infra-lens", version, about = "Summarize infrastructure diffs with AI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize the diff file and publish the result (default)
    Summarize {
        /// Diff file to read instead of CDK_DIFF_FILE
        #[arg(long)]
        diff_file: Option<PathBuf>,
    },
    /// Print cache statistics as JSON
    CacheStats,
    /// Remove every cache entry
    CacheClear,
    /// Expire and evict entries now
    CacheSweep,
}

/// Main entry point.
///
/// # Startup Sequence
/// 1. Parse arguments and load configuration from the environment
/// 2. Initialize tracing (logs go to stderr, stdout carries workflow commands)
/// 3. Run the selected command
///
/// Exits 1 only when the run could not start (bad configuration, unusable
/// cache for maintenance commands). A failed summary still exits 0 and is
/// reported through the `success` output.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    init_tracing(config.log_level.as_deref());

    let command = cli.command.unwrap_or(Command::Summarize { diff_file: None });
    let result = match command {
        Command::Summarize { diff_file } => {
            if let Some(path) = diff_file {
                config.diff_file = path;
            }
            summarize(config).await
        }
        Command::CacheStats => open_cache(&config).and_then(|store| {
            let report = CacheStatsReport::from(store.stats());
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }),
        Command::CacheClear => open_cache(&config).and_then(|store| {
            let removed = store
                .clear()
                .ok_or_else(|| anyhow!("failed to clear cache at {}", config.cache.dir.display()))?;
            output::notice(&format!("Cache cleared: {} entries removed", removed));
            Ok(())
        }),
        Command::CacheSweep => open_cache(&config).map(|store| {
            let report = store.sweep();
            output::notice(&format!(
                "Cache sweep: {} expired, {} evicted, {} orphaned files removed",
                report.expired, report.evicted, report.orphans
            ));
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

/// RUST_LOG wins; otherwise LOG_LEVEL (default info) applies to this crate.
fn init_tracing(log_level: Option<&str>) {
    let level = log_level.unwrap_or("info").trim().to_ascii_lowercase();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("infra_lens={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_cache(config: &Config) -> anyhow::Result<CacheStore> {
    config.validate(false)?;
    CacheStore::open(&config.cache)
        .with_context(|| format!("failed to open cache at {}", config.cache.dir.display()))
}

async fn summarize(config: Config) -> anyhow::Result<()> {
    let outputs = ActionOutputs::new(config.output_path.clone());
    if let Err(e) = config.validate(true) {
        if let Err(write_err) = outputs.write_error(&e.to_string()) {
            warn!("Failed to write action outputs: {}", write_err);
        }
        return Err(e.into());
    }

    output::notice("Infrastructure diff summarizer starting");
    output::notice(&format!("Diff file: {}", config.diff_file.display()));

    let cache = if config.cache.enabled {
        match CacheStore::open(&config.cache) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!("Cache unavailable, continuing without it: {}", e);
                None
            }
        }
    } else {
        info!("Cache disabled");
        None
    };

    let sweeper = cache
        .as_ref()
        .zip(config.cache.sweep_interval)
        .map(|(store, interval)| spawn_cleanup_task(store.clone(), interval));

    let cancel = CancellationToken::new();
    let deadline = config.total_timeout.map(|budget| {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            warn!("Summary time budget of {}s exhausted", budget.as_secs());
            token.cancel();
        })
    });

    let client = OpenAiClient::new(&config.ai)?;
    let summarizer = Summarizer::new(
        client,
        cache,
        ResilientInvoker::new(config.retry_policy()),
        config.ai.clone(),
    );

    let diff = load_diff(&config.diff_file);
    let report = summarizer.summarize_with_cancel(&diff, &cancel).await;

    if let Some(handle) = deadline {
        handle.abort();
    }
    if let Some(handle) = sweeper {
        handle.abort();
    }

    let issue_number = publish(&config, &report).await;
    let repository = config.github.as_ref().map(|g| g.repository.as_str());
    let metadata = SummaryMetadata::new(&report, &config.ai.model, repository);
    if let Err(e) = outputs.write_report(&report, issue_number, &metadata) {
        warn!("Failed to write action outputs: {}", e);
    }

    if report.is_success() {
        output::notice(&format!("Summary ready (source: {})", report.source));
    } else {
        output::error(&report.summary);
    }
    Ok(())
}

/// Posts successful summaries; posting problems are logged, never fatal.
async fn publish(config: &Config, report: &SummaryReport) -> Option<u64> {
    if !report.is_success() {
        return None;
    }

    let sink: Box<dyn SummarySink> = match (&config.github, config.dry_run) {
        (_, true) => Box::new(DryRunSink),
        (Some(github), false) => match GithubCommentSink::new(github.clone()) {
            Ok(sink) => Box::new(sink),
            Err(e) => {
                warn!("GitHub posting unavailable: {:#}", e);
                return None;
            }
        },
        (None, false) => {
            info!("GitHub posting not configured");
            return None;
        }
    };

    match sink.publish(&report.summary).await {
        Ok(number) => number,
        Err(e) => {
            warn!("Failed to post summary: {:#}", e);
            output::warning(&format!("Failed to post summary: {:#}", e));
            None
        }
    }
}
