use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use etymo_bot::{BotConfig, CycleOutcome, DriverError, RunOptions};
use etymo_core::SelectionPolicy;
use etymo_sources::{
    EtymologySource, EtymonlineSource, FactsFileSource, LegacyImportSource, WiktionaryDumpSource,
};
use etymo_storage::{CorpusSnapshotStore, SqliteHistoryStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "etymo")]
#[command(about = "Etymology pair bot command-line interface")]
struct Cli {
    /// History database path, overrides ETYMO_DB_PATH.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Corpus snapshot path, overrides ETYMO_CORPUS_PATH.
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PostMode {
    /// Post now.
    Single,
    /// Post only inside a posting hour with nothing posted yet.
    Scheduled,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Select a pair and publish it.
    Post {
        #[arg(long, value_enum, default_value_t = PostMode::Single)]
        mode: PostMode,
        /// Generate but do not publish or record.
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        allow_trivial: bool,
    },
    /// Rebuild the corpus snapshot from etymology sources.
    BuildCorpus {
        /// Wiktionary JSON-lines dump, plain or gzipped.
        #[arg(long)]
        wiktionary: Option<PathBuf>,
        #[arg(long)]
        max_entries: Option<usize>,
        /// JSON-lines fact files; may be repeated.
        #[arg(long = "facts")]
        facts: Vec<PathBuf>,
        #[arg(long)]
        legacy: Option<PathBuf>,
        /// Word list (one per line) to look up on Etymonline.
        #[arg(long)]
        etymonline_words: Option<PathBuf>,
    },
    /// Rebuild the corpus from a legacy root-corpus export.
    ImportLegacy {
        #[arg(long)]
        input: PathBuf,
    },
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Forget word failures older than the retention window.
    Cleanup {
        #[arg(long)]
        days: Option<i64>,
    },
    Migrate,
    /// Check the history database, OpenAI key and Twitter token.
    Validate {
        #[arg(long)]
        json: bool,
    },
    /// Run scheduled checks on a cron expression until interrupted.
    Daemon {
        #[arg(long)]
        cron: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        allow_trivial: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = BotConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(corpus) = cli.corpus {
        config.corpus_path = corpus;
    }
    config.validate()?;

    let command = cli.command.unwrap_or(Commands::Post {
        mode: PostMode::Single,
        dry_run: false,
        allow_trivial: false,
    });

    match command {
        Commands::Post {
            mode,
            dry_run,
            allow_trivial,
        } => {
            post(
                &config,
                mode,
                RunOptions {
                    dry_run,
                    allow_trivial,
                },
            )
            .await?
        }
        Commands::BuildCorpus {
            wiktionary,
            max_entries,
            facts,
            legacy,
            etymonline_words,
        } => {
            let mut sources: Vec<Box<dyn EtymologySource>> = Vec::new();
            if let Some(path) = wiktionary {
                sources.push(Box::new(
                    WiktionaryDumpSource::new(path)?.with_max_entries(max_entries),
                ));
            }
            if let Some(path) = etymonline_words {
                let words = read_word_list(&path).await?;
                let fetcher = etymo_bot::lookup_fetcher(&config)?;
                sources.push(Box::new(EtymonlineSource::new(fetcher, words)?));
            }
            sources.extend(
                facts
                    .into_iter()
                    .map(|path| Box::new(FactsFileSource::new(path)) as Box<dyn EtymologySource>),
            );
            if let Some(path) = legacy {
                sources.push(Box::new(LegacyImportSource::new(path)));
            }
            anyhow::ensure!(
                !sources.is_empty(),
                "no sources given; pass --wiktionary, --etymonline-words, --facts or --legacy"
            );
            build(&config, &sources).await?;
        }
        Commands::ImportLegacy { input } => {
            let sources: Vec<Box<dyn EtymologySource>> =
                vec![Box::new(LegacyImportSource::new(input))];
            build(&config, &sources).await?;
        }
        Commands::Stats { json } => {
            let store = open_store(&config.db_path).await?;
            let stats = etymo_bot::collect_stats(
                &CorpusSnapshotStore::new(&config.corpus_path),
                &store,
                &SelectionPolicy {
                    allow_trivial: false,
                    failure_threshold: config.max_word_failures,
                },
                Utc::now(),
            )
            .await?;
            store.close().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                let built = stats
                    .snapshot_built_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!("corpus built: {built}");
                println!(
                    "roots: {} (pairable {}), words: {}",
                    stats.corpus_roots, stats.pairable_roots, stats.corpus_words
                );
                println!("eligible pairs: {}", stats.candidate_pool);
                println!(
                    "posted: {} total, {} in the last 24h",
                    stats.history.posted_total, stats.history.posts_last_24h
                );
                println!(
                    "failed words: {} ({} excluded)",
                    stats.history.failed_words, stats.history.excluded_words
                );
            }
        }
        Commands::Cleanup { days } => {
            let store = open_store(&config.db_path).await?;
            let removed = etymo_bot::cleanup_failures(
                &store,
                days.unwrap_or(config.failure_retention_days),
                Utc::now(),
            )
            .await?;
            store.close().await;
            println!("cleanup complete: removed={removed}");
        }
        Commands::Migrate => {
            let store = open_store(&config.db_path).await?;
            let applied = store.applied_migrations().await?;
            store.close().await;
            println!(
                "migrate complete: db={} applied_migrations={applied}",
                config.db_path.display()
            );
        }
        Commands::Validate { json } => {
            let report = etymo_bot::validate_system(&config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for check in &report.checks {
                    let mark = if check.ok { "ok" } else { "FAILED" };
                    println!("{:<10} {mark:<6} {}", check.component, check.detail);
                }
            }
            if !report.all_ok() {
                let failed: Vec<&str> = report.failures().map(|c| c.component.as_str()).collect();
                anyhow::bail!("validation failed: {}", failed.join(", "));
            }
        }
        Commands::Daemon {
            cron,
            dry_run,
            allow_trivial,
        } => {
            daemon(
                &config,
                cron.as_deref().unwrap_or(&config.schedule_cron),
                RunOptions {
                    dry_run,
                    allow_trivial,
                },
            )
            .await?
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug,sqlx=warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn open_store(path: &Path) -> Result<SqliteHistoryStore> {
    SqliteHistoryStore::open(path)
        .await
        .with_context(|| format!("opening history database {}", path.display()))
}

async fn read_word_list(path: &Path) -> Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

async fn build(config: &BotConfig, sources: &[Box<dyn EtymologySource>]) -> Result<()> {
    let store = open_store(&config.db_path).await?;
    let report = etymo_bot::build_corpus(
        sources,
        &store,
        config.max_word_failures,
        &CorpusSnapshotStore::new(&config.corpus_path),
    )
    .await;
    store.close().await;
    let report = report?;

    for run in &report.sources {
        match (&run.report, &run.error) {
            (Some(r), _) => println!(
                "source {}: read={} facts={} skipped={}",
                run.source_id, r.records_read, r.facts_emitted, r.skipped
            ),
            (None, Some(err)) => println!("source {}: stopped early: {err}", run.source_id),
            (None, None) => println!("source {}: no report", run.source_id),
        }
    }
    println!(
        "corpus built: roots={} pairable={} facts={} sha256={} path={}",
        report.roots,
        report.pairable_roots,
        report.ingest.facts_seen,
        report.receipt.content_hash,
        report.receipt.path.display()
    );
    Ok(())
}

async fn post(config: &BotConfig, mode: PostMode, options: RunOptions) -> Result<()> {
    let store = Arc::new(open_store(&config.db_path).await?);
    let corpus = etymo_bot::load_corpus(config).await?;
    let driver = etymo_bot::build_driver(config, store.clone(), options)?;
    let mut rng = StdRng::from_entropy();

    let result = match mode {
        PostMode::Single => driver.run_cycle(&corpus, &mut rng).await,
        PostMode::Scheduled => {
            let window = etymo_bot::posting_window(config);
            driver
                .run_scheduled(&corpus, &window, Utc::now(), &mut rng)
                .await
        }
    };
    store.close().await;

    match result {
        Ok(outcome) => {
            print_outcome(&outcome);
            Ok(())
        }
        Err(err) => Err(report_failure(err)),
    }
}

async fn daemon(config: &BotConfig, cron: &str, options: RunOptions) -> Result<()> {
    let store = Arc::new(open_store(&config.db_path).await?);
    let corpus = Arc::new(etymo_bot::load_corpus(config).await?);
    let driver = Arc::new(etymo_bot::build_driver(config, store.clone(), options)?);

    let window = etymo_bot::posting_window(config);
    let mut sched = etymo_bot::build_scheduler(cron, driver, corpus, window).await?;
    sched.start().await.context("starting scheduler")?;
    info!(cron, "daemon running, ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    sched.shutdown().await.context("stopping scheduler")?;
    store.close().await;
    info!("daemon stopped");
    Ok(())
}

fn print_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Posted {
            pair,
            post_id,
            text,
        } => println!("posted {pair} id={post_id}\n{text}"),
        CycleOutcome::DryRun { pair, text } => println!("dry run {pair}\n{text}"),
        CycleOutcome::NothingEligible => println!("nothing eligible to post"),
        CycleOutcome::LowConfidence { pair, confidence } => {
            println!("skipped {pair}: confidence {confidence:.2} below threshold")
        }
        CycleOutcome::Skipped(reason) => println!("outside posting window: {reason:?}"),
    }
}

fn report_failure(err: DriverError) -> anyhow::Error {
    match err.pair() {
        Some(pair) => error!(
            stage = %err.stage(),
            pair = %pair,
            error = %err,
            "posting cycle failed"
        ),
        None => error!(stage = %err.stage(), error = %err, "posting cycle failed"),
    }
    err.into()
}
