use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mutrace::config::Config;
use mutrace::manifest::{TestFilter, TestManifest};
use mutrace::stability::command::CommandExecutor;
use mutrace::stability::{report, summary, JsonFileSink, StabilityAnalyzer};
use mutrace::trace::diff::{affected_tests, different_units_for_tests, differences_by_test};
use mutrace::trace::{JsonTraceStore, TraceCaches, TraceKind};

#[derive(Parser)]
#[command(name = "mutrace")]
#[command(version)]
#[command(about = "Trace differencing and test stability analysis for mutation testing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a mutant run's trace against the baseline
    Diff {
        /// Run id of the mutant
        #[arg(short, long)]
        mutant: String,

        /// Trace kind to compare (line or value)
        #[arg(short, long, default_value = "line")]
        kind: TraceKind,

        /// Baseline run id (overrides config)
        #[arg(long)]
        baseline: Option<String>,

        /// Trace store root (overrides config)
        #[arg(long)]
        traces: Option<PathBuf>,

        /// Show differing units per test
        #[arg(long)]
        per_test: bool,
    },

    /// Run tests repeatedly in random order and classify their stability
    Stability {
        /// Test manifest (TOML)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Number of rounds (overrides config)
        #[arg(short, long)]
        rounds: Option<usize>,

        /// Seed for reproducible orderings (overrides config)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Only run tests whose id matches one of these globs
        #[arg(short, long)]
        filter: Vec<String>,

        /// Directory for the classification artifacts (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List run ids with a stored trace
    Runs {
        /// Trace kind to list (line or value)
        #[arg(short, long, default_value = "line")]
        kind: TraceKind,

        /// Trace store root (overrides config)
        #[arg(long)]
        traces: Option<PathBuf>,
    },

    /// Write the default configuration file
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_deref())?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Data directory: {}", config.data_dir().display());

    match cli.command {
        Commands::Diff {
            mutant,
            kind,
            baseline,
            traces,
            per_test,
        } => {
            let root = traces.unwrap_or_else(|| config.traces_dir());
            let baseline = baseline.unwrap_or_else(|| config.traces.baseline_run_id.clone());
            run_diff(&root, &baseline, &mutant, kind, per_test).await?;
        }
        Commands::Stability {
            manifest,
            rounds,
            seed,
            filter,
            output,
        } => {
            let mut stability = config.stability.clone();
            if let Some(rounds) = rounds {
                stability.rounds = rounds;
            }
            if seed.is_some() {
                stability.seed = seed;
            }
            let output = output.unwrap_or_else(|| config.reports_dir());
            run_stability(&manifest, stability, TestFilter::new(filter), output).await?;
        }
        Commands::Runs { kind, traces } => {
            let root = traces.unwrap_or_else(|| config.traces_dir());
            let store = JsonTraceStore::new(root);
            tracing::info!("Listing {} traces under {}", kind, store.root().display());
            for run in store.list_runs(kind).await? {
                println!("{}", run);
            }
        }
        Commands::InitConfig => {
            let path = config.save(cli.config.as_deref())?;
            println!("Wrote configuration to {}", path.display());
        }
    }

    Ok(())
}

async fn run_diff(
    root: &Path,
    baseline: &str,
    mutant: &str,
    kind: TraceKind,
    per_test: bool,
) -> anyhow::Result<()> {
    let caches = TraceCaches::with_baseline_id(Arc::new(JsonTraceStore::new(root)), baseline);
    let cache = caches.for_kind(kind);

    let original = cache.baseline().await?;
    let mutated = cache.get(mutant).await?;

    tracing::info!(
        "Comparing {} traces: baseline {} ({} tests) vs mutant {} ({} tests)",
        kind,
        baseline,
        original.len(),
        mutant,
        mutated.len()
    );

    if per_test {
        for (test, units) in differences_by_test(kind, Some(&*original), Some(&*mutated)) {
            println!("{}", test);
            for unit in units {
                println!("\t{}", unit);
            }
        }
    } else {
        for unit in different_units_for_tests(kind, Some(&*original), Some(&*mutated)) {
            println!("{}", unit);
        }
    }

    let affected = affected_tests(kind, Some(&*original), Some(&*mutated));
    if affected.is_empty() {
        println!("No test observed a {} difference", kind);
    } else {
        println!("{} tests observed a {} difference", affected.len(), kind);
    }
    Ok(())
}

async fn run_stability(
    manifest_path: &Path,
    stability: mutrace::config::StabilityConfig,
    filter: TestFilter,
    output: PathBuf,
) -> anyhow::Result<()> {
    let manifest = TestManifest::load(manifest_path)?;
    let base_dir = manifest_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let collection = manifest.into_collection(&base_dir, &filter);
    tracing::info!(
        "Analyzing {} tests over {} rounds",
        collection.count_tests(),
        stability.rounds
    );
    if stability.rounds == 0 {
        tracing::warn!("Round count is 0; every test will be classified stable and passing");
    }

    let executor = Arc::new(CommandExecutor::new(
        tokio::runtime::Handle::current(),
        base_dir,
        Duration::from_secs(stability.test_timeout_seconds),
    ));

    // The analyzer blocks on each command, so keep it off the async workers
    let (run, classification) = tokio::task::spawn_blocking({
        let executor = Arc::clone(&executor);
        move || {
            let mut analyzer = StabilityAnalyzer::from_config(&stability);
            analyzer.analyze(collection, &*executor)
        }
    })
    .await
    .context("Stability analysis task failed")?;

    if executor.called_from_async_context() {
        anyhow::bail!(
            "Test commands could not be run from the analysis thread; no reports written"
        );
    }

    let mut sink = JsonFileSink::new(&output);
    report(&classification, &mut sink)?;

    print!("{}", summary(&classification));
    println!(
        "Ran {} tests in {} rounds ({} ms); reports written to {}",
        run.tests_run,
        run.rounds,
        run.elapsed.as_millis(),
        output.display()
    );
    Ok(())
}
