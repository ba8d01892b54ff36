//! Tandem command line.
//!
//! ```text
//! tandem run --suite suite.yaml --templates templates/ --output records.jsonl
//! tandem validate --suite suite.yaml --templates templates/
//! tandem extract --file response.txt
//! ```

mod sink;

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tandem_core::judgment::{extract_object, StructuredJudgment};
use tandem_core::{TemplateResolver, TemplateStore, TestSuite};
use tandem_runtime::{RunSink, RunnerBuilder, RuntimeConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::sink::JsonlSink;

#[derive(Parser)]
#[command(name = "tandem", version, about = "Guided vs baseline LLM comparison runner")]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every test case and model combination of a suite
    Run {
        /// Suite file (YAML, or JSON with a .json extension)
        #[arg(long)]
        suite: PathBuf,

        /// Directory of template files
        #[arg(long)]
        templates: Option<PathBuf>,

        /// Runtime configuration (models, step parameters, timeout)
        #[arg(long)]
        config: Option<PathBuf>,

        /// JSONL output for run records (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Route every model through the offline mock provider
        #[arg(long)]
        mock: bool,
    },

    /// Check a suite file and report templates it references but cannot find
    Validate {
        #[arg(long)]
        suite: PathBuf,

        #[arg(long)]
        templates: Option<PathBuf>,
    },

    /// Extract a structured judgment from model output
    Extract {
        /// Read from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            suite,
            templates,
            config,
            output,
            mock,
        } => run(&suite, templates.as_deref(), config.as_deref(), output.as_deref(), mock).await,
        Commands::Validate { suite, templates } => validate(&suite, templates.as_deref()),
        Commands::Extract { file } => extract(file.as_deref()),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

fn load_suite(path: &Path) -> Result<TestSuite> {
    TestSuite::from_file(path).with_context(|| format!("Failed to load suite {}", path.display()))
}

/// Directory templates first, then the suite's inline templates on top.
fn load_templates(suite: &TestSuite, dir: Option<&Path>) -> Result<TemplateStore> {
    let mut store = TemplateStore::new();
    if let Some(dir) = dir {
        let count = store
            .load_dir(dir)
            .with_context(|| format!("Failed to load templates from {}", dir.display()))?;
        tracing::info!(count, dir = %dir.display(), "Loaded template files");
    }
    store.extend(suite.templates.clone());
    Ok(store)
}

async fn run(
    suite_path: &Path,
    templates_dir: Option<&Path>,
    config_path: Option<&Path>,
    output: Option<&Path>,
    mock: bool,
) -> Result<()> {
    let suite = load_suite(suite_path)?;
    let templates = load_templates(&suite, templates_dir)?;

    let mut config = match config_path {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load runtime config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if mock {
        config = config.into_mock();
    }

    let runner = RunnerBuilder::new()
        .config(config)
        .templates(Arc::new(templates))
        .build()
        .context("Failed to build runner")?;

    let mut sink: Box<dyn RunSink> = match output {
        Some(path) => Box::new(
            JsonlSink::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(JsonlSink::new(io::stdout())),
    };

    let summary = runner
        .run_suite(&suite, sink.as_mut())
        .await
        .with_context(|| format!("Suite '{}' could not run", suite.id))?;

    let rendered = serde_json::to_string_pretty(&summary)?;
    match output {
        Some(_) => println!("{}", rendered),
        None => eprintln!("{}", rendered),
    }

    if !summary.all_completed() {
        tracing::warn!(
            failed_runs = summary.failed_runs,
            failed_records = summary.failed_records,
            "Suite finished with failures"
        );
    }
    Ok(())
}

fn validate(suite_path: &Path, templates_dir: Option<&Path>) -> Result<()> {
    let suite = load_suite(suite_path)?;
    println!(
        "Suite '{}' is valid: {} test case(s), {} record(s) per run",
        suite.id,
        suite.test_cases.len(),
        suite.record_count()
    );

    let templates = load_templates(&suite, templates_dir)?;
    let mut referenced: Vec<String> = suite
        .test_cases
        .iter()
        .flat_map(|case| suite.step_templates_for(case).all().map(str::to_string))
        .chain(
            suite
                .validation_sequences
                .iter()
                .flat_map(|seq| seq.stages.iter().map(|stage| stage.template.clone())),
        )
        .collect();
    referenced.sort();
    referenced.dedup();

    let missing: Vec<&String> = referenced
        .iter()
        .filter(|id| !templates.contains(id))
        .collect();
    if missing.is_empty() {
        println!("All {} referenced template(s) are available", referenced.len());
        return Ok(());
    }
    for id in &missing {
        println!("  missing template: {}", id);
    }
    bail!("{} referenced template(s) are missing", missing.len())
}

fn extract(file: Option<&Path>) -> Result<()> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read stdin")?;
            buffer
        }
    };

    let (object, method) = extract_object(&text)?;
    let judgment = StructuredJudgment::from_object(object)?;
    let output = serde_json::json!({
        "method": method,
        "judgment": judgment,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
