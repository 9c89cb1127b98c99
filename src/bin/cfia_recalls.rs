use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use cfia_recalls::app::{App, RunOptions};
use cfia_recalls::classify::{Classifier, RuleSet};
use cfia_recalls::config::{RulesLoader, Settings, SettingsLoader};
use cfia_recalls::error::RecallError;
use cfia_recalls::normalize::{canonical_issue, clean_text};
use cfia_recalls::output::{self, JsonOutput, LogSink};
use cfia_recalls::source::{HttpRecallSource, RetryPolicy};
use cfia_recalls::store::RecallStore;

#[derive(Parser)]
#[command(name = "cfia-recalls")]
#[command(about = "Fetch, classify and load CFIA food recalls into SQLite")]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON instead of a summary.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the full pipeline (default)")]
    Run(RunArgs),
    #[command(about = "Show how a single recall would be classified")]
    Classify(ClassifyArgs),
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// Overrides CFIA_SOURCE_URL.
    #[arg(long)]
    source_url: Option<String>,

    /// Overrides CFIA_DATABASE_PATH.
    #[arg(long)]
    database: Option<String>,

    /// Overrides CFIA_RULES_PATH.
    #[arg(long)]
    rules: Option<String>,

    /// Load every recall, not only Salmonella / Listeria / E. coli ones.
    #[arg(long)]
    all_issues: bool,
}

#[derive(Args)]
struct ClassifyArgs {
    #[arg(long)]
    title: String,

    #[arg(long, default_value = "")]
    issue: String,

    #[arg(long, default_value = "")]
    class: String,

    #[arg(long)]
    rules: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<RecallError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RecallError) -> u8 {
    match error {
        RecallError::Config(_)
        | RecallError::ConfigRead(_)
        | RecallError::RulesParse(_)
        | RecallError::InvalidRule { .. } => 2,
        RecallError::FetchHttp { .. }
        | RecallError::FetchStatus { .. }
        | RecallError::SourceDecode(_) => 3,
        RecallError::Load(_) | RecallError::Database(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run_pipeline(args, cli.json),
        Commands::Classify(args) => run_classify(args, cli.json),
    }
}

fn run_pipeline(args: RunArgs, json: bool) -> miette::Result<()> {
    let mut settings = SettingsLoader::load()?;
    apply_overrides(&mut settings, &args);
    tracing::info!(
        source = %settings.source_url,
        database = %settings.database_path,
        "starting recall run"
    );

    let classifier = Classifier::new(load_rules(settings.rules_path.as_ref())?);
    let source = HttpRecallSource::new(
        settings.source_url.clone(),
        settings.pagination.clone(),
        settings.http_timeout,
        RetryPolicy {
            max_retries: settings.max_retries,
            base_delay: settings.retry_delay,
        },
    )?;
    let mut store = RecallStore::open(&settings.database_path)?;
    let app = App::new(
        source,
        classifier,
        RunOptions {
            food_only: settings.food_only,
        },
    );

    if json {
        let report = app.run(&mut store, &JsonOutput)?;
        JsonOutput::print_run(&report).into_diagnostic()?;
    } else {
        let report = app.run(&mut store, &LogSink)?;
        output::print_run_summary(&report);
    }
    Ok(())
}

fn apply_overrides(settings: &mut Settings, args: &RunArgs) {
    if let Some(url) = &args.source_url {
        settings.source_url = url.clone();
    }
    if let Some(path) = &args.database {
        settings.database_path = Utf8PathBuf::from(path);
    }
    if let Some(path) = &args.rules {
        settings.rules_path = Some(Utf8PathBuf::from(path));
    }
    if args.all_issues {
        settings.food_only = false;
    }
}

fn run_classify(args: ClassifyArgs, json: bool) -> miette::Result<()> {
    let rules_path = args
        .rules
        .map(Utf8PathBuf::from)
        .or_else(|| std::env::var("CFIA_RULES_PATH").ok().map(Utf8PathBuf::from));
    let classifier = Classifier::new(load_rules(rules_path.as_ref())?);
    let classification = classifier.classify(
        &clean_text(&args.title),
        &canonical_issue(&clean_text(&args.issue)),
        &clean_text(&args.class),
    );
    if json {
        JsonOutput::print_classification(&classification).into_diagnostic()?;
    } else {
        output::print_classification(&classification);
    }
    Ok(())
}

fn load_rules(path: Option<&Utf8PathBuf>) -> Result<RuleSet, RecallError> {
    match path {
        Some(path) => {
            tracing::info!(path = %path, "loading classification rules");
            RuleSet::from_config(RulesLoader::read(path)?)
        }
        None => RuleSet::builtin(),
    }
}
