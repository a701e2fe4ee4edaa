use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use roundtable_core::{
    Config, ConfigLoader, Event, EventCollector, Orchestrator, ResearchConfig, RoundtableError,
    SessionOutcome, SourceName, TelemetryOptions, init_telemetry, persist_run_record,
};
use tokio::runtime::Runtime;
use tracing::{info, warn};
use uuid::Uuid;

mod stub;

#[derive(Parser, Debug)]
#[command(name = "roundtable", version, about = "Multi-analyst research reports")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one research session and print or save the report.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Topic to research.
    #[arg(long)]
    topic: String,

    /// Override the configured number of analyst personas.
    #[arg(long)]
    max_analysts: Option<usize>,

    /// Configuration file (falls back to ROUNDTABLE_CONFIG, then config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the report to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(args).await?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn run_command(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config)?;
    if let Some(max_analysts) = args.max_analysts {
        config.research.max_analysts = max_analysts;
        config.research.validate()?;
    }

    init_telemetry(TelemetryOptions {
        env_filter: Some(format!(
            "{level},roundtable_core={level}",
            level = config.logging.level
        )),
        ..TelemetryOptions::default()
    })?;

    info!(topic = %args.topic, analysts = config.research.max_analysts, "starting research run");

    let sources = parse_sources(&config.evidence.sources);
    let (events, mut receiver) = EventCollector::new();

    // The stub backends keep the binary self-contained; swapping in live
    // services is a matter of providing other trait implementations here.
    let orchestrator = Orchestrator::new(
        Arc::new(stub::StubCompletion),
        Arc::new(stub::StubEvidence),
        config.research.clone(),
        sources,
        events,
    );

    let report = orchestrator.run(&args.topic).await?;

    let mut failed_sessions = 0;
    while let Ok(event) = receiver.try_recv() {
        if let Event::SessionFinished {
            persona,
            outcome: SessionOutcome::Failure { reason },
            ..
        } = event
        {
            warn!(%persona, %reason, "session dropped from report");
            failed_sessions += 1;
        }
    }

    let run_id = Uuid::new_v4().to_string();
    persist_run_record(&run_id, &report, failed_sessions);
    info!(
        %run_id,
        sections = report.sections.len(),
        citations = report.citations.len(),
        failed_sessions,
        "run complete"
    );

    let markdown = report.to_markdown();
    match args.output {
        Some(path) => {
            std::fs::write(&path, &markdown)?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{markdown}"),
    }
    Ok(())
}

/// Load configuration, falling back to built-in defaults when no file is
/// discoverable and none was requested explicitly.
fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let explicit = path.is_some();
    match ConfigLoader::load(path) {
        Ok(config) => Ok(config),
        Err(RoundtableError::ConfigIo { path, source }) if !explicit => {
            warn!(path = %path.display(), error = %source, "no config file found, using defaults");
            Ok(default_config())
        }
        Err(err) => Err(err.into()),
    }
}

fn default_config() -> Config {
    Config {
        llm: roundtable_core::LlmConfig {
            provider: "stub".to_string(),
            model: "canned".to_string(),
            api_key_env: String::new(),
        },
        research: ResearchConfig::default(),
        evidence: Default::default(),
        logging: Default::default(),
    }
}

fn parse_sources(names: &[String]) -> Vec<SourceName> {
    names
        .iter()
        .filter_map(|name| {
            let parsed = SourceName::parse(name);
            if parsed.is_none() {
                warn!(source = %name, "unknown evidence source in config, skipping");
            }
            parsed
        })
        .collect()
}
