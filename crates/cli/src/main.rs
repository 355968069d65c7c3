mod report;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harness::{load_submission, HarnessConfig, StageCatalog, StageRunner, STAGE_COUNT};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "respcheck")]
#[command(about = "Check a RESP server submission stage by stage", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./respcheck.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run stages against a submission (all stages by default)
    Run {
        /// Run only this stage
        #[arg(long, conflicts_with = "through", value_parser = clap::value_parser!(u8).range(1..=STAGE_COUNT as i64))]
        stage: Option<u8>,

        /// Run stages 1 through N
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=STAGE_COUNT as i64))]
        through: Option<u8>,

        /// Submission source file
        #[arg(long)]
        source: Option<PathBuf>,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Command that launches the submission
        #[arg(last = true)]
        launch: Vec<String>,
    },
    /// List the stages and their checks
    Stages {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

/// Ok(passed) on a completed run; Err only for harness faults.
async fn execute(cli: Cli) -> Result<bool> {
    let mut config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Stages { json } => {
            let catalog = StageCatalog::new(config.server.port);
            if json {
                let stages: Vec<_> = catalog.iter().collect();
                println!("{}", serde_json::to_string_pretty(&stages)?);
            } else {
                print!("{}", report::render_catalog(&catalog));
            }
            Ok(true)
        }
        Commands::Run {
            stage,
            through,
            source,
            host,
            port,
            json,
            launch,
        } => {
            if let Some(source) = source {
                config.submission.source = source;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if !launch.is_empty() {
                config.submission.command = launch;
            }
            config.validate()?;

            let ordinals: Vec<u8> = match (stage, through) {
                (Some(stage), _) => vec![stage],
                (None, Some(last)) => (1..=last).collect(),
                (None, None) => (1..=STAGE_COUNT).collect(),
            };

            let submission =
                load_submission(&config.submission.source, config.submission.command.clone())
                    .await;
            tracing::info!(
                source = %config.submission.source.display(),
                program = submission.program(),
                stages = ?ordinals,
                "Checking submission"
            );

            let runner = StageRunner::new(config);
            let run = runner.run_stages(&submission, &ordinals).await?;

            if json {
                println!("{}", report::render_json(&run)?);
            } else {
                print!("{}", report::render_human(&run));
            }
            Ok(run.passed())
        }
    }
}

async fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::read(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Ok(HarnessConfig::discover(&cwd).await?)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "respcheck=warn,harness=warn",
        1 => "respcheck=info,harness=info",
        _ => "respcheck=debug,harness=debug",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}
