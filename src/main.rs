use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use logmedic::analyze::{AnalysisClient, RetryPolicy};
use logmedic::config::Config;
use logmedic::monitor::MonitorController;
use logmedic::remediate::{
    AutoApprove, CommandRunner, Confirmer, RemediationGate, ShellRunner, StdinConfirmer,
};
use logmedic::scan::{dedupe_key, ErrorEvent};
use logmedic::{onboarding, util};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "logmedic",
    about = "Watches your logs, diagnoses failures with AI, and proposes fixes you approve",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the background monitor and run until Ctrl-C
    Run,
    /// Diagnose a single error text without starting the monitor
    Analyze {
        /// Error text to analyze (reads stdin when omitted)
        text: Option<String>,
    },
    /// Interactive setup: API key and model selection
    Setup,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("logmedic=info")),
        )
        .init();

    let args = Args::parse();

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_monitor().await,
        Command::Analyze { text } => analyze_once(text).await,
        Command::Setup => {
            onboarding::run_setup().await.map_err(|e| anyhow!(e))?;
            Ok(())
        }
    }
}

async fn run_monitor() -> Result<()> {
    let config = if onboarding::is_first_run() {
        onboarding::run_setup().await.map_err(|e| anyhow!(e))?
    } else {
        Config::load()
    };

    let mut controller = MonitorController::new(config);
    controller.start()?;

    println!("  logmedic is watching. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    println!("  Stopping...");

    controller.stop().await?;
    Ok(())
}

async fn analyze_once(text: Option<String>) -> Result<()> {
    let raw_text = match text {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf.trim().to_string()
        }
    };
    if raw_text.is_empty() {
        return Err(anyhow!("nothing to analyze"));
    }

    let config = Config::load();
    let event = ErrorEvent {
        source: PathBuf::from("stdin"),
        raw_text: raw_text.clone(),
        matched_pattern: "manual".to_string(),
        timestamp: chrono::Utc::now(),
        dedupe_key: dedupe_key(&raw_text),
    };

    let client = AnalysisClient::new(Config::get_api_key(), &config.model);
    let diagnosis = client.analyze_with_retry(&event, &RetryPolicy::none()).await?;

    println!();
    println!("{}", diagnosis.explanation);

    if diagnosis.commands.is_empty() {
        return Ok(());
    }

    let confirmer: Box<dyn Confirmer> = if config.auto_approve {
        Box::new(AutoApprove)
    } else {
        Box::new(StdinConfirmer)
    };
    let runner: Box<dyn CommandRunner> = Box::new(ShellRunner);
    let gate = RemediationGate::new(
        confirmer,
        runner,
        Duration::from_secs(config.command_timeout_secs),
        config.abort_on_decline,
    );

    for outcome in gate.apply(&diagnosis.commands) {
        println!();
        if !outcome.approved {
            println!("  - skipped: {}", outcome.command);
        } else if outcome.succeeded {
            println!("  + ran: {}", outcome.command);
            if !outcome.stdout.trim().is_empty() {
                println!("{}", util::truncate(outcome.stdout.trim(), 1800));
            }
        } else {
            println!(
                "  x failed (exit {:?}): {}",
                outcome.exit_code, outcome.command
            );
            if !outcome.stderr.trim().is_empty() {
                println!("{}", util::truncate(outcome.stderr.trim(), 1800));
            }
        }
    }

    Ok(())
}
