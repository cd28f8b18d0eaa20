//! Chorus CLI
//!
//! Sends one prompt to several models at once and streams every answer.

mod logging;
mod output;

use anyhow::{Context, Result};
use chorus_core::types::Turn;
use chorus_core::{ChatEvent, ChatOrchestrator, ChorusConfig, TurnOutcome};
use clap::Parser;
use output::{write_summary, StreamPrinter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "chorus-cli", version, about = "Send one prompt to several models and stream every answer")]
struct Cli {
    /// Configuration file (defaults to <config_dir>/chorus/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target model id; repeat for several. Defaults to every configured model.
    #[arg(short, long = "model")]
    models: Vec<String>,

    /// Formatting template; `{input}` is replaced by the prompt
    #[arg(long)]
    template: Option<String>,

    /// System prompt
    #[arg(long)]
    system: Option<String>,

    /// Per-request timeout in seconds (0 disables)
    #[arg(long)]
    timeout: Option<u64>,

    /// trace, debug, info, warn, error or off
    #[arg(long)]
    log_level: Option<String>,

    #[arg(short, long)]
    verbose: bool,

    /// Also print reasoning streams
    #[arg(long)]
    show_reasoning: bool,

    prompt: String,
}

fn load_config(cli: &Cli) -> Result<ChorusConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => ChorusConfig::default_path().context("no configuration directory on this platform")?,
    };
    debug!("Loading config: path={}", path.display());
    let mut config = ChorusConfig::load(&path)?;
    if let Some(timeout) = cli.timeout {
        config.orchestrator.request_timeout_secs = timeout;
    }
    Ok(config)
}

fn build_turn(cli: &Cli, config: &ChorusConfig) -> Result<Turn> {
    let models = if cli.models.is_empty() {
        config.model_ids()
    } else {
        cli.models.clone()
    };
    if models.is_empty() {
        anyhow::bail!("no target models: pass --model or configure [[models]]");
    }
    for model in &models {
        if config.model(model).is_none() {
            warn!("Model is not configured and will fail: model={}", model);
        }
    }

    let mut turn = Turn::new(cli.prompt.clone(), models);
    if let Some(template) = &cli.template {
        turn = turn.with_template(template.clone());
    }
    if let Some(system) = &cli.system {
        turn = turn.with_system_prompt(system.clone());
    }
    Ok(turn)
}

async fn run(cli: Cli) -> Result<TurnOutcome> {
    let config = load_config(&cli)?;
    let turn = build_turn(&cli, &config)?;
    let orchestrator = Arc::new(ChatOrchestrator::from_config(&config)?);

    let mut events = orchestrator.subscribe();
    let submitted = orchestrator.submit_turn(turn)?;
    let turn_id = submitted.turn_id.clone();
    info!("Turn started: turn_id={}, slots={}", turn_id, submitted.slots.len());

    let mut printer = StreamPrinter::new(std::io::stdout(), cli.show_reasoning);
    let wait = orchestrator.wait_for_turn(&turn_id);
    tokio::pin!(wait);
    let mut stopping = false;

    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome?,
            event = events.recv() => match event {
                Ok(ChatEvent::Slot(event)) if event.turn_id == turn_id => printer.slot_event(&event)?,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Event stream lagged: skipped={}", skipped),
                Err(RecvError::Closed) => break (&mut wait).await?,
            },
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                let stopped = orchestrator.stop_turn(&turn_id)?;
                info!("Interrupted, stopping turn: turn_id={}, stopped={}", turn_id, stopped);
            }
        }
    };

    // Deltas published before the turn settled may still be queued.
    loop {
        match events.try_recv() {
            Ok(ChatEvent::Slot(event)) if event.turn_id == turn_id => printer.slot_event(&event)?,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    printer.finish()?;

    orchestrator.release_turn(&turn_id)?;
    orchestrator.shutdown();
    Ok(outcome)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let env_level = std::env::var(logging::LOG_LEVEL_ENV).ok();
    let level = logging::resolve_level(cli.log_level.as_deref(), env_level.as_deref(), cli.verbose);
    logging::init_logging(level)?;
    debug!("Log level: {}", logging::level_to_str(level));

    let outcome = run(cli).await?;
    write_summary(&mut std::io::stdout(), &outcome)?;

    Ok(if outcome.failed() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
