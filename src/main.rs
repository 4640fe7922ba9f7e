//! Scripted driver for the history engine.
//!
//! Loads the demo workstation store, then feeds it one command per line from a script file (or
//! stdin). Each command is dispatched to the workstation actor and awaited before the next, so the
//! printed history reflects every step in order.

use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use seismic_history::app::App;
use seismic_history::config::HistoryConfig;
use seismic_history::fixtures;
use seismic_history::item::HistoryItem;
use seismic_history::runtime::{Snapshot, Workstation, WorkstationHandle};
use seismic_history::script::{parse_line, ScriptCommand};
use seismic_history::state::EntityKind;

#[derive(Debug, Parser)]
#[command(name = "seismic-history", about = "Replay a history script against the demo store")]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Script to run; reads stdin when omitted.
    #[arg(long)]
    script: Option<PathBuf>,

    /// Stop at the first command that fails.
    #[arg(long)]
    strict: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<HistoryConfig> {
    let config = match path {
        Some(path) => HistoryConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => HistoryConfig::default(),
    };
    config
        .with_env_overrides()
        .context("applying environment overrides")
}

fn print_item(indent: &str, item: &HistoryItem) {
    println!(
        "{indent}[{:<11}] {} | {} ({})",
        item.status.to_string(),
        item.label,
        item.description,
        item.id
    );
}

fn print_snapshot(snapshot: &Snapshot) {
    let history = &snapshot.history;
    println!(
        "mode: {:?}  can undo: {}  can redo: {}",
        history.mode, snapshot.can_undo, snapshot.can_redo
    );
    println!("global ({} transactions):", history.stack.len());
    for item in &history.stack {
        print_item("  ", item);
    }
    for kind in EntityKind::ALL {
        for (id, stack) in history.entity_stacks(kind) {
            println!("{kind:?} {id}:");
            for item in stack {
                print_item("    ", item);
            }
        }
    }
    let analyst = &snapshot.state.app.analyst;
    println!(
        "open event: {}  selected events: {:?}  selected detections: {:?}",
        analyst.open_event_id.as_deref().unwrap_or("-"),
        analyst.selected_event_ids,
        analyst.selected_sd_ids
    );
}

async fn run_script(handle: &WorkstationHandle, input: Box<dyn BufRead>, strict: bool) -> Result<()> {
    for (number, line) in input.lines().enumerate() {
        let line = line.context("reading script")?;
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) if strict => {
                return Err(err).with_context(|| format!("line {}", number + 1));
            }
            Err(err) => {
                warn!(line = number + 1, %err, "skipping script line");
                continue;
            }
        };

        match command {
            ScriptCommand::Show => print_snapshot(&handle.snapshot().await?),
            ScriptCommand::Dispatch(action) => {
                handle.dispatch(action).await?;
                handle.settle().await?;
                let snapshot = handle.snapshot().await?;
                match &snapshot.last_outcome {
                    Some(Err(err)) if strict => {
                        anyhow::bail!("line {}: {err}", number + 1);
                    }
                    Some(Err(err)) => println!("> {line}\n  failed: {err}"),
                    Some(Ok(outcome)) => println!("> {line}\n  {outcome:?}"),
                    None => println!("> {line}"),
                }
                for item in &snapshot.history.stack {
                    print_item("    ", item);
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_filter))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .try_init();

    info!(max_history = config.max_history, "starting workstation");
    let app = App::with_state(config, fixtures::demo_state());
    let (workstation, handle) = Workstation::new(app);
    let actor = tokio::spawn(workstation.run());

    let input: Box<dyn BufRead> = match &args.script {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path)
                .with_context(|| format!("opening script {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let result = run_script(&handle, input, args.strict).await;

    print_snapshot(&handle.snapshot().await?);
    drop(handle);
    actor.await.context("workstation task")?;
    result
}
