//! Run command implementation for Nova CLI.
//!
//! Loads a notebook document, evaluates it headlessly and prints the
//! resulting cells and history.

use std::path::{Path, PathBuf};
use std::time::Instant;

use nova_core::{CellId, Engine, EngineConfig, EngineEvent, EvalStatus, EvaluationSummary};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::colors;
use crate::document::NotebookDocument;
use crate::output::{print_cell, print_history_entry};

/// Events buffered per cell when printing JSON. Plugin downloads report
/// progress per chunk, so this is generous.
const EVENTS_PER_CELL: usize = 64;

pub struct RunOptions {
    pub cell: Option<u64>,
    pub json: bool,
    pub plugin_dir: Option<PathBuf>,
}

/// Evaluate a notebook document.
pub async fn execute(document_path: &Path, options: RunOptions) -> anyhow::Result<()> {
    let start = Instant::now();
    let document = NotebookDocument::load(document_path)?;
    let name = document.display_name(document_path);

    let mut config = EngineConfig::default();
    if let Some(plugin_dir) = options.plugin_dir {
        config.plugin_dir = plugin_dir;
    }
    config.event_capacity = config
        .event_capacity
        .max(document.cells.len() * EVENTS_PER_CELL);

    let engine = Engine::new(config)?;
    let mut events = engine.subscribe();
    engine.load_cells(document.cells)?;

    if !options.json {
        println!(
            "\n{}Nova{} - Running {}{}{}",
            colors::BOLD,
            colors::RESET,
            colors::CYAN,
            name,
            colors::RESET
        );
        println!("{}", "─".repeat(50));
    }

    let summaries = match options.cell {
        Some(id) => vec![engine.evaluate_cell(CellId::new(id))?.await?],
        None => engine.evaluate_all().await?,
    };

    if options.json {
        print_events(&mut events)?;
    } else {
        print_report(&engine, &summaries, start);
    }

    let failed = summaries
        .iter()
        .filter(|summary| summary.status == EvalStatus::Error)
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} cells failed", summaries.len());
    }

    Ok(())
}

fn print_events(events: &mut broadcast::Receiver<EngineEvent>) -> anyhow::Result<()> {
    loop {
        match events.try_recv() {
            Ok(event) => println!("{}", serde_json::to_string(&event)?),
            Err(TryRecvError::Lagged(missed)) => {
                tracing::warn!(missed, "event output fell behind; some events were dropped");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
        }
    }
}

fn print_report(engine: &Engine, summaries: &[EvaluationSummary], start: Instant) {
    println!("\n{}Cells:{}", colors::BOLD, colors::RESET);
    for summary in summaries {
        if let Some(cell) = engine.cell(summary.cell_id) {
            print_cell(&cell);
        }
    }

    let history = engine.history();
    if !history.is_empty() {
        println!("\n{}History:{}", colors::BOLD, colors::RESET);
        for entry in &history {
            print_history_entry(entry);
        }
    }

    println!("\n{}", "─".repeat(50));
    println!(
        "{}Completed{} {} cells in {:.2}s",
        colors::GREEN,
        colors::RESET,
        summaries.len(),
        start.elapsed().as_secs_f64()
    );
}
