//! Report formatting.

use nova_core::{Cell, CellValue, EvalStatus, HistoryEntry, HistoryType, LanguageRegistry};

use crate::colors;

/// Longest value preview printed per line.
const MAX_PREVIEW: usize = 200;

fn preview(value: &CellValue) -> String {
    let text = value.to_string();
    let text = text.trim_end();
    if text.chars().count() > MAX_PREVIEW {
        let cut: String = text.chars().take(MAX_PREVIEW).collect();
        format!("{cut}…")
    } else {
        text.to_string()
    }
}

pub fn print_cell(cell: &Cell) {
    let (color, label) = match cell.eval_status {
        Some(EvalStatus::Success) => (colors::GREEN, "ok"),
        Some(EvalStatus::Error) => (colors::RED, "error"),
        Some(EvalStatus::AsyncPending) => (colors::YELLOW, "pending"),
        None => (colors::DIM, "skipped"),
    };
    println!(
        "{}{}{} {}({}){} {}{}{}",
        colors::CYAN,
        cell.id,
        colors::RESET,
        colors::DIM,
        cell.cell_type,
        colors::RESET,
        color,
        label,
        colors::RESET
    );

    if !cell.value.is_empty() {
        for line in preview(&cell.value).lines() {
            println!("  {line}");
        }
    }
}

pub fn print_history_entry(entry: &HistoryEntry) {
    let kind = match entry.history_type {
        HistoryType::CellEvalValue => "value",
        HistoryType::CellEvalInfo => "info",
        HistoryType::CellEvalExternalResource => "resource",
    };
    let color = if entry.value.is_error() {
        colors::RED
    } else {
        colors::RESET
    };
    println!(
        "{}[{}]{} {} {}{}{} {}{}{}",
        colors::DIM,
        entry.history_id,
        colors::RESET,
        entry.cell_id,
        colors::DIM,
        kind,
        colors::RESET,
        color,
        preview(&entry.value),
        colors::RESET
    );
}

pub fn print_languages() {
    let registry = LanguageRegistry::with_builtins();
    println!("{}Languages:{}", colors::BOLD, colors::RESET);
    for definition in registry.definitions() {
        println!(
            "  {}{}{}  {}",
            colors::CYAN,
            definition.language_id,
            colors::RESET,
            definition.display_name
        );
    }
}
