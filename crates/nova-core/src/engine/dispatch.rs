//! Per-cell-type evaluation strategies.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};

use super::queue::{EvaluationSummary, PendingEvaluation};
use super::Shared;
use crate::cell::{Cell, CellType, CellUpdate, CellValue, EvalStatus};
use crate::dependency::{DependencyStatus, parse_dependency_list};
use crate::error::EvaluationError;
use crate::events::AppMessage;
use crate::history::NewHistoryEntry;
use crate::host::{EvalContext, Evaluator};
use crate::markdown::render_markdown;
use crate::plugin::{PluginKind, PluginSpec, loader};

const STYLES_UPDATED: &str = "Page styles updated";
const DEPENDENCIES_HEADER: &str = "// added external dependencies:";
const MISSING_PLUGIN_TYPE: &str = "No loader for plugin type or missing \"pluginType\" entry";

/// How a cell gets evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Strategy {
    Code,
    Markdown,
    Css,
    ExternalDependencies,
    LanguagePlugin,
    /// `plugin_type` is `None` when the declaration has no `pluginType`.
    UnsupportedPlugin { plugin_type: Option<String> },
}

impl Strategy {
    fn for_cell(cell: &Cell) -> Self {
        match cell.cell_type {
            CellType::Code => Self::Code,
            CellType::Markdown => Self::Markdown,
            CellType::Css => Self::Css,
            CellType::ExternalDependencies => Self::ExternalDependencies,
            // Unparseable declarations go to the loader, which reports the
            // parse failure in its history entry.
            CellType::Plugin => match PluginSpec::parse(&cell.content).map(|spec| spec.kind()) {
                Ok(PluginKind::Language) | Err(_) => Self::LanguagePlugin,
                Ok(PluginKind::Undeclared) => Self::UnsupportedPlugin { plugin_type: None },
                Ok(PluginKind::Other(plugin_type)) => Self::UnsupportedPlugin {
                    plugin_type: Some(plugin_type),
                },
            },
        }
    }
}

/// Start evaluating `cell` with the strategy for its type.
pub(super) fn dispatch(shared: &Arc<Shared>, cell: Cell) -> PendingEvaluation {
    let strategy = Strategy::for_cell(&cell);
    tracing::debug!(cell = %cell.id, ?strategy, "dispatching evaluation");

    match strategy {
        Strategy::Code => {
            let cell_id = cell.id;
            let task = evaluate_code(shared.clone(), cell);
            shared.queue.submit(cell_id, task)
        }
        Strategy::LanguagePlugin => {
            let cell_id = cell.id;
            let task = loader::evaluate_language_plugin(shared.clone(), cell);
            shared.queue.submit(cell_id, task)
        }
        Strategy::Markdown => PendingEvaluation::ready(evaluate_markdown(shared, &cell)),
        Strategy::Css => PendingEvaluation::ready(evaluate_css(shared, &cell)),
        Strategy::ExternalDependencies => {
            let cell_id = cell.id;
            PendingEvaluation::spawn(cell_id, evaluate_dependencies(shared.clone(), cell))
        }
        Strategy::UnsupportedPlugin { plugin_type } => {
            PendingEvaluation::ready(reject_plugin(shared, &cell, plugin_type.as_deref()))
        }
    }
}

fn summary(cell: &Cell, status: EvalStatus) -> EvaluationSummary {
    EvaluationSummary {
        cell_id: cell.id,
        cell_type: cell.cell_type,
        status,
    }
}

fn resolve_evaluator(shared: &Shared, cell: &Cell) -> Result<Evaluator, EvaluationError> {
    let language = cell.language.as_deref().unwrap_or_default();
    let definition = shared.language(language).ok_or_else(|| {
        EvaluationError::with_name("LanguageError", format!("unknown language \"{language}\""))
    })?;

    shared
        .environment
        .evaluator(&definition.module, &definition.evaluator)
        .ok_or_else(|| {
            EvaluationError::with_name(
                "LanguageError",
                format!(
                    "evaluator {}.{} for language \"{language}\" is not installed",
                    definition.module, definition.evaluator
                ),
            )
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "evaluator panicked".to_string()
    }
}

/// Run a synchronous evaluator. On a multi-threaded runtime the worker
/// thread is handed off first so a slow evaluator does not stall other tasks.
fn run_evaluator(
    evaluator: &Evaluator,
    code: &str,
    ctx: &EvalContext,
) -> Result<serde_json::Value, EvaluationError> {
    let call = || {
        catch_unwind(AssertUnwindSafe(|| evaluator(code, ctx))).unwrap_or_else(|payload| {
            Err(EvaluationError::with_name(
                "EvaluatorPanic",
                panic_message(payload.as_ref()),
            ))
        })
    };

    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(call)
        }
        _ => call(),
    }
}

async fn evaluate_code(shared: Arc<Shared>, cell: Cell) -> EvaluationSummary {
    let ctx = EvalContext::new(cell.id);

    let result = match resolve_evaluator(&shared, &cell) {
        Ok(evaluator) => {
            shared.side_effects.reset(cell.id);
            shared.update_cell(cell.id, CellUpdate::new().side_effect(false));
            shared.set_running_cell(Some(cell.id));
            run_evaluator(&evaluator, &cell.content, &ctx)
        }
        Err(err) => Err(err),
    };

    let (status, value) = match result {
        Ok(value) => (EvalStatus::Success, CellValue::Json(value)),
        Err(err) => {
            tracing::debug!(cell = %cell.id, error = %err, "code cell failed");
            (EvalStatus::Error, CellValue::Error(err))
        }
    };

    shared.update_cell(
        cell.id,
        CellUpdate::new()
            .rendered(true)
            .status(status)
            .value(value.clone())
            .side_effect(ctx.has_side_effect()),
    );
    shared.append_history(NewHistoryEntry::value(cell.id, cell.content.clone(), value));

    ctx.gate().await_external_completion().await;
    shared.set_running_cell(None);

    summary(&cell, status)
}

fn evaluate_markdown(shared: &Shared, cell: &Cell) -> EvaluationSummary {
    shared.update_cell(
        cell.id,
        CellUpdate::new()
            .value(CellValue::Html(render_markdown(&cell.content)))
            .rendered(true)
            .status(EvalStatus::Success),
    );
    summary(cell, EvalStatus::Success)
}

fn evaluate_css(shared: &Shared, cell: &Cell) -> EvaluationSummary {
    shared.update_cell(
        cell.id,
        CellUpdate::new()
            .value(CellValue::text(cell.content.clone()))
            .rendered(true)
            .status(EvalStatus::Success),
    );
    shared.append_history(NewHistoryEntry::info(
        cell.id,
        cell.content.clone(),
        CellValue::text(STYLES_UPDATED),
    ));
    summary(cell, EvalStatus::Success)
}

async fn evaluate_dependencies(shared: Arc<Shared>, cell: Cell) -> EvaluationSummary {
    let sources = parse_dependency_list(&cell.content);

    let (added, loaded) = {
        let mut manager = shared.dependencies.lock().await;
        let mut added = Vec::new();
        for src in &sources {
            let outcome = manager.load(src).await;
            if outcome.newly_loaded {
                added.push(outcome.record);
            }
        }
        (added, manager.records().to_vec())
    };

    let status = if added
        .iter()
        .any(|record| record.status == DependencyStatus::Error)
    {
        EvalStatus::Error
    } else {
        EvalStatus::Success
    };

    let mut summary_lines = vec![DEPENDENCIES_HEADER.to_string()];
    summary_lines.extend(added.iter().map(|record| format!("// {}", record.src)));

    shared.update_cell(
        cell.id,
        CellUpdate::new()
            .value(CellValue::Dependencies(loaded.clone()))
            .rendered(true)
            .status(status),
    );
    shared.append_history(NewHistoryEntry::external_resource(
        cell.id,
        summary_lines.join("\n"),
        CellValue::Dependencies(loaded),
    ));

    summary(&cell, status)
}

fn reject_plugin(shared: &Shared, cell: &Cell, plugin_type: Option<&str>) -> EvaluationSummary {
    let message = match plugin_type {
        Some(plugin_type) => format!("no loader for plugin type \"{plugin_type}\""),
        None => MISSING_PLUGIN_TYPE.to_string(),
    };
    tracing::warn!(cell = %cell.id, ?plugin_type, "unsupported plugin type");

    shared.update_cell(
        cell.id,
        CellUpdate::new().rendered(true).status(EvalStatus::Error),
    );
    shared.append_history(NewHistoryEntry::info(
        cell.id,
        cell.content.clone(),
        CellValue::text(message.clone()),
    ));
    shared.post_app_message(AppMessage::new(message));

    summary(cell, EvalStatus::Error)
}
