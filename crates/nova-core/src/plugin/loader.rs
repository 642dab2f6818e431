//! Language plugin loading state machine.

use std::sync::Arc;

use super::{
    PluginPhase, PluginSpec, PluginSpecError, TransferError, TransferEvent, downloaded_message,
    failed_message, progress_message, ready_message,
};
use crate::cell::{Cell, CellId, CellUpdate, CellValue, EvalStatus};
use crate::engine::{EvaluationSummary, Shared};
use crate::history::{HistoryId, NewHistoryEntry};
use crate::language::LanguageDefinition;

/// One plugin-cell evaluation. Every report after the first amends the
/// history entry appended while parsing.
struct PluginRun {
    shared: Arc<Shared>,
    cell_id: CellId,
    history_id: HistoryId,
    phase: PluginPhase,
}

impl PluginRun {
    fn enter(&mut self, phase: PluginPhase) {
        tracing::debug!(cell = %self.cell_id, from = ?self.phase, to = ?phase, "plugin phase");
        self.phase = phase;
    }

    fn report(&mut self, phase: PluginPhase, status: Option<EvalStatus>, message: String) {
        self.enter(phase);
        let mut update = CellUpdate::new().rendered(true);
        if let Some(status) = status {
            update = update.status(status);
        }
        self.shared.update_cell(self.cell_id, update);
        self.shared
            .amend_history(self.history_id, CellValue::text(message));
    }

    fn fail(&mut self, phase: PluginPhase, message: String) -> EvalStatus {
        tracing::warn!(cell = %self.cell_id, %message, "plugin failed");
        self.report(phase, Some(EvalStatus::Error), message);
        EvalStatus::Error
    }

    /// Wait for the transfer to finish, reporting progress on the way.
    async fn download(&mut self, url: &str) -> Result<Vec<u8>, TransferError> {
        self.enter(PluginPhase::Fetching);
        let mut events = self.shared.transport.fetch(url);

        while let Some(event) = events.recv().await {
            match event {
                TransferEvent::Progress { loaded, total } => self.report(
                    PluginPhase::Downloading { loaded, total },
                    Some(EvalStatus::AsyncPending),
                    progress_message(loaded, total),
                ),
                TransferEvent::Loaded(payload) => return Ok(payload),
                TransferEvent::Failed(err) => return Err(err),
            }
        }
        Err(TransferError::Incomplete)
    }

    async fn load(&mut self, definition: LanguageDefinition) -> EvalStatus {
        let url = definition.url.clone().unwrap_or_default();
        let payload = match self.download(&url).await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(cell = %self.cell_id, %url, error = %err, "plugin transfer failed");
                return self.fail(PluginPhase::Failed, failed_message(&definition.display_name));
            }
        };

        self.report(
            PluginPhase::Downloaded,
            None,
            downloaded_message(&definition.display_name),
        );

        self.enter(PluginPhase::Installing);
        let installed = self
            .shared
            .installer
            .install(payload, &definition, &self.shared.environment)
            .await;

        match installed {
            Ok(installed) => {
                tracing::info!(language = %installed.language_id, "language plugin installed");
                self.shared.add_language(installed.clone());
                self.shared.editor.post_language_definition(&installed);
                self.report(
                    PluginPhase::Ready,
                    Some(EvalStatus::Success),
                    ready_message(&installed.display_name),
                );
                EvalStatus::Success
            }
            Err(err) => self.fail(
                PluginPhase::Failed,
                format!("{}: {err}", failed_message(&definition.display_name)),
            ),
        }
    }
}

/// Evaluate a language plugin cell.
pub(crate) async fn evaluate_language_plugin(shared: Arc<Shared>, cell: Cell) -> EvaluationSummary {
    let parsed = PluginSpec::parse(&cell.content);
    let initial = match &parsed {
        Ok(_) => CellValue::Empty,
        Err(err) => CellValue::text(err.to_string()),
    };
    let history_id =
        shared.append_history(NewHistoryEntry::info(cell.id, cell.content.clone(), initial));

    let mut run = PluginRun {
        shared,
        cell_id: cell.id,
        history_id,
        phase: PluginPhase::Parsing,
    };

    let status = match parsed.and_then(|spec| spec.language_definition()) {
        Ok(definition) => run.load(definition).await,
        Err(err) => {
            let phase = if err == PluginSpecError::MissingField("url") {
                PluginPhase::MissingUrl
            } else {
                PluginPhase::Failed
            };
            run.fail(phase, err.to_string())
        }
    };

    EvaluationSummary {
        cell_id: cell.id,
        cell_type: cell.cell_type,
        status,
    }
}
