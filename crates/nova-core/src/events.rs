//! State-change events broadcast by the engine.
//!
//! Views and persistence layers subscribe via
//! [`Engine::subscribe`](crate::Engine::subscribe) and rebuild their picture
//! of the notebook from these events.

use serde::{Deserialize, Serialize};

use crate::cell::{CellId, CellUpdate, CellValue};
use crate::history::{HistoryEntry, HistoryId, now_millis};
use crate::language::LanguageDefinition;

/// Events emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Cell properties were merged.
    CellUpdated {
        cell_id: CellId,
        /// Only the fields that changed.
        update: CellUpdate,
    },

    /// A history entry was appended.
    HistoryAppended { entry: HistoryEntry },

    /// The value of an existing history entry was replaced.
    HistoryAmended {
        history_id: HistoryId,
        value: CellValue,
    },

    /// A language became available.
    LanguageAdded { definition: LanguageDefinition },

    /// User-facing diagnostic not tied to a cell.
    AppMessage { message: AppMessage },

    /// The session was cleared for a new notebook.
    NotebookReset,
}

/// User-facing diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMessage {
    pub message: String,
    pub details: String,
    /// Milliseconds since the Unix epoch.
    pub when: u64,
}

impl AppMessage {
    /// Message stamped with the current time; details repeat the message.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            details: message.clone(),
            message,
            when: now_millis(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn at(mut self, when: u64) -> Self {
        self.when = when;
        self
    }
}
