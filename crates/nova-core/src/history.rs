//! Append-only evaluation history.
//!
//! Entries are never removed or reordered. The only permitted mutation is
//! replacing the `value` of an existing entry, which long-running evaluations
//! (plugin downloads) use to report progress in place.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cell::{CellId, CellValue};

/// Identifier of a history entry. Strictly increasing within one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryId(u64);

impl HistoryId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of evaluation event recorded in the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryType {
    /// Output of a code evaluation.
    CellEvalValue,
    /// Informational message (styles, plugins).
    CellEvalInfo,
    /// External dependency load.
    CellEvalExternalResource,
}

/// A recorded evaluation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub history_id: HistoryId,
    pub cell_id: CellId,
    /// Snapshot of the cell content at evaluation time.
    pub content: String,
    pub value: CellValue,
    pub history_type: HistoryType,
    /// Milliseconds since the Unix epoch at append time.
    pub last_ran: u64,
}

/// Entry data supplied by the caller; the log assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub cell_id: CellId,
    pub content: String,
    pub value: CellValue,
    pub history_type: HistoryType,
}

impl NewHistoryEntry {
    pub fn value(cell_id: CellId, content: impl Into<String>, value: CellValue) -> Self {
        Self::new(cell_id, content, value, HistoryType::CellEvalValue)
    }

    pub fn info(cell_id: CellId, content: impl Into<String>, value: CellValue) -> Self {
        Self::new(cell_id, content, value, HistoryType::CellEvalInfo)
    }

    pub fn external_resource(cell_id: CellId, content: impl Into<String>, value: CellValue) -> Self {
        Self::new(cell_id, content, value, HistoryType::CellEvalExternalResource)
    }

    fn new(
        cell_id: CellId,
        content: impl Into<String>,
        value: CellValue,
        history_type: HistoryType,
    ) -> Self {
        Self {
            cell_id,
            content: content.into(),
            value,
            history_type,
        }
    }
}

/// Ordered evaluation history owned by one engine.
#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    /// Last id handed out. Never reset, so ids stay unique for the lifetime
    /// of the log even across `clear`.
    last_id: u64,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return it with its freshly allocated id.
    pub fn append(&mut self, entry: NewHistoryEntry) -> &HistoryEntry {
        self.last_id += 1;
        let index = self.entries.len();
        self.entries.push(HistoryEntry {
            history_id: HistoryId(self.last_id),
            cell_id: entry.cell_id,
            content: entry.content,
            value: entry.value,
            history_type: entry.history_type,
            last_ran: now_millis(),
        });
        &self.entries[index]
    }

    /// Replace the value of an existing entry.
    ///
    /// Returns `false` if no entry has this id. Position, cell, content and
    /// type of the entry never change.
    pub fn amend(&mut self, history_id: HistoryId, value: CellValue) -> bool {
        match self.position(history_id) {
            Some(index) => {
                self.entries[index].value = value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, history_id: HistoryId) -> Option<&HistoryEntry> {
        self.position(history_id).map(|index| &self.entries[index])
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries (new notebook). The id counter keeps running.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn position(&self, history_id: HistoryId) -> Option<usize> {
        // Ids are appended in increasing order.
        self.entries
            .binary_search_by_key(&history_id, |entry| entry.history_id)
            .ok()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
