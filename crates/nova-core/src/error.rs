//! Error types for nova-core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cell::CellId;

/// Result type for nova-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in nova-core.
///
/// These are engine-level failures. A cell whose evaluation fails is a normal
/// outcome and is reported through [`EvaluationError`] on the cell instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Cell not found.
    #[error("cell not found: {0}")]
    CellNotFound(CellId),

    /// Evaluation requested for the selected cell, but nothing is selected.
    #[error("no cell is selected")]
    NoCellSelected,

    /// Two cells share an id.
    #[error("duplicate cell id: {0}")]
    DuplicateCell(CellId),

    /// The task evaluating a cell ended without reporting a result.
    #[error("evaluation of {0} ended without reporting a result")]
    EvaluationDropped(CellId),

    /// HTTP client construction error.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Render the error together with a recovery hint, when one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Self::CellNotFound(_) => Some("check the cell id against the loaded document"),
            Self::NoCellSelected => Some("select a cell first or pass an explicit cell id"),
            Self::DuplicateCell(_) => Some("every cell in a document needs a unique id"),
            Self::EvaluationDropped(_) => Some("run with --verbose to see the task failure"),
            Self::Http(_) => Some("check the TLS setup and proxy environment variables"),
            Self::Io(_) | Self::Json(_) => None,
        };

        match hint {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}

/// Error raised by an evaluator while running a code cell.
///
/// Captured as the cell's value; it never propagates out of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{name}: {message}")]
pub struct EvaluationError {
    /// Error class, e.g. `Error` or `LanguageError`.
    pub name: String,
    /// Human-readable message.
    pub message: String,
}

impl EvaluationError {
    /// Create a generic evaluation error.
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_name("Error", message)
    }

    /// Create an evaluation error with an explicit class name.
    pub fn with_name(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}
