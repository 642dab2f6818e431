//! Notebook cells and their evaluation state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dependency::DependencyRecord;
use crate::error::EvaluationError;

/// Unique identifier for a cell within a notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub(crate) u64);

impl CellId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell_{}", self.0)
    }
}

/// Type of cell in the notebook. Fixed for the lifetime of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CellType {
    /// Source evaluated by a registered language.
    Code,
    /// Markdown rendered to HTML.
    Markdown,
    /// Page styles.
    Css,
    /// Newline-separated list of external resources.
    #[serde(alias = "external dependencies")]
    ExternalDependencies,
    /// JSON plugin declaration.
    Plugin,
}

impl CellType {
    /// Wire name of the cell type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Markdown => "markdown",
            Self::Css => "css",
            Self::ExternalDependencies => "external-dependencies",
            Self::Plugin => "plugin",
        }
    }

    /// Whether evaluations of this type go through the evaluation queue.
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Code | Self::Plugin)
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the latest evaluation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvalStatus {
    Success,
    Error,
    /// Waiting on asynchronous work, e.g. a plugin download.
    AsyncPending,
}

/// Output of a cell (or of a history entry).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CellValue {
    #[default]
    Empty,
    /// Value produced by an evaluator.
    Json(serde_json::Value),
    /// Plain text, e.g. raw styles or a status message.
    Text(String),
    /// Rendered HTML.
    Html(String),
    /// Error raised by an evaluator.
    Error(EvaluationError),
    /// Currently loaded external dependencies.
    Dependencies(Vec<DependencyRecord>),
}

impl CellValue {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Borrow the text of a `Text` or `Html` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) | Self::Html(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Json(value) => write!(f, "{value}"),
            Self::Text(text) | Self::Html(text) => f.write_str(text),
            Self::Error(err) => write!(f, "{err}"),
            Self::Dependencies(records) => {
                let mut first = true;
                for record in records {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{} ({})", record.src, record.status)?;
                }
                Ok(())
            }
        }
    }
}

/// A single notebook cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub id: CellId,
    pub cell_type: CellType,
    /// Source text as authored.
    #[serde(default)]
    pub content: String,
    /// Language registry key (code cells only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// True once an evaluation attempt has completed.
    #[serde(default)]
    pub rendered: bool,
    /// `None` until the first evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_status: Option<EvalStatus>,
    #[serde(default)]
    pub value: CellValue,
    /// Whether the last code run wrote to the cell's side-effect target.
    #[serde(default)]
    pub has_side_effect: bool,
}

impl Cell {
    /// Create an unevaluated cell.
    pub fn new(id: CellId, cell_type: CellType, content: impl Into<String>) -> Self {
        Self {
            id,
            cell_type,
            content: content.into(),
            language: None,
            rendered: false,
            eval_status: None,
            value: CellValue::Empty,
            has_side_effect: false,
        }
    }

    /// Create an unevaluated code cell in the given language.
    pub fn code(id: CellId, language: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, CellType::Code, content).with_language(language)
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Merge a partial update into the cell. Fields the update leaves unset
    /// are untouched.
    pub fn apply(&mut self, update: &CellUpdate) {
        if let Some(rendered) = update.rendered {
            self.rendered = rendered;
        }
        if let Some(status) = update.eval_status {
            self.eval_status = Some(status);
        }
        if let Some(value) = &update.value {
            self.value = value.clone();
        }
        if let Some(has_side_effect) = update.has_side_effect {
            self.has_side_effect = has_side_effect;
        }
    }
}

/// Partial set of cell properties.
///
/// `content`, `language` and `cell_type` are deliberately absent: evaluation
/// never rewrites what the author wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_status: Option<EvalStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<CellValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_side_effect: Option<bool>,
}

impl CellUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(mut self, rendered: bool) -> Self {
        self.rendered = Some(rendered);
        self
    }

    pub fn status(mut self, status: EvalStatus) -> Self {
        self.eval_status = Some(status);
        self
    }

    pub fn value(mut self, value: CellValue) -> Self {
        self.value = Some(value);
        self
    }

    pub fn side_effect(mut self, has_side_effect: bool) -> Self {
        self.has_side_effect = Some(has_side_effect);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.is_none()
            && self.eval_status.is_none()
            && self.value.is_none()
            && self.has_side_effect.is_none()
    }
}
