//! Language plugins.
//!
//! A plugin cell holds a JSON declaration such as
//!
//! ```json
//! {
//!   "pluginType": "language",
//!   "languageId": "lua",
//!   "displayName": "Lua",
//!   "url": "https://plugins.example/lua.so",
//!   "module": "lua",
//!   "evaluator": "run"
//! }
//! ```
//!
//! Evaluating it downloads the payload through a [`PluginTransport`],
//! installs it with a [`PluginInstaller`] and registers the language.
//!
//! # Lifecycle
//!
//! ```text
//! Parsing ──┬── MissingUrl ─────────────────────────────────┐
//!           └── Fetching ── Downloading(n) ── Downloaded    │
//!                                  │              │         │
//!                                  │         Installing     │
//!                                  │          │       │     │
//!                                  └──────> Failed  Ready   │
//!                                             ^─────────────┘
//! ```
//!
//! One history entry is appended while parsing; every later phase amends
//! that same entry.

mod installer;
pub(crate) mod loader;
mod transport;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::language::LanguageDefinition;

pub use installer::{DylibInstaller, InstallError, PluginInstaller};
pub use transport::{HttpTransport, PluginTransport, TransferError, TransferEvent};

/// Plugin kind handled by the loader.
const LANGUAGE_PLUGIN: &str = "language";

/// Problems with the plugin declaration itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginSpecError {
    #[error("plugin definition failed to parse:\n{0}")]
    Parse(String),

    #[error("plugin definition missing \"{0}\"")]
    MissingField(&'static str),
}

/// Declared plugin kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginKind {
    Language,
    /// No `pluginType` entry.
    Undeclared,
    Other(String),
}

/// Parsed content of a plugin cell. Every field is optional at parse time;
/// [`PluginSpec::language_definition`] validates the ones a language needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSpec {
    pub plugin_type: Option<String>,
    pub url: Option<String>,
    pub display_name: Option<String>,
    pub language_id: Option<String>,
    pub module: Option<String>,
    pub evaluator: Option<String>,
    pub keybinding: Option<String>,
    pub code_mirror_mode: Option<String>,
}

impl PluginSpec {
    pub fn parse(content: &str) -> Result<Self, PluginSpecError> {
        serde_json::from_str(content).map_err(|e| PluginSpecError::Parse(e.to_string()))
    }

    /// Declared kind. Only an explicit `"pluginType": "language"` is a
    /// language plugin.
    pub fn kind(&self) -> PluginKind {
        match self.plugin_type.as_deref() {
            Some(LANGUAGE_PLUGIN) => PluginKind::Language,
            Some(other) => PluginKind::Other(other.to_string()),
            None => PluginKind::Undeclared,
        }
    }

    /// Validate the declaration as a language plugin. `url` is checked first.
    pub fn language_definition(&self) -> Result<LanguageDefinition, PluginSpecError> {
        let url = required(&self.url, "url")?;
        let display_name = required(&self.display_name, "displayName")?;
        let language_id = required(&self.language_id, "languageId")?;
        let module = required(&self.module, "module")?;
        let evaluator = required(&self.evaluator, "evaluator")?;

        Ok(LanguageDefinition {
            language_id,
            display_name,
            url: Some(url),
            module,
            evaluator,
            keybinding: self.keybinding.clone(),
            code_mirror_mode: self.code_mirror_mode.clone(),
        })
    }
}

fn required(field: &Option<String>, name: &'static str) -> Result<String, PluginSpecError> {
    field
        .as_ref()
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .ok_or(PluginSpecError::MissingField(name))
}

/// Phase of one plugin-cell evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginPhase {
    Parsing,
    MissingUrl,
    Fetching,
    Downloading { loaded: u64, total: Option<u64> },
    Downloaded,
    Installing,
    Ready,
    Failed,
}

impl PluginPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MissingUrl | Self::Ready | Self::Failed)
    }
}

/// History message for a download progress notification.
pub fn progress_message(loaded: u64, total: Option<u64>) -> String {
    let mut message = format!("downloading plugin: {loaded} bytes loaded");
    if let Some(total) = total.filter(|total| *total > 0) {
        let percent = loaded as f64 / total as f64 * 100.0;
        message.push_str(&format!(" out of {total} ({percent:.0}%)"));
    }
    message
}

pub(crate) fn downloaded_message(display_name: &str) -> String {
    format!("{display_name} plugin downloaded, initializing")
}

pub(crate) fn ready_message(display_name: &str) -> String {
    format!("{display_name} plugin ready")
}

pub(crate) fn failed_message(display_name: &str) -> String {
    format!("{display_name} plugin failed to load")
}
