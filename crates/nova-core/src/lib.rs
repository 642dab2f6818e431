//! Core engine for Nova notebooks.
//!
//! This crate provides:
//! - Cell model with partial-merge property updates
//! - Append-only evaluation history with in-place value amendment
//! - Runtime-extensible language registry and host environment
//! - Deduplicated external dependency loading
//! - FIFO evaluation queue with explicit continuation gates
//! - Language plugin loading over HTTP

pub mod cell;
pub mod config;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod host;
pub mod language;
pub mod markdown;
pub mod plugin;

pub use cell::{Cell, CellId, CellType, CellUpdate, CellValue, EvalStatus};
pub use config::EngineConfig;
pub use dependency::{
    DependencyLoader, DependencyManager, DependencyRecord, DependencyStatus, HttpDependencyLoader,
};
pub use engine::{CellTarget, Engine, EngineBuilder, EvaluationQueue, EvaluationSummary, PendingEvaluation};
pub use error::{Error, EvaluationError, Result};
pub use events::{AppMessage, EngineEvent};
pub use history::{HistoryEntry, HistoryId, HistoryLog, HistoryType, NewHistoryEntry};
pub use host::{
    Continuation, ContinuationGate, EditorPort, Environment, EvalContext, Evaluator,
    NullEditorPort, NullSideEffectTarget, SideEffectTarget,
};
pub use language::{LanguageDefinition, LanguageRegistry};
pub use plugin::{
    DylibInstaller, HttpTransport, InstallError, PluginInstaller, PluginKind, PluginPhase,
    PluginSpec, PluginSpecError, PluginTransport, TransferError, TransferEvent,
};
