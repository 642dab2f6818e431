//! Host execution environment for code cells.
//!
//! The [`Environment`] is the namespace table that evaluators live in:
//! built-in languages register themselves at startup, and language plugins
//! install new evaluators at runtime. It also holds the bodies of loaded
//! external dependencies so evaluators can read them.
//!
//! This module also defines the collaborator seams the engine calls out to
//! (side-effect targets, the editor) and the continuation gate that lets an
//! evaluator hold its queue slot until outside work finishes.

pub mod builtin;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use crate::cell::CellId;
use crate::error::EvaluationError;
use crate::language::LanguageDefinition;

/// Callable that evaluates a source string.
///
/// Evaluators are synchronous. The engine calls them from a queued tokio
/// task, moving off the worker thread with `block_in_place` on a
/// multi-threaded runtime; on a current-thread runtime a slow evaluator
/// stalls every other task until it returns.
pub type Evaluator =
    Arc<dyn Fn(&str, &EvalContext) -> Result<serde_json::Value, EvaluationError> + Send + Sync>;

type Namespace = FxHashMap<String, Evaluator>;

/// Namespaces of evaluators plus loaded resources.
#[derive(Default)]
pub struct Environment {
    namespaces: RwLock<FxHashMap<String, Namespace>>,
    resources: RwLock<FxHashMap<String, Arc<[u8]>>>,
}

impl Environment {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an environment with the built-in languages installed.
    pub fn with_builtins() -> Self {
        let env = Self::new();
        builtin::install(&env);
        env
    }

    /// Install `evaluator` as `module.name`, replacing any previous callable.
    pub fn install_evaluator(&self, module: &str, name: &str, evaluator: Evaluator) {
        let mut namespaces = self
            .namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        namespaces
            .entry(module.to_string())
            .or_default()
            .insert(name.to_string(), evaluator);
    }

    /// Look up `module.name`.
    pub fn evaluator(&self, module: &str, name: &str) -> Option<Evaluator> {
        let namespaces = self
            .namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        namespaces.get(module)?.get(name).cloned()
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(module)
    }

    /// Store the body of a loaded external resource.
    pub fn store_resource(&self, src: &str, body: Vec<u8>) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(src.to_string(), body.into());
    }

    pub fn resource(&self, src: &str) -> Option<Arc<[u8]>> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(src)
            .cloned()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let namespaces = self
            .namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut modules: Vec<_> = namespaces.keys().collect();
        modules.sort();
        f.debug_struct("Environment")
            .field("modules", &modules)
            .finish_non_exhaustive()
    }
}

/// Context handed to an evaluator for one code-cell run.
pub struct EvalContext {
    cell_id: CellId,
    side_effect: AtomicBool,
    gate: ContinuationGate,
}

impl EvalContext {
    pub fn new(cell_id: CellId) -> Self {
        Self {
            cell_id,
            side_effect: AtomicBool::new(false),
            gate: ContinuationGate::new(),
        }
    }

    pub fn cell_id(&self) -> CellId {
        self.cell_id
    }

    /// Record that the evaluation wrote to the cell's side-effect target.
    pub fn mark_side_effect(&self) {
        self.side_effect.store(true, Ordering::Relaxed);
    }

    pub fn has_side_effect(&self) -> bool {
        self.side_effect.load(Ordering::Relaxed)
    }

    /// Hold the evaluation queue until the returned handle is resolved.
    ///
    /// Use this when the evaluator kicks off work that outlives the call
    /// and later cells must not start before it completes.
    pub fn defer(&self) -> Continuation {
        self.gate.defer()
    }

    pub fn gate(&self) -> &ContinuationGate {
        &self.gate
    }
}

/// Suspension point between a code evaluation and the next queued task.
#[derive(Debug, Default)]
pub struct ContinuationGate {
    pending: Mutex<Vec<oneshot::Receiver<()>>>,
}

impl ContinuationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a piece of outside work the gate must wait for.
    pub fn defer(&self) -> Continuation {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rx);
        Continuation { tx: Some(tx) }
    }

    /// Number of continuations not yet awaited.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait until every continuation handed out so far has been resolved or
    /// dropped, including ones deferred while waiting.
    pub async fn await_external_completion(&self) {
        loop {
            let batch = std::mem::take(
                &mut *self
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if batch.is_empty() {
                return;
            }
            for rx in batch {
                if rx.await.is_err() {
                    tracing::debug!("continuation dropped without being resolved");
                }
            }
        }
    }
}

/// Handle for outside work holding a continuation gate.
///
/// Dropping the handle releases the gate just like [`resolve`](Self::resolve).
#[derive(Debug)]
pub struct Continuation {
    tx: Option<oneshot::Sender<()>>,
}

impl Continuation {
    /// Signal that the outside work completed.
    pub fn resolve(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Output area associated with a cell, cleared before each code run.
pub trait SideEffectTarget: Send + Sync {
    fn reset(&self, cell_id: CellId);
}

/// Side-effect target for headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSideEffectTarget;

impl SideEffectTarget for NullSideEffectTarget {
    fn reset(&self, _cell_id: CellId) {}
}

/// Editor view that offers syntax support for installed languages.
pub trait EditorPort: Send + Sync {
    fn post_language_definition(&self, definition: &LanguageDefinition);
}

/// Editor port for headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEditorPort;

impl EditorPort for NullEditorPort {
    fn post_language_definition(&self, definition: &LanguageDefinition) {
        tracing::debug!(language = %definition.language_id, "no editor attached");
    }
}
