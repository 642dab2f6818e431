//! Notebook evaluation engine.
//!
//! # Architecture
//!
//! ```text
//! Engine::evaluate_cell(target)
//!     │
//!     └── dispatch (one strategy per cell type)
//!             │
//!             ├── markdown, css ─────────────── run inline, ready handle
//!             ├── external-dependencies ─────── own task, bypasses queue
//!             └── code, plugin ──────────────── EvaluationQueue (FIFO)
//!                     │
//!                     ├── code: evaluator call → continuation gate
//!                     └── plugin: transport → installer → registry
//! ```
//!
//! Every strategy reports through the same protocol: partial cell updates,
//! history appends/amendments, and the matching [`EngineEvent`]s.
//!
//! Session state sits behind a `std::sync::Mutex` that is never held across
//! an `.await`; the dependency manager has its own async mutex so that
//! concurrent dependency cells still load each resource once.

mod dispatch;
mod queue;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use crate::cell::{Cell, CellId, CellUpdate, CellValue};
use crate::config::EngineConfig;
use crate::dependency::{
    DependencyLoader, DependencyManager, DependencyRecord, HttpDependencyLoader,
};
use crate::error::{Error, Result};
use crate::events::{AppMessage, EngineEvent};
use crate::history::{HistoryEntry, HistoryId, HistoryLog, NewHistoryEntry};
use crate::host::{EditorPort, Environment, NullEditorPort, NullSideEffectTarget, SideEffectTarget};
use crate::language::{LanguageDefinition, LanguageRegistry};
use crate::plugin::{DylibInstaller, HttpTransport, PluginInstaller, PluginTransport};

pub use queue::{EvaluationQueue, EvaluationSummary, PendingEvaluation};

/// Which cell to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellTarget {
    /// The currently selected cell.
    Selected,
    Id(CellId),
}

impl From<CellId> for CellTarget {
    fn from(id: CellId) -> Self {
        Self::Id(id)
    }
}

impl From<Option<CellId>> for CellTarget {
    fn from(id: Option<CellId>) -> Self {
        id.map_or(Self::Selected, Self::Id)
    }
}

/// Mutable session state.
#[derive(Debug, Default)]
pub(crate) struct NotebookState {
    cells: Vec<Cell>,
    selected: Option<CellId>,
    history: HistoryLog,
    languages: LanguageRegistry,
    app_messages: Vec<AppMessage>,
    execution_number: u64,
    running_cell: Option<CellId>,
}

impl NotebookState {
    fn cell_mut(&mut self, cell_id: CellId) -> Option<&mut Cell> {
        self.cells.iter_mut().find(|cell| cell.id == cell_id)
    }

    fn cell(&self, cell_id: CellId) -> Option<&Cell> {
        self.cells.iter().find(|cell| cell.id == cell_id)
    }
}

/// State and collaborators shared by the engine handle and its tasks.
pub(crate) struct Shared {
    state: Mutex<NotebookState>,
    pub(crate) dependencies: tokio::sync::Mutex<DependencyManager>,
    pub(crate) environment: Arc<Environment>,
    pub(crate) queue: EvaluationQueue,
    events: broadcast::Sender<EngineEvent>,
    pub(crate) side_effects: Arc<dyn SideEffectTarget>,
    pub(crate) editor: Arc<dyn EditorPort>,
    pub(crate) transport: Arc<dyn PluginTransport>,
    pub(crate) installer: Arc<dyn PluginInstaller>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, NotebookState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Merge `update` into a cell and broadcast it.
    pub(crate) fn update_cell(&self, cell_id: CellId, update: CellUpdate) {
        if update.is_empty() {
            return;
        }
        {
            let mut state = self.lock();
            let Some(cell) = state.cell_mut(cell_id) else {
                tracing::warn!(cell = %cell_id, "update for a cell that no longer exists");
                return;
            };
            cell.apply(&update);
        }
        self.emit(EngineEvent::CellUpdated { cell_id, update });
    }

    pub(crate) fn append_history(&self, entry: NewHistoryEntry) -> HistoryId {
        let entry = self.lock().history.append(entry).clone();
        let history_id = entry.history_id;
        self.emit(EngineEvent::HistoryAppended { entry });
        history_id
    }

    /// Replace the value of a history entry. Unknown ids indicate an engine
    /// bug and are logged, not surfaced.
    pub(crate) fn amend_history(&self, history_id: HistoryId, value: CellValue) {
        let amended = self.lock().history.amend(history_id, value.clone());
        if amended {
            self.emit(EngineEvent::HistoryAmended { history_id, value });
        } else {
            tracing::warn!(%history_id, "amend for unknown history entry");
        }
    }

    pub(crate) fn language(&self, language_id: &str) -> Option<LanguageDefinition> {
        self.lock().languages.get(language_id).cloned()
    }

    pub(crate) fn add_language(&self, definition: LanguageDefinition) {
        self.lock().languages.register(definition.clone());
        self.emit(EngineEvent::LanguageAdded { definition });
    }

    pub(crate) fn post_app_message(&self, message: AppMessage) {
        self.lock().app_messages.push(message.clone());
        self.emit(EngineEvent::AppMessage { message });
    }

    pub(crate) fn set_running_cell(&self, cell_id: Option<CellId>) {
        self.lock().running_cell = cell_id;
    }
}

/// Builder for [`Engine`] with replaceable collaborators.
pub struct EngineBuilder {
    config: EngineConfig,
    environment: Option<Arc<Environment>>,
    side_effects: Option<Arc<dyn SideEffectTarget>>,
    editor: Option<Arc<dyn EditorPort>>,
    transport: Option<Arc<dyn PluginTransport>>,
    installer: Option<Arc<dyn PluginInstaller>>,
    dependency_loader: Option<Arc<dyn DependencyLoader>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            environment: None,
            side_effects: None,
            editor: None,
            transport: None,
            installer: None,
            dependency_loader: None,
        }
    }

    /// Host environment. Defaults to one with the built-in languages.
    pub fn environment(mut self, environment: Arc<Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn side_effect_target(mut self, target: Arc<dyn SideEffectTarget>) -> Self {
        self.side_effects = Some(target);
        self
    }

    pub fn editor(mut self, editor: Arc<dyn EditorPort>) -> Self {
        self.editor = Some(editor);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn PluginTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn installer(mut self, installer: Arc<dyn PluginInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn dependency_loader(mut self, loader: Arc<dyn DependencyLoader>) -> Self {
        self.dependency_loader = Some(loader);
        self
    }

    /// Build the engine and start its queue worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        let environment = self
            .environment
            .unwrap_or_else(|| Arc::new(Environment::with_builtins()));

        let transport: Arc<dyn PluginTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config.user_agent)?),
        };
        let dependency_loader: Arc<dyn DependencyLoader> = match self.dependency_loader {
            Some(loader) => loader,
            None => Arc::new(HttpDependencyLoader::new(
                environment.clone(),
                &config.user_agent,
            )?),
        };
        let installer = self
            .installer
            .unwrap_or_else(|| Arc::new(DylibInstaller::new(config.plugin_dir.clone())));

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let state = NotebookState {
            languages: LanguageRegistry::with_builtins(),
            ..NotebookState::default()
        };

        let shared = Shared {
            state: Mutex::new(state),
            dependencies: tokio::sync::Mutex::new(DependencyManager::new(dependency_loader)),
            environment,
            queue: EvaluationQueue::new(),
            events,
            side_effects: self
                .side_effects
                .unwrap_or_else(|| Arc::new(NullSideEffectTarget)),
            editor: self.editor.unwrap_or_else(|| Arc::new(NullEditorPort)),
            transport,
            installer,
        };

        Ok(Engine {
            shared: Arc::new(shared),
        })
    }
}

/// Handle to a notebook evaluation session. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Create an engine with the default HTTP transport, shared-library
    /// installer and HTTP dependency loader.
    pub fn new(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Subscribe to state-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    pub fn environment(&self) -> Arc<Environment> {
        self.shared.environment.clone()
    }

    /// Replace the cell collection with a freshly parsed document.
    pub fn load_cells(&self, cells: Vec<Cell>) -> Result<()> {
        let mut seen = std::collections::HashSet::with_capacity(cells.len());
        if let Some(duplicate) = cells.iter().find(|cell| !seen.insert(cell.id)) {
            return Err(Error::DuplicateCell(duplicate.id));
        }

        let mut state = self.shared.lock();
        state.cells = cells;
        if state
            .selected
            .is_some_and(|selected| state.cell(selected).is_none())
        {
            state.selected = None;
        }
        Ok(())
    }

    /// Append a single cell.
    pub fn insert_cell(&self, cell: Cell) -> Result<()> {
        let mut state = self.shared.lock();
        if state.cell(cell.id).is_some() {
            return Err(Error::DuplicateCell(cell.id));
        }
        state.cells.push(cell);
        Ok(())
    }

    pub fn select_cell(&self, cell_id: CellId) -> Result<()> {
        let mut state = self.shared.lock();
        if state.cell(cell_id).is_none() {
            return Err(Error::CellNotFound(cell_id));
        }
        state.selected = Some(cell_id);
        Ok(())
    }

    pub fn selected_cell(&self) -> Option<CellId> {
        self.shared.lock().selected
    }

    pub fn cell(&self, cell_id: CellId) -> Option<Cell> {
        self.shared.lock().cell(cell_id).cloned()
    }

    /// All cells in document order.
    pub fn cells(&self) -> Vec<Cell> {
        self.shared.lock().cells.clone()
    }

    /// History in append order.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.shared.lock().history.entries().to_vec()
    }

    pub fn history_entry(&self, history_id: HistoryId) -> Option<HistoryEntry> {
        self.shared.lock().history.get(history_id).cloned()
    }

    /// Registered languages, sorted by id.
    pub fn languages(&self) -> Vec<LanguageDefinition> {
        self.shared
            .lock()
            .languages
            .definitions()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn language(&self, language_id: &str) -> Option<LanguageDefinition> {
        self.shared.language(language_id)
    }

    /// Loaded external dependencies, in load order.
    pub async fn dependencies(&self) -> Vec<DependencyRecord> {
        self.shared.dependencies.lock().await.records().to_vec()
    }

    pub fn app_messages(&self) -> Vec<AppMessage> {
        self.shared.lock().app_messages.clone()
    }

    pub fn post_app_message(&self, message: AppMessage) {
        self.shared.post_app_message(message);
    }

    /// Number of evaluation requests made so far.
    pub fn execution_number(&self) -> u64 {
        self.shared.lock().execution_number
    }

    /// Code cell currently waiting on its evaluator or continuation gate.
    pub fn running_cell(&self) -> Option<CellId> {
        self.shared.lock().running_cell
    }

    /// Request evaluation of a cell.
    ///
    /// Code and plugin cells are queued behind earlier code and plugin
    /// evaluations; other cell types start immediately. The returned handle
    /// resolves when the evaluation settles, whatever status the cell ends
    /// up with.
    pub fn evaluate_cell(&self, target: impl Into<CellTarget>) -> Result<PendingEvaluation> {
        let cell = {
            let mut state = self.shared.lock();
            let cell_id = match target.into() {
                CellTarget::Id(id) => id,
                CellTarget::Selected => state.selected.ok_or(Error::NoCellSelected)?,
            };
            let cell = state
                .cell(cell_id)
                .cloned()
                .ok_or(Error::CellNotFound(cell_id))?;
            state.execution_number += 1;
            cell
        };

        Ok(dispatch::dispatch(&self.shared, cell))
    }

    /// Evaluate every cell in document order and wait for all of them.
    pub async fn evaluate_all(&self) -> Result<Vec<EvaluationSummary>> {
        let ids: Vec<CellId> = self.shared.lock().cells.iter().map(|cell| cell.id).collect();

        let mut pending = Vec::with_capacity(ids.len());
        for id in ids {
            pending.push(self.evaluate_cell(id)?);
        }

        let mut summaries = Vec::with_capacity(pending.len());
        for evaluation in pending {
            summaries.push(evaluation.await?);
        }
        Ok(summaries)
    }

    /// Clear the session for a new notebook.
    ///
    /// Cells, history entries, dependencies, app messages and selection are
    /// dropped. Installed languages stay available and history ids keep
    /// increasing.
    pub async fn new_notebook(&self) {
        self.shared.dependencies.lock().await.clear();
        {
            let mut state = self.shared.lock();
            state.cells.clear();
            state.selected = None;
            state.history.clear();
            state.app_messages.clear();
            state.running_cell = None;
        }
        self.shared.emit(EngineEvent::NotebookReset);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Engine")
            .field("cells", &state.cells.len())
            .field("history", &state.history.len())
            .field("languages", &state.languages.len())
            .finish_non_exhaustive()
    }
}
