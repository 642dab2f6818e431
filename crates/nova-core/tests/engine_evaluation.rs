//! Integration tests for cell evaluation through the engine.
//!
//! Network and plugin installation are replaced with scripted fakes so the
//! tests exercise queueing, history and event behavior deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};

use nova_core::{
    Cell, CellId, CellTarget, CellType, CellValue, DependencyLoader, DependencyRecord,
    DependencyStatus, EditorPort, Engine, EngineConfig, EngineEvent, Environment, Error,
    EvalContext, EvalStatus, EvaluationError, HistoryType, InstallError, LanguageDefinition,
    PluginInstaller, PluginTransport, SideEffectTarget, TransferError, TransferEvent,
};

// =============================================================================
// Test Helpers
// =============================================================================

/// Transport that replays a fixed event script and counts fetches.
#[derive(Default)]
struct ScriptedTransport {
    script: Vec<TransferEvent>,
    fetches: AtomicUsize,
}

impl ScriptedTransport {
    fn new(script: Vec<TransferEvent>) -> Arc<Self> {
        Arc::new(Self {
            script,
            fetches: AtomicUsize::new(0),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl PluginTransport for ScriptedTransport {
    fn fetch(&self, _url: &str) -> mpsc::Receiver<TransferEvent> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.script.len().max(1));
        for event in &self.script {
            tx.try_send(event.clone()).expect("script fits in channel");
        }
        rx
    }
}

/// Installer that registers an evaluator echoing `<payload><code>`.
#[derive(Default)]
struct EchoInstaller {
    reject: Option<String>,
}

impl PluginInstaller for EchoInstaller {
    fn install<'a>(
        &'a self,
        payload: Vec<u8>,
        definition: &'a LanguageDefinition,
        environment: &'a Environment,
    ) -> BoxFuture<'a, Result<LanguageDefinition, InstallError>> {
        Box::pin(async move {
            if let Some(reason) = &self.reject {
                return Err(InstallError::Rejected(reason.clone()));
            }
            let prefix = String::from_utf8_lossy(&payload).into_owned();
            environment.install_evaluator(
                &definition.module,
                &definition.evaluator,
                Arc::new(
                    move |code: &str,
                          _ctx: &EvalContext|
                          -> Result<serde_json::Value, EvaluationError> {
                        Ok(json!(format!("{prefix}{code}")))
                    },
                ),
            );
            Ok(definition.clone())
        })
    }
}

/// Dependency loader that counts calls per source and fails sources
/// containing "bad".
#[derive(Default)]
struct CountingLoader {
    calls: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl CountingLoader {
    fn calls(&self, src: &str) -> usize {
        self.calls.lock().unwrap().get(src).copied().unwrap_or(0)
    }
}

impl DependencyLoader for CountingLoader {
    fn load<'a>(&'a self, src: &'a str) -> BoxFuture<'a, DependencyStatus> {
        Box::pin(async move {
            *self.calls.lock().unwrap().entry(src.to_string()).or_default() += 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if src.contains("bad") {
                DependencyStatus::Error
            } else {
                DependencyStatus::Ok
            }
        })
    }
}

#[derive(Default)]
struct RecordingEditor {
    posted: Mutex<Vec<String>>,
}

impl EditorPort for RecordingEditor {
    fn post_language_definition(&self, definition: &LanguageDefinition) {
        self.posted
            .lock()
            .unwrap()
            .push(definition.language_id.clone());
    }
}

#[derive(Default)]
struct RecordingSideEffects {
    resets: Mutex<Vec<CellId>>,
}

impl SideEffectTarget for RecordingSideEffects {
    fn reset(&self, cell_id: CellId) {
        self.resets.lock().unwrap().push(cell_id);
    }
}

/// Engine wired to fakes, plus handles to inspect them.
struct Harness {
    engine: Engine,
    transport: Arc<ScriptedTransport>,
    loader: Arc<CountingLoader>,
    editor: Arc<RecordingEditor>,
    side_effects: Arc<RecordingSideEffects>,
}

struct HarnessBuilder {
    script: Vec<TransferEvent>,
    installer: EchoInstaller,
    loader: CountingLoader,
    environment: Option<Arc<Environment>>,
}

impl HarnessBuilder {
    fn new() -> Self {
        Self {
            script: vec![TransferEvent::Loaded(b"lua> ".to_vec())],
            installer: EchoInstaller::default(),
            loader: CountingLoader::default(),
            environment: None,
        }
    }

    fn script(mut self, script: Vec<TransferEvent>) -> Self {
        self.script = script;
        self
    }

    fn reject_install(mut self, reason: &str) -> Self {
        self.installer.reject = Some(reason.to_string());
        self
    }

    fn loader_delay(mut self, delay: Duration) -> Self {
        self.loader.delay = Some(delay);
        self
    }

    fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(Arc::new(environment));
        self
    }

    fn build(self) -> Harness {
        let transport = ScriptedTransport::new(self.script);
        let loader = Arc::new(self.loader);
        let editor = Arc::new(RecordingEditor::default());
        let side_effects = Arc::new(RecordingSideEffects::default());

        let mut builder = Engine::builder(EngineConfig::default())
            .transport(transport.clone())
            .installer(Arc::new(self.installer))
            .dependency_loader(loader.clone())
            .editor(editor.clone())
            .side_effect_target(side_effects.clone());
        if let Some(environment) = self.environment {
            builder = builder.environment(environment);
        }

        Harness {
            engine: builder.build().expect("engine builds"),
            transport,
            loader,
            editor,
            side_effects,
        }
    }
}

fn harness() -> Harness {
    HarnessBuilder::new().build()
}

fn cell(id: u64, cell_type: CellType, content: &str) -> Cell {
    Cell::new(CellId::new(id), cell_type, content)
}

fn expr(id: u64, content: &str) -> Cell {
    Cell::code(CellId::new(id), "expr", content)
}

fn lua_plugin(id: u64) -> Cell {
    let content = json!({
        "pluginType": "language",
        "languageId": "lua",
        "displayName": "Lua",
        "url": "https://plugins.test/lua.so",
        "module": "lua",
        "evaluator": "run",
    });
    cell(id, CellType::Plugin, &content.to_string())
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn amended_values(events: &[EngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::HistoryAmended { value, .. } => Some(value.to_string()),
            _ => None,
        })
        .collect()
}

async fn evaluate(engine: &Engine, id: u64) -> EvalStatus {
    engine
        .evaluate_cell(CellId::new(id))
        .expect("cell exists")
        .await
        .expect("evaluation settles")
        .status
}

// =============================================================================
// Markdown, CSS
// =============================================================================

#[tokio::test]
async fn test_markdown_renders_heading_without_history() {
    let h = harness();
    h.engine
        .load_cells(vec![cell(1, CellType::Markdown, "# Hi")])
        .unwrap();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Success);

    let cell = h.engine.cell(CellId::new(1)).unwrap();
    assert!(cell.rendered);
    assert_eq!(cell.eval_status, Some(EvalStatus::Success));
    assert_eq!(cell.value, CellValue::Html("<h1>Hi</h1>\n".to_string()));
    assert!(h.engine.history().is_empty());
}

#[tokio::test]
async fn test_css_updates_styles_with_info_entry() {
    let h = harness();
    let styles = "body { color: red; }";
    h.engine
        .load_cells(vec![cell(1, CellType::Css, styles)])
        .unwrap();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Success);

    let cell = h.engine.cell(CellId::new(1)).unwrap();
    assert_eq!(cell.value, CellValue::text(styles));
    assert!(cell.rendered);

    let history = h.engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].history_type, HistoryType::CellEvalInfo);
    assert_eq!(history[0].content, styles);
    assert_eq!(history[0].value, CellValue::text("Page styles updated"));
}

// =============================================================================
// External dependencies
// =============================================================================

#[tokio::test]
async fn test_dependency_cell_loads_once() {
    let h = harness();
    h.engine
        .load_cells(vec![
            cell(1, CellType::ExternalDependencies, "https://a.js\n// note\n\n"),
            cell(2, CellType::ExternalDependencies, "https://a.js"),
        ])
        .unwrap();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Success);

    let expected = vec![DependencyRecord {
        src: "https://a.js".to_string(),
        status: DependencyStatus::Ok,
    }];
    assert_eq!(h.engine.dependencies().await, expected);

    let history = h.engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].history_type, HistoryType::CellEvalExternalResource);
    assert_eq!(
        history[0].content,
        "// added external dependencies:\n// https://a.js"
    );
    assert_eq!(history[0].value, CellValue::Dependencies(expected.clone()));

    // Same source again: no reload, no new records.
    assert_eq!(evaluate(&h.engine, 2).await, EvalStatus::Success);
    assert_eq!(h.loader.calls("https://a.js"), 1);
    assert_eq!(h.engine.dependencies().await, expected);

    let history = h.engine.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "// added external dependencies:");
}

#[tokio::test]
async fn test_repeated_source_in_one_cell_loads_once() {
    let h = harness();
    h.engine
        .load_cells(vec![cell(
            1,
            CellType::ExternalDependencies,
            "https://a.js\n// comment\nhttps://a.js",
        )])
        .unwrap();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Success);

    assert_eq!(h.loader.calls("https://a.js"), 1);
    assert_eq!(h.engine.dependencies().await.len(), 1);

    let history = h.engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].history_type, HistoryType::CellEvalExternalResource);
    assert_eq!(
        history[0].content,
        "// added external dependencies:\n// https://a.js"
    );
}

#[tokio::test]
async fn test_failed_dependency_marks_cell_error() {
    let h = harness();
    h.engine
        .load_cells(vec![cell(
            1,
            CellType::ExternalDependencies,
            "https://good.js\nhttps://bad.js",
        )])
        .unwrap();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Error);

    let records = h.engine.dependencies().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].status, DependencyStatus::Error);
}

#[tokio::test]
async fn test_concurrent_dependency_cells_share_loads() {
    let h = HarnessBuilder::new()
        .loader_delay(Duration::from_millis(20))
        .build();
    h.engine
        .load_cells(vec![
            cell(1, CellType::ExternalDependencies, "https://a.js\nhttps://b.js"),
            cell(2, CellType::ExternalDependencies, "https://b.js\nhttps://a.js"),
        ])
        .unwrap();

    let first = h.engine.evaluate_cell(CellId::new(1)).unwrap();
    let second = h.engine.evaluate_cell(CellId::new(2)).unwrap();
    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(h.loader.calls("https://a.js"), 1);
    assert_eq!(h.loader.calls("https://b.js"), 1);
    assert_eq!(h.engine.dependencies().await.len(), 2);
}

// =============================================================================
// Code cells
// =============================================================================

#[tokio::test]
async fn test_failing_code_cell_does_not_block_queue() {
    let h = harness();
    h.engine
        .load_cells(vec![expr(1, "boom()"), expr(2, "1 + 1")])
        .unwrap();

    let failing = h.engine.evaluate_cell(CellId::new(1)).unwrap();
    let next = h.engine.evaluate_cell(CellId::new(2)).unwrap();

    assert_eq!(failing.await.unwrap().status, EvalStatus::Error);
    assert_eq!(next.await.unwrap().status, EvalStatus::Success);

    let failed = h.engine.cell(CellId::new(1)).unwrap();
    assert_eq!(failed.eval_status, Some(EvalStatus::Error));
    assert!(failed.rendered);
    assert!(failed.value.is_error());

    assert_eq!(
        h.engine.cell(CellId::new(2)).unwrap().value,
        CellValue::Json(json!(2))
    );

    let history = h.engine.history();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|e| e.history_type == HistoryType::CellEvalValue));
    assert!(history[0].value.is_error());
}

#[tokio::test]
async fn test_expr_context_persists_between_cells() {
    let h = harness();
    h.engine
        .load_cells(vec![expr(1, "total = 6 * 7"), expr(2, "total + 1")])
        .unwrap();

    let summaries = h.engine.evaluate_all().await.unwrap();
    assert!(summaries.iter().all(|s| s.status == EvalStatus::Success));
    assert_eq!(
        h.engine.cell(CellId::new(2)).unwrap().value,
        CellValue::Json(json!(43))
    );
}

#[tokio::test]
async fn test_unknown_language_is_cell_error() {
    let h = harness();
    h.engine
        .load_cells(vec![Cell::code(CellId::new(1), "cobol", "DISPLAY 'HI'")])
        .unwrap();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Error);

    let cell = h.engine.cell(CellId::new(1)).unwrap();
    match cell.value {
        CellValue::Error(err) => {
            assert_eq!(err.name, "LanguageError");
            assert!(err.message.contains("cobol"));
        }
        other => panic!("expected error value, got {other:?}"),
    }
    assert_eq!(h.engine.history().len(), 1);
    assert!(h.side_effects.resets.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_side_effects_reset_before_run() {
    let env = Environment::new();
    env.install_evaluator(
        "nova_expr",
        "evaluate",
        Arc::new(
            |_code: &str, ctx: &EvalContext| -> Result<serde_json::Value, EvaluationError> {
                ctx.mark_side_effect();
                Ok(serde_json::Value::Null)
            },
        ),
    );
    let h = HarnessBuilder::new().environment(env).build();
    h.engine.load_cells(vec![expr(7, "draw()")]).unwrap();

    assert_eq!(evaluate(&h.engine, 7).await, EvalStatus::Success);

    assert_eq!(*h.side_effects.resets.lock().unwrap(), vec![CellId::new(7)]);
    assert!(h.engine.cell(CellId::new(7)).unwrap().has_side_effect);
}

#[tokio::test]
async fn test_continuation_gate_holds_queue() {
    let order = Arc::new(Mutex::new(Vec::<String>::new()));

    let env = Environment::new();
    let log = order.clone();
    env.install_evaluator(
        "nova_expr",
        "evaluate",
        Arc::new(
            move |code: &str, ctx: &EvalContext| -> Result<serde_json::Value, EvaluationError> {
                log.lock().unwrap().push(format!("eval {code}"));
                if code == "async" {
                    let continuation = ctx.defer();
                    let log = log.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        log.lock().unwrap().push("external done".to_string());
                        continuation.resolve();
                    });
                }
                Ok(serde_json::Value::Null)
            },
        ),
    );

    let h = HarnessBuilder::new().environment(env).build();
    h.engine
        .load_cells(vec![expr(1, "async"), expr(2, "sync")])
        .unwrap();

    let first = h.engine.evaluate_cell(CellId::new(1)).unwrap();
    let second = h.engine.evaluate_cell(CellId::new(2)).unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(h.engine.running_cell(), Some(CellId::new(1)));

    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(
        *order.lock().unwrap(),
        vec!["eval async", "external done", "eval sync"]
    );
    assert_eq!(h.engine.running_cell(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_blocking_evaluator_does_not_stall_runtime() {
    let (tx, rx) = std::sync::mpsc::channel::<()>();
    let rx = Mutex::new(rx);

    // The evaluator blocks its thread until a separate tokio task signals it.
    // With a single worker that task can only run if the evaluator has moved
    // off the worker thread.
    let env = Environment::new();
    env.install_evaluator(
        "nova_expr",
        "evaluate",
        Arc::new(
            move |_code: &str, _ctx: &EvalContext| -> Result<serde_json::Value, EvaluationError> {
                rx.lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(5))
                    .map(|()| json!(true))
                    .map_err(|e| EvaluationError::new(e.to_string()))
            },
        ),
    );
    let h = HarnessBuilder::new().environment(env).build();
    h.engine.load_cells(vec![expr(1, "wait")]).unwrap();

    let pending = h.engine.evaluate_cell(CellId::new(1)).unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(());
    });

    assert_eq!(pending.await.unwrap().status, EvalStatus::Success);
    assert_eq!(
        h.engine.cell(CellId::new(1)).unwrap().value,
        CellValue::Json(json!(true))
    );
}

// =============================================================================
// Plugins
// =============================================================================

#[tokio::test]
async fn test_plugin_download_and_install() {
    let h = HarnessBuilder::new()
        .script(vec![
            TransferEvent::Progress {
                loaded: 50,
                total: Some(100),
            },
            TransferEvent::Progress {
                loaded: 100,
                total: Some(100),
            },
            TransferEvent::Loaded(b"lua> ".to_vec()),
        ])
        .build();
    h.engine.load_cells(vec![lua_plugin(1)]).unwrap();
    let languages_before = h.engine.languages().len();
    let mut events = h.engine.subscribe();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Success);

    let history = h.engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].history_type, HistoryType::CellEvalInfo);
    assert_eq!(history[0].value, CellValue::text("Lua plugin ready"));

    let events = drain(&mut events);
    assert_eq!(
        amended_values(&events),
        vec![
            "downloading plugin: 50 bytes loaded out of 100 (50%)",
            "downloading plugin: 100 bytes loaded out of 100 (100%)",
            "Lua plugin downloaded, initializing",
            "Lua plugin ready",
        ]
    );
    let added = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::LanguageAdded { .. }))
        .count();
    assert_eq!(added, 1);

    assert_eq!(h.engine.languages().len(), languages_before + 1);
    assert!(h.engine.language("lua").is_some());
    assert_eq!(*h.editor.posted.lock().unwrap(), vec!["lua"]);
    assert_eq!(h.transport.fetches(), 1);
}

#[tokio::test]
async fn test_plugin_then_code_runs_in_order() {
    let h = harness();
    h.engine
        .load_cells(vec![
            lua_plugin(1),
            Cell::code(CellId::new(2), "lua", "print(1)"),
        ])
        .unwrap();

    // Both requested before either runs: the code cell must wait for the
    // language to be installed.
    let plugin = h.engine.evaluate_cell(CellId::new(1)).unwrap();
    let code = h.engine.evaluate_cell(CellId::new(2)).unwrap();

    assert_eq!(plugin.await.unwrap().status, EvalStatus::Success);
    assert_eq!(code.await.unwrap().status, EvalStatus::Success);
    assert_eq!(
        h.engine.cell(CellId::new(2)).unwrap().value,
        CellValue::Json(json!("lua> print(1)"))
    );
}

#[tokio::test]
async fn test_plugin_parse_failure_makes_no_request() {
    let h = harness();
    h.engine
        .load_cells(vec![cell(1, CellType::Plugin, "{ not json")])
        .unwrap();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Error);

    let history = h.engine.history();
    assert_eq!(history.len(), 1);
    let value = history[0].value.to_string();
    assert!(value.starts_with("plugin definition failed to parse:\n"));
    assert_eq!(h.transport.fetches(), 0);
    assert_eq!(
        h.engine.cell(CellId::new(1)).unwrap().eval_status,
        Some(EvalStatus::Error)
    );
}

#[tokio::test]
async fn test_plugin_missing_url_makes_no_request() {
    let h = harness();
    let content = json!({ "pluginType": "language", "displayName": "Lua" }).to_string();
    h.engine
        .load_cells(vec![cell(1, CellType::Plugin, &content)])
        .unwrap();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Error);

    let history = h.engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].value,
        CellValue::text("plugin definition missing \"url\"")
    );
    assert_eq!(h.transport.fetches(), 0);
}

#[tokio::test]
async fn test_plugin_transfer_failure() {
    let h = HarnessBuilder::new()
        .script(vec![TransferEvent::Failed(TransferError::Status(404))])
        .build();
    h.engine.load_cells(vec![lua_plugin(1)]).unwrap();
    let languages_before = h.engine.languages().len();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Error);

    assert_eq!(
        h.engine.history()[0].value,
        CellValue::text("Lua plugin failed to load")
    );
    assert_eq!(h.engine.languages().len(), languages_before);
    assert!(h.editor.posted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_plugin_transfer_closing_early_is_failure() {
    let h = HarnessBuilder::new()
        .script(vec![TransferEvent::Progress {
            loaded: 10,
            total: None,
        }])
        .build();
    h.engine.load_cells(vec![lua_plugin(1)]).unwrap();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Error);
    assert_eq!(
        h.engine.history()[0].value,
        CellValue::text("Lua plugin failed to load")
    );
}

#[tokio::test]
async fn test_plugin_install_failure_reports_reason() {
    let h = HarnessBuilder::new().reject_install("bad bytes").build();
    h.engine.load_cells(vec![lua_plugin(1)]).unwrap();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Error);

    assert_eq!(
        h.engine.history()[0].value,
        CellValue::text("Lua plugin failed to load: plugin rejected: bad bytes")
    );
    assert!(h.engine.language("lua").is_none());
}

#[tokio::test]
async fn test_unsupported_plugin_type() {
    let h = harness();
    h.engine
        .load_cells(vec![cell(1, CellType::Plugin, r#"{"pluginType": "theme"}"#)])
        .unwrap();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Error);

    let history = h.engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].value,
        CellValue::text("no loader for plugin type \"theme\"")
    );
    assert_eq!(h.engine.app_messages().len(), 1);
    assert_eq!(h.transport.fetches(), 0);
}

#[tokio::test]
async fn test_plugin_without_type_is_not_loaded() {
    let h = harness();
    let content = json!({
        "languageId": "lua",
        "displayName": "Lua",
        "url": "https://plugins.test/lua.so",
        "module": "lua",
        "evaluator": "run",
    });
    h.engine
        .load_cells(vec![cell(1, CellType::Plugin, &content.to_string())])
        .unwrap();

    assert_eq!(evaluate(&h.engine, 1).await, EvalStatus::Error);

    assert_eq!(h.transport.fetches(), 0);
    assert!(h.engine.language("lua").is_none());
    assert!(h.editor.posted.lock().unwrap().is_empty());

    let history = h.engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].history_type, HistoryType::CellEvalInfo);
    assert_eq!(
        history[0].value,
        CellValue::text("No loader for plugin type or missing \"pluginType\" entry")
    );
    assert_eq!(h.engine.app_messages().len(), 1);
}

// =============================================================================
// History
// =============================================================================

#[tokio::test]
async fn test_history_ids_increase_and_amend_keeps_entry() {
    let h = HarnessBuilder::new()
        .script(vec![
            TransferEvent::Progress {
                loaded: 1,
                total: None,
            },
            TransferEvent::Loaded(b"lua> ".to_vec()),
        ])
        .build();
    h.engine
        .load_cells(vec![
            cell(1, CellType::Css, "p {}"),
            lua_plugin(2),
            expr(3, "1"),
        ])
        .unwrap();
    let mut events = h.engine.subscribe();

    h.engine.evaluate_all().await.unwrap();

    let history = h.engine.history();
    let ids: Vec<u64> = history.iter().map(|e| e.history_id.as_u64()).collect();
    assert_eq!(history.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let events = drain(&mut events);
    let appended_plugin = events
        .iter()
        .find_map(|event| match event {
            EngineEvent::HistoryAppended { entry } if entry.cell_id == CellId::new(2) => {
                Some(entry.clone())
            }
            _ => None,
        })
        .expect("plugin entry appended");

    let current = h.engine.history_entry(appended_plugin.history_id).unwrap();
    assert_eq!(current.cell_id, appended_plugin.cell_id);
    assert_eq!(current.content, appended_plugin.content);
    assert_eq!(current.history_type, appended_plugin.history_type);
    assert_eq!(current.last_ran, appended_plugin.last_ran);
    assert_ne!(current.value, appended_plugin.value);
}

// =============================================================================
// Session
// =============================================================================

#[tokio::test]
async fn test_evaluate_requires_known_cell() {
    let h = harness();
    h.engine.load_cells(vec![expr(1, "1")]).unwrap();

    assert!(matches!(
        h.engine.evaluate_cell(CellTarget::Selected),
        Err(Error::NoCellSelected)
    ));
    assert!(matches!(
        h.engine.evaluate_cell(CellId::new(99)),
        Err(Error::CellNotFound(_))
    ));

    h.engine.select_cell(CellId::new(1)).unwrap();
    let summary = h
        .engine
        .evaluate_cell(CellTarget::Selected)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(summary.cell_id, CellId::new(1));
    assert_eq!(h.engine.execution_number(), 1);
}

#[tokio::test]
async fn test_load_rejects_duplicate_ids() {
    let h = harness();
    let result = h.engine.load_cells(vec![expr(1, "1"), expr(1, "2")]);
    assert!(matches!(result, Err(Error::DuplicateCell(_))));
}

#[tokio::test]
async fn test_new_notebook_clears_session() {
    let h = harness();
    h.engine
        .load_cells(vec![
            cell(1, CellType::Css, "p {}"),
            cell(2, CellType::ExternalDependencies, "https://a.js"),
        ])
        .unwrap();
    h.engine.select_cell(CellId::new(1)).unwrap();
    h.engine.evaluate_all().await.unwrap();
    let last_id = h.engine.history().last().unwrap().history_id;

    let mut events = h.engine.subscribe();
    h.engine.new_notebook().await;

    assert!(h.engine.cells().is_empty());
    assert!(h.engine.history().is_empty());
    assert!(h.engine.dependencies().await.is_empty());
    assert_eq!(h.engine.selected_cell(), None);
    assert!(h.engine.language("expr").is_some());
    assert!(matches!(
        drain(&mut events).as_slice(),
        [EngineEvent::NotebookReset]
    ));

    h.engine
        .load_cells(vec![cell(1, CellType::Css, "p {}")])
        .unwrap();
    evaluate(&h.engine, 1).await;
    assert!(h.engine.history()[0].history_id > last_id);
}
