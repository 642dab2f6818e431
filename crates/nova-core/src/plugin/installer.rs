//! Plugin installation.
//!
//! Installing a plugin runs downloaded code with the full privileges of the
//! engine process. Nothing here sandboxes or verifies the payload; only add
//! plugin cells from sources you trust.

use std::ffi::c_void;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use libloading::Library;
use thiserror::Error;

use crate::error::EvaluationError;
use crate::host::{EvalContext, Environment, Evaluator};
use crate::language::LanguageDefinition;

/// Why a downloaded plugin could not be installed.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to stage plugin payload: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to load plugin library: {0}")]
    Library(#[from] libloading::Error),

    #[error("plugin initialization returned {0}")]
    Init(i32),

    #[error("plugin rejected: {0}")]
    Rejected(String),
}

/// Installs a downloaded plugin payload into the host environment.
pub trait PluginInstaller: Send + Sync {
    /// Execute `payload` so that `definition.module.definition.evaluator`
    /// becomes callable in `environment`, returning the definition to
    /// register.
    fn install<'a>(
        &'a self,
        payload: Vec<u8>,
        definition: &'a LanguageDefinition,
        environment: &'a Environment,
    ) -> BoxFuture<'a, Result<LanguageDefinition, InstallError>>;
}

/// Optional initializer: `int32_t nova_plugin_init(void)`, 0 on success.
const INIT_SYMBOL: &[u8] = b"nova_plugin_init";

/// Evaluator entry point exported under the definition's `evaluator` name:
///
/// ```c
/// int32_t run(const uint8_t *src, size_t src_len, uint8_t **out, size_t *out_len);
/// ```
///
/// On success (`0`) `out` holds JSON; otherwise it holds a UTF-8 error
/// message. `out` must be allocated with `malloc`; the host frees it.
type EntryFn = unsafe extern "C" fn(*const u8, usize, *mut *mut u8, *mut usize) -> i32;
type InitFn = unsafe extern "C" fn() -> i32;

/// Installer for plugins shipped as native shared libraries.
pub struct DylibInstaller {
    plugin_dir: PathBuf,
    counter: AtomicU64,
    /// Loaded libraries stay mapped for the lifetime of the installer.
    libraries: Mutex<Vec<Arc<Library>>>,
}

impl DylibInstaller {
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            counter: AtomicU64::new(0),
            libraries: Mutex::new(Vec::new()),
        }
    }

    /// Number of libraries loaded so far.
    pub fn loaded(&self) -> usize {
        self.libraries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn staging_path(&self, language_id: &str) -> PathBuf {
        let name: String = language_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.plugin_dir.join(format!(
            "{name}-{}-{n}.{}",
            std::process::id(),
            std::env::consts::DLL_EXTENSION
        ))
    }

    async fn install_library(
        &self,
        payload: Vec<u8>,
        definition: &LanguageDefinition,
        environment: &Environment,
    ) -> Result<LanguageDefinition, InstallError> {
        if payload.is_empty() {
            return Err(InstallError::Rejected("empty payload".to_string()));
        }

        tokio::fs::create_dir_all(&self.plugin_dir).await?;
        let path = self.staging_path(&definition.language_id);
        tokio::fs::write(&path, &payload).await?;
        tracing::debug!(path = %path.display(), "staged plugin library");

        // SAFETY: loading runs the library's initializers. This is the
        // unsandboxed trust boundary described in the module docs.
        let library = unsafe { Library::new(&path)? };

        // SAFETY: the symbol type matches the documented init ABI.
        if let Ok(init) = unsafe { library.get::<InitFn>(INIT_SYMBOL) } {
            let code = unsafe { init() };
            if code != 0 {
                return Err(InstallError::Init(code));
            }
        }

        // SAFETY: the symbol type matches the documented entry ABI. The
        // function pointer stays valid while `library` is alive, which the
        // evaluator closure guarantees by holding an `Arc` to it.
        let entry: EntryFn = unsafe { *library.get::<EntryFn>(definition.evaluator.as_bytes())? };

        let library = Arc::new(library);
        let keep_alive = library.clone();
        let evaluator: Evaluator = Arc::new(move |code: &str, _ctx: &EvalContext| {
            let _library = &keep_alive;
            call_entry(entry, code)
        });
        environment.install_evaluator(&definition.module, &definition.evaluator, evaluator);

        self.libraries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(library);

        Ok(definition.clone())
    }
}

impl PluginInstaller for DylibInstaller {
    fn install<'a>(
        &'a self,
        payload: Vec<u8>,
        definition: &'a LanguageDefinition,
        environment: &'a Environment,
    ) -> BoxFuture<'a, Result<LanguageDefinition, InstallError>> {
        Box::pin(self.install_library(payload, definition, environment))
    }
}

/// RAII guard for plugin-allocated output buffers.
struct FfiBuffer {
    ptr: *mut u8,
}

impl FfiBuffer {
    fn as_slice(&self, len: usize) -> &[u8] {
        if self.ptr.is_null() || len == 0 {
            return &[];
        }
        // SAFETY: the plugin ABI promises `len` initialized bytes at `ptr`.
        unsafe { std::slice::from_raw_parts(self.ptr, len) }
    }
}

impl Drop for FfiBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: the plugin ABI requires `malloc`-allocated output.
            unsafe { libc::free(self.ptr as *mut c_void) };
        }
    }
}

fn call_entry(entry: EntryFn, code: &str) -> Result<serde_json::Value, EvaluationError> {
    let mut out: *mut u8 = std::ptr::null_mut();
    let mut out_len: usize = 0;

    // SAFETY: `code` outlives the call and the out-pointers are valid.
    let status = unsafe { entry(code.as_ptr(), code.len(), &mut out, &mut out_len) };
    let buffer = FfiBuffer { ptr: out };
    let bytes = buffer.as_slice(out_len);

    if status == 0 {
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(bytes)
            .map_err(|e| EvaluationError::with_name("PluginOutputError", e.to_string()))
    } else {
        let message = if bytes.is_empty() {
            format!("plugin evaluator returned {status}")
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        };
        Err(EvaluationError::with_name("PluginError", message))
    }
}
