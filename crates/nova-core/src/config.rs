//! Engine configuration.

use std::path::PathBuf;

/// Capacity for the event broadcast channel.
/// Subscribers that fall further behind than this miss the oldest events.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Directory where downloaded plugin libraries are staged before loading.
    pub plugin_dir: PathBuf,
    /// User agent for plugin and dependency downloads.
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            plugin_dir: default_plugin_dir(),
            user_agent: format!("nova/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// `<cache dir>/nova/plugins`, falling back to the working directory.
pub fn default_plugin_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nova")
        .join("plugins")
}
