use crate::component::TickMode;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Circuit scheduling knobs.
///
/// `buffer_count == 0` selects synchronous single-buffer mode; any higher
/// value pipelines that many ticks through the graph at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Concurrent pipeline slots (`0` = synchronous single-buffer).
    #[serde(default)]
    pub buffer_count: usize,

    /// Workers striding each buffer's component list (`1` minimum is
    /// applied to worker groups; `0` disables the pool entirely).
    #[serde(default = "default_threads_per_buffer")]
    pub threads_per_buffer: usize,

    /// Traversal mode used by auto-tick.
    #[serde(default = "default_tick_mode")]
    pub tick_mode: TickMode,
}

fn default_threads_per_buffer() -> usize {
    1
}

fn default_tick_mode() -> TickMode {
    TickMode::Series
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            buffer_count: 0,
            threads_per_buffer: default_threads_per_buffer(),
            tick_mode: default_tick_mode(),
        }
    }
}

/// Load any deserializable config from a file (json, toml, yaml, ...).
pub fn load_config<T: for<'a> Deserialize<'a>>(path: impl AsRef<str>) -> anyhow::Result<T> {
    let cfg = config::Config::builder()
        .add_source(config::File::from(PathBuf::from(path.as_ref())))
        .build()
        .with_context(|| format!("failed to read config from {}", path.as_ref()))?;

    cfg.try_deserialize()
        .with_context(|| format!("failed to deserialize config from {}", path.as_ref()))
}
