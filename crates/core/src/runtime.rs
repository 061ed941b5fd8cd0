//! monoio runtime wrapper
//!
//! The streaming session needs the timer driver (keep-alive, authentication
//! polling), so every runtime built here enables it.

use monoio::{IoUringDriver, RuntimeBuilder};
use tracing::info;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Thread name used in log lines
    pub thread_name: String,
    /// io_uring submission queue entries
    pub entries: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_name: "backpack-main".to_string(),
            entries: 1024,
        }
    }
}

/// Single-threaded runtime for the SDK
pub struct BackpackRuntime {
    config: RuntimeConfig,
}

impl BackpackRuntime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Build a runtime and drive `f` to completion
    pub fn start<F, Fut>(self, f: F) -> std::io::Result<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future,
    {
        info!("▶️  Starting runtime {}", self.config.thread_name);
        let mut runtime = RuntimeBuilder::<IoUringDriver>::new()
            .with_entries(self.config.entries)
            .enable_timer()
            .build()?;
        let result = runtime.block_on(f());
        info!("⏹️  Runtime {} stopped", self.config.thread_name);
        Ok(result)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl Default for BackpackRuntime {
    fn default() -> Self {
        Self::new()
    }
}
