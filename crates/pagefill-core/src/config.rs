//! Fill session configuration.
//!
//! Configuration is read once per fill session, typically from a TOML file:
//!
//! ```toml
//! runner = "cooperative"
//!
//! [virtualization]
//! enabled = true
//! max_resident_pages = 16
//! frame_element_threshold = 256
//!
//! [worker]
//! name_prefix = "pagefill-subreport"
//! stack_size = 4194304
//! ```
//!
//! Every key is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default deep element count above which frame children are handed to the
/// virtualization store.
pub const DEFAULT_FRAME_ELEMENT_THRESHOLD: usize = 256;

/// Which subreport runner implementation a fill session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStrategy {
    /// Subreports run on the parent's thread, suspending by returning.
    Cooperative,
    /// Each active subreport runs on a dedicated worker thread.
    #[default]
    Thread,
}

/// Virtualization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualizationConfig {
    /// Whether completed pages and large frames may be written out.
    pub enabled: bool,
    /// Completed pages kept in memory before older ones are written out.
    /// `None` keeps every page resident.
    pub max_resident_pages: Option<usize>,
    /// Deep element count above which a frame's children are store-managed.
    pub frame_element_threshold: usize,
}

impl Default for VirtualizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_resident_pages: None,
            frame_element_threshold: DEFAULT_FRAME_ELEMENT_THRESHOLD,
        }
    }
}

/// Settings for subreport worker threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix of worker thread names; the subreport name is appended.
    pub name_prefix: String,
    /// Stack size for worker threads in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name_prefix: "pagefill-subreport".to_string(),
            stack_size: None,
        }
    }
}

/// Configuration of one fill session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FillConfig {
    /// Subreport runner strategy.
    pub runner: RunnerStrategy,
    /// Virtualization settings.
    pub virtualization: VirtualizationConfig,
    /// Worker thread settings, used by [`RunnerStrategy::Thread`].
    pub worker: WorkerConfig,
}

impl FillConfig {
    /// Parse and validate a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: FillConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Builder-style runner selection.
    pub fn with_runner(mut self, runner: RunnerStrategy) -> Self {
        self.runner = runner;
        self
    }

    /// Builder-style resident page limit.
    pub fn with_max_resident_pages(mut self, pages: usize) -> Self {
        self.virtualization.max_resident_pages = Some(pages);
        self
    }

    /// Check values serde cannot check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.virtualization.max_resident_pages == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "virtualization.max_resident_pages".to_string(),
                message: "must keep at least one page resident".to_string(),
            });
        }
        if self.virtualization.frame_element_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                key: "virtualization.frame_element_threshold".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.worker.stack_size == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "worker.stack_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
