//! Error types for pagefill.

use std::path::PathBuf;

/// Errors raised while writing or reloading virtualized page content.
#[derive(Debug, thiserror::Error)]
pub enum VirtualizationError {
    /// The input ended before a complete value could be read.
    #[error("virtualized data ended unexpectedly while reading {context}")]
    Truncated {
        /// What was being read when the input ran out.
        context: &'static str,
    },

    /// A type tag in the input is not one the codec writes.
    #[error("unknown {kind} tag {tag} in virtualized data")]
    UnknownTag { kind: &'static str, tag: u8 },

    /// A string payload is not valid UTF-8.
    #[error("virtualized string is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A sentinel referenced a managed element list the store does not know.
    #[error("no managed element list registered for element {id}")]
    MissingList { id: String },

    /// A swapped-out block could not be found.
    #[error("no swapped block stored under key {key}")]
    MissingBlock { key: u64 },

    /// File swap I/O failure.
    #[error("swap I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl VirtualizationError {
    /// Create an I/O error for a swap file.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while loading fill configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML for [`FillConfig`](crate::FillConfig).
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting parsed but holds an unusable value.
    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// The main error type for fill operations.
#[derive(Debug, thiserror::Error)]
pub enum FillError {
    /// The expression evaluator failed for one expression.
    #[error("failed to evaluate expression '{expression}': {message}")]
    Evaluation { expression: String, message: String },

    /// A subreport tried to span pages inside a band that cannot overflow.
    #[error("subreport '{report}' cannot span pages: the parent band does not allow overflow")]
    UnsupportedOverflow { report: String },

    /// A subreport completed a page while no runner was bound to its parent.
    #[error("no subreport runner bound for subreport '{report}'")]
    NoRunnerBound { report: String },

    /// An incrementer strategy could not be constructed.
    #[error("cannot instantiate incrementer strategy '{kind}': {message}")]
    StrategyInstantiation { kind: String, message: String },

    /// The fill was aborted on request. Not a failure.
    #[error("fill aborted")]
    Aborted,

    /// A runner operation was requested in a state that does not allow it.
    #[error("subreport runner cannot {operation} while {state}")]
    InvalidRunnerState {
        operation: &'static str,
        state: &'static str,
    },

    /// An element operation was requested out of order.
    #[error("element '{element}' cannot {operation} while {state}")]
    InvalidElementState {
        element: String,
        operation: &'static str,
        state: &'static str,
    },

    /// A band overflowed an empty page and would never fit.
    #[error("band '{band}' of report '{report}' does not fit on an empty page")]
    InfiniteOverflow { report: String, band: String },

    /// A subreport worker thread ended without reporting a result.
    #[error("subreport worker for '{report}' terminated unexpectedly")]
    RunnerPanicked { report: String },

    /// A subreport worker thread could not be spawned.
    #[error("failed to spawn subreport worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The data source collaborator failed.
    #[error("data source error: {0}")]
    DataSource(String),

    /// Virtualization failure.
    #[error(transparent)]
    Virtualization(#[from] VirtualizationError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FillError {
    /// Create an evaluation error.
    pub fn evaluation(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Whether this is the requested-termination path rather than a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// A specialized Result type for fill operations.
pub type FillResult<T> = std::result::Result<T, FillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_is_not_reported_as_failure() {
        assert!(FillError::Aborted.is_abort());
        assert!(!FillError::evaluation("$F{x}", "boom").is_abort());
    }

    #[test]
    fn test_virtualization_error_converts() {
        let err: FillError = VirtualizationError::MissingBlock { key: 7 }.into();
        assert!(matches!(
            err,
            FillError::Virtualization(VirtualizationError::MissingBlock { key: 7 })
        ));
        assert_eq!(err.to_string(), "no swapped block stored under key 7");
    }
}
