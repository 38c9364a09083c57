use thiserror::Error;

/// Main error type for the Hyperloom search coordinator
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search space exhausted after {drawn} samples")]
    Exhausted { drawn: usize },

    #[error("Not implemented: {feature}")]
    NotImplemented { feature: String },

    #[error("Invalid axis {label}: {message}")]
    InvalidAxis { label: String, message: String },

    #[error("Invalid search template: {message}")]
    InvalidTemplate { message: String },

    #[error("Subprocess for run {run_id} is not being tracked")]
    UntrackedRun { run_id: String },

    #[error("Run {run_id} is unknown to this status snapshot")]
    UnknownRun { run_id: String },

    #[error("Failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SearchError {
    /// Errors that mean the coordinator's bookkeeping no longer matches the
    /// processes on this host.
    pub fn is_bookkeeping_violation(&self) -> bool {
        matches!(
            self,
            SearchError::UntrackedRun { .. } | SearchError::UnknownRun { .. }
        )
    }
}

/// Result type alias for Hyperloom operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SearchError::Config(format!($($arg)*))
    };
}
