//! Error taxonomy for the extraction engine.

/// Errors raised while configuring or running an extraction.
///
/// Irregular record shapes are not errors; the flattener coerces and logs them.
#[derive(Debug, thiserror::Error)]
pub enum MeltError {
    /// Malformed field spec or unusable load options. Raised before any page is read.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A page element that is not a JSON object.
    #[error("record {index} of page {page} is not an object (found {found})")]
    InvalidRecord {
        page: u64,
        index: usize,
        found: &'static str,
    },

    #[error("table '{table}' nests deeper than the configured limit of {limit} levels")]
    DepthLimit { table: String, limit: usize },

    #[error("table '{table}' exceeds the configured limit of {limit} columns")]
    ColumnLimit { table: String, limit: usize },

    /// Failure reported by the page source or a sink, passed through untouched.
    #[error(transparent)]
    External(#[from] anyhow::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MeltError {
    pub fn config(msg: impl Into<String>) -> Self {
        MeltError::Configuration(msg.into())
    }

    /// Prefix the message of a configuration error with some context.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            MeltError::Configuration(msg) => MeltError::Configuration(format!("{ctx}: {msg}")),
            other => other,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, MeltError::Configuration(_))
    }
}

pub type Result<T, E = MeltError> = std::result::Result<T, E>;
