//! Error types shared across AgentForge crates.

/// Top-level error type for the queue, scheduler and dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// Caller supplied a value the core refuses (bad max-attempts, cron or timestamp syntax, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A run was stopped before the queue drained.
    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForgeError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<rusqlite::Error> for ForgeError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Result alias used throughout AgentForge.
pub type Result<T> = std::result::Result<T, ForgeError>;
