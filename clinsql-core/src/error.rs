//! Error types for CLINSQL operations

use thiserror::Error;

/// Database adapter errors. The variants mirror the failure kinds the
/// candidate-generation revise loop needs to distinguish.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DbError {
    #[error("SQL syntax error: {message}")]
    Syntax { message: String },

    #[error("Statement timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("SQL runtime error: {message}")]
    Runtime { message: String },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Pool error: {message}")]
    Pool { message: String },
}

impl DbError {
    /// Short machine-readable kind string used in result envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "sql_syntax",
            Self::Timeout { .. } => "sql_timeout",
            Self::Runtime { .. } => "sql_runtime",
            Self::Connection { .. } => "connection",
            Self::Pool { .. } => "connection",
        }
    }
}

/// LLM provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("Provider returned no content after {attempts} attempts: {last_error}")]
    EmptyContent { attempts: u32, last_error: String },

    #[error("Request to {provider} failed: {message}")]
    RequestFailed { provider: String, message: String },

    #[error("Rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("Invalid API key for {provider}")]
    InvalidApiKey { provider: String },

    #[error("Could not extract {expected} from model response")]
    ExtractFailed { expected: String },
}

/// Schema catalog errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Table not found in catalog: {table}")]
    TableNotFound { table: String },

    #[error("Foreign key on {table}.{column} references a column absent from the table")]
    DanglingForeignKey { table: String, column: String },

    #[error("Cache error at {path}: {reason}")]
    Cache { path: String, reason: String },
}

/// Preprocessor index errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("Cache blob at {path} is not a CLINSQL index: {reason}")]
    BadCache { path: String, reason: String },

    #[error("Cache version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u8, found: u8 },

    #[error("IO error at {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Agent-level errors for the unexpected failures agents do propagate.
/// Expected failures (bad LLM output, invalid SQL inside the revise loop)
/// are carried as values in `ToolResult`/`AgentResult` instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent {agent} failed: {reason}")]
    StageFailed { agent: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,
}

/// Configuration errors. These are fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all CLINSQL errors.
#[derive(Debug, Clone, Error)]
pub enum ClinsqlError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ClinsqlError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for CLINSQL operations.
pub type ClinsqlResult<T> = Result<T, ClinsqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_error_kinds() {
        let e = DbError::Syntax {
            message: "near SELECT".into(),
        };
        assert_eq!(e.kind(), "sql_syntax");
        let e = DbError::Timeout { timeout_secs: 15 };
        assert_eq!(e.kind(), "sql_timeout");
    }

    #[test]
    fn test_master_error_from_conversions() {
        let e: ClinsqlError = DbError::Runtime {
            message: "division by zero".into(),
        }
        .into();
        assert!(matches!(e, ClinsqlError::Db(_)));

        let e: ClinsqlError = AgentError::Cancelled.into();
        assert_eq!(e.to_string(), "Agent error: Operation cancelled");
    }
}
