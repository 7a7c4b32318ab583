/// Shared error type used across all StreetRace crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("compile failed with {} diagnostic(s)", .0.len())]
    Compile(Vec<String>),

    #[error("workload not found: {0}")]
    WorkloadNotFound(String),

    #[error("circular reference: {0}")]
    CircularReference(String),

    #[error("load failed: {0}")]
    LoadFailed(String),

    /// Transient provider error (rate limit, 5xx). Eligible for retry.
    #[error("provider {provider} transient: {message}")]
    LlmTransient { provider: String, message: String },

    /// Fatal provider error (auth, context length, schema violation).
    #[error("provider {provider}: {message}")]
    LlmFatal { provider: String, message: String },

    #[error("tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("json-parse-error: {0}")]
    JsonParse(String),

    #[error("schema-validation-error: {}", .0.join("; "))]
    SchemaValidation(Vec<String>),

    #[error("input blocked: {0}")]
    BlockedInput(String),

    #[error("retry requested: {0}")]
    RetryInput(String),

    #[error("parallel branches both assigned '{0}'")]
    MergeConflict(String),

    #[error("cancelled")]
    Cancelled,

    #[error("security error: {0}")]
    Security(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the retry wrapper may re-attempt the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::LlmTransient { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
