use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("tool `{0}` not found")]
    UnknownTool(String),

    #[error("tool `{0}` is already registered")]
    DuplicateTool(String),

    #[error("tool `{name}` has an invalid input schema: {reason}")]
    InvalidSchema { name: String, reason: String },

    #[error("invalid arguments for tool `{name}`: {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
