
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetatypeError {
    #[error("Invalid type definition: {0}")]
    InvalidTypeDefinition(String),
    #[error("Invalid value at '{path}': {message}")]
    InvalidValue { path: String, message: String },
    #[error("Invalid path '{path}': {message}")]
    InvalidPath { path: String, message: String },
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("Conversion error: {0}")]
    ConversionError(String),
    #[error("Missing dictionary entry: {0}")]
    MissingDictionaryEntry(String),
    #[error("Dictionary '{0}' is immutable")]
    ImmutableDictionary(String),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, MetatypeError>;

// Helper constructors
impl MetatypeError {
    pub fn invalid_value(path: impl ToString, message: impl Into<String>) -> Self {
        Self::InvalidValue { path: path.to_string(), message: message.into() }
    }
    pub fn invalid_path(path: impl ToString, message: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.to_string(), message: message.into() }
    }
    /// Failures that a recorder may absorb instead of aborting the caller.
    pub fn is_recordable(&self) -> bool {
        matches!(self, Self::ConversionError(_) | Self::InvalidValue { .. })
    }
}
