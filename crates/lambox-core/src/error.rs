use std::path::PathBuf;

use thiserror::Error;

/// Structural problems with a request, reported all at once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} validation error(s) detected: {}", .0.len(), .0.join("; "))]
pub struct InvalidParams(pub Vec<String>);

/// Errors surfaced by the function service, one variant per Lambda error code.
#[derive(Debug, Error)]
pub enum LambdaError {
    #[error(transparent)]
    InvalidParameterValue(#[from] InvalidParams),

    #[error("invalid runtime: {0}")]
    InvalidRuntime(String),

    #[error("{0}")]
    InvalidZipFile(String),

    #[error("{0}")]
    ResourceInUse(String),

    #[error("function not found: {0}")]
    ResourceNotFound(String),

    #[error("{message}: {source}")]
    Service {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The function container could not be reached; passed through as-is.
    #[error("invocation failed: {0}")]
    Invoke(#[from] reqwest::Error),

    #[error("request cancelled")]
    Cancelled,
}

impl LambdaError {
    pub fn service(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        LambdaError::Service {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Lambda API error code (`x-amzn-ErrorType`).
    pub fn error_type(&self) -> &'static str {
        match self {
            LambdaError::InvalidParameterValue(_) => "InvalidParameterValueException",
            LambdaError::InvalidRuntime(_) => "InvalidRuntimeException",
            LambdaError::InvalidZipFile(_) => "InvalidZipFileException",
            LambdaError::ResourceInUse(_) => "ResourceInUseException",
            LambdaError::ResourceNotFound(_) => "ResourceNotFoundException",
            LambdaError::Service { .. } | LambdaError::Invoke(_) => "ServiceException",
            LambdaError::Cancelled => "RequestCanceledException",
        }
    }

    /// Whether the caller (rather than the emulator) is at fault.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            LambdaError::InvalidParameterValue(_)
                | LambdaError::InvalidRuntime(_)
                | LambdaError::InvalidZipFile(_)
                | LambdaError::ResourceInUse(_)
                | LambdaError::ResourceNotFound(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("code for {0} is already staged")]
    AlreadyStaged(String),

    #[error("{0}")]
    InvalidArchive(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
