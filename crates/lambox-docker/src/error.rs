use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("invalid engine host: {0} (expected unix:// or tcp://)")]
    InvalidHost(String),

    #[error("failed to connect to engine at {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine transport error: {0}")]
    Transport(#[from] hyper::Error),

    #[error("invalid engine request: {0}")]
    Request(#[from] http::Error),

    /// Non-2xx answer from the engine, carrying its `message` field.
    #[error("{message}")]
    Engine { status: u16, message: String },

    #[error("network not found: {0}")]
    NetworkNotFound(String),

    #[error("container {id} has no host binding for port {port}")]
    PortNotBound { id: String, port: String },

    #[error("kill admission gate closed: {0}")]
    Admission(#[from] tokio::sync::AcquireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<std::convert::Infallible> for DockerError {
    fn from(e: std::convert::Infallible) -> Self {
        match e {}
    }
}

impl DockerError {
    /// True when the engine answered 404 for the addressed object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DockerError::Engine { status: 404, .. })
    }
}

/// One container that could not be killed.
#[derive(Debug, Error)]
#[error("failed to kill container: {id}, err: {error}")]
pub struct KillFailure {
    pub id: String,
    #[source]
    pub error: DockerError,
}

/// Every failure collected by a bulk kill. Never empty when returned as `Err`.
#[derive(Debug)]
pub struct KillMultiError {
    pub failures: Vec<KillFailure>,
}

impl KillMultiError {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.id.as_str()).collect()
    }
}

impl fmt::Display for KillMultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} container(s) failed to stop", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for KillMultiError {}
