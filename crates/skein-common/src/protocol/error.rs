use thiserror::Error;

/// Errors raised by the consumer runtime.
///
/// Only [`SkeinError::ServerBusy`] and [`SkeinError::ClientTimeout`] are
/// treated as retriable by fail-over; everything else surfaces on the first
/// occurrence. Errors produced while talking to a specific provider are
/// wrapped in [`SkeinError::Invocation`], which keeps the retry
/// classification of the error it wraps.
#[derive(Error, Debug)]
pub enum SkeinError {
    #[error("Routing error: {0}")]
    Routing(String),

    #[error("No available provider for {service}, candidates: {candidates:?}")]
    NoAvailableProvider {
        service: String,
        candidates: Vec<String>,
    },

    #[error("Server busy: {0}")]
    ServerBusy(String),

    #[error("Client timeout after {0}ms")]
    ClientTimeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Empty response: {0}")]
    EmptyResponse(String),

    #[error("Application error: {0}")]
    Application(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Destroyed: {0}")]
    Destroyed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to invoke {service}.{method} on {provider}: {source}")]
    Invocation {
        service: String,
        method: String,
        provider: String,
        #[source]
        source: Box<SkeinError>,
    },
}

impl SkeinError {
    /// Wraps an error raised while calling `provider`.
    pub fn invocation(
        service: impl Into<String>,
        method: impl Into<String>,
        provider: impl Into<String>,
        source: SkeinError,
    ) -> Self {
        SkeinError::Invocation {
            service: service.into(),
            method: method.into(),
            provider: provider.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through `Invocation` wrappers.
    pub fn root(&self) -> &SkeinError {
        match self {
            SkeinError::Invocation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether fail-over may retry the call on another attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.root(),
            SkeinError::ServerBusy(_) | SkeinError::ClientTimeout(_)
        )
    }

    /// Whether the error means the connection itself is unusable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self.root(),
            SkeinError::Connection(_) | SkeinError::EmptyResponse(_) | SkeinError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SkeinError>;
