use std::sync::PoisonError;
use config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cannot access `{property}` of `{entity}`: {message}")]
    Access { entity: String, property: String, message: String },

    #[error("No matching entity: {0}")]
    NoMatchingEntity(String),

    #[error("Retry budget of {attempts} attempts exhausted: {context}")]
    RetryExhausted { attempts: usize, context: String },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<PersistenceError>,
    },

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl PersistenceError {
    pub fn access(entity: impl Into<String>, property: impl Into<String>, message: impl Into<String>) -> Self {
        PersistenceError::Access { entity: entity.into(), property: property.into(), message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        PersistenceError::Configuration(message.into())
    }

    /// Innermost error once every `Context` layer is peeled off.
    pub fn root_cause(&self) -> &PersistenceError {
        match self {
            PersistenceError::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self.root_cause(), PersistenceError::RetryExhausted { .. })
    }
}

impl<T> From<PoisonError<T>> for PersistenceError {
    fn from(e: PoisonError<T>) -> Self {
        PersistenceError::Custom(format!("Poison error: {:?}", e.to_string()))
    }
}

/// Attaches a human readable context to a failing operation.
pub trait ResultExt<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T, PersistenceError>;
    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T, PersistenceError>;
}

impl<T> ResultExt<T> for Result<T, PersistenceError> {
    fn context<C: Into<String>>(self, context: C) -> Result<T, PersistenceError> {
        self.map_err(|source| PersistenceError::Context { context: context.into(), source: Box::new(source) })
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T, PersistenceError> {
        self.map_err(|source| PersistenceError::Context { context: f().into(), source: Box::new(source) })
    }
}
