use crate::models::ErrorCategory;
use std::fmt;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// The registry answered 404 for the requested company.
    NotFound(String),
    /// The registry kept answering 429 after every retry.
    RateLimited(String),
    /// The request timed out on every attempt.
    Timeout(String),
    /// The registry kept answering with a 5xx status.
    ServerError {
        /// Last status code seen.
        status: u16,
        /// Response body excerpt or description.
        message: String,
    },
    /// The monthly request quota would be exceeded by another request.
    QuotaExhausted {
        /// Requests already spent.
        used: u64,
        /// Configured monthly limit.
        limit: u64,
    },
    /// Any other failure talking to the registry (4xx, connection, bad body).
    ExternalApiError(String),
    /// The checkpoint file exists but failed validation.
    CorruptCheckpoint(String),
    /// Filesystem errors.
    Io(std::io::Error),
    /// JSON (de)serialization errors.
    Serialization(String),
    /// CSV writer errors.
    Csv(String),
    /// Invalid configuration value.
    Config(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Maps a request failure onto the category written to the error log.
    ///
    /// Context wrappers are looked through, so a wrapped 404 is still `NotFound`.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::NotFound(_) => ErrorCategory::NotFound,
            AppError::RateLimited(_) => ErrorCategory::RateLimited,
            AppError::Timeout(_) => ErrorCategory::Timeout,
            AppError::ServerError { .. } => ErrorCategory::ServerError,
            AppError::WithContext { source, .. } => source.category(),
            _ => ErrorCategory::Unexpected,
        }
    }

    /// HTTP status associated with the failure, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::NotFound(_) => Some(404),
            AppError::RateLimited(_) => Some(429),
            AppError::ServerError { status, .. } => Some(*status),
            AppError::WithContext { source, .. } => source.status(),
            _ => None,
        }
    }

    /// True when no further network calls may be made in this run.
    pub fn is_quota_exhausted(&self) -> bool {
        match self {
            AppError::QuotaExhausted { .. } => true,
            AppError::WithContext { source, .. } => source.is_quota_exhausted(),
            _ => false,
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            AppError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            AppError::ServerError { status, message } => {
                write!(f, "Server error {}: {}", status, message)
            }
            AppError::QuotaExhausted { used, limit } => {
                write!(f, "Request quota exhausted: {}/{}", used, limit)
            }
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::CorruptCheckpoint(msg) => write!(f, "Corrupt checkpoint: {}", msg),
            AppError::Io(e) => write!(f, "IO error: {}", e),
            AppError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            AppError::Csv(msg) => write!(f, "CSV error: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Io(e) => Some(e),
            AppError::WithContext { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else {
            AppError::ExternalApiError(err.to_string())
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::Csv(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for filesystem errors to add context
impl<T> ResultExt<T> for Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::Io(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::Io(e)),
            context: f(),
        })
    }
}
