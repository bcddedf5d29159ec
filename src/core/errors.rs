//! Custom error types for packaging and serving operations

use thiserror::Error;

/// Errors raised while packaging, publishing or serving models
#[derive(Error, Debug)]
pub enum ServingError {
    /// A required configuration value is absent
    #[error("Missing required environment variable: {name}")]
    MissingEnv {
        /// Variable name
        name: String,
    },

    /// Configuration is present but unusable
    #[error("Configuration error: {message}")]
    ConfigError {
        /// What is wrong
        message: String,
    },

    /// Remote object or registry entry does not exist
    #[error("Not found: {resource}")]
    NotFound {
        /// Missing resource
        resource: String,
    },

    /// Remote object exists but the caller may not access it
    #[error("Permission denied: {resource}")]
    PermissionDenied {
        /// Denied resource
        resource: String,
    },

    /// External tool exited unsuccessfully
    #[error("Command `{program}` failed with exit code {code:?}: {stderr}")]
    ProcessError {
        /// Program that failed
        program: String,
        /// Exit code, `None` when killed or not started
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// API request failed
    #[error("API error: {status} - {message}")]
    ApiError {
        /// HTTP or operation status
        status: u16,
        /// Response body or operation message
        message: String,
    },

    /// Network error
    #[error("Network error: {message}")]
    NetworkError {
        /// Transport error
        message: String,
    },

    /// Invalid response from a remote service
    #[error("Invalid response: {message}")]
    InvalidResponseError {
        /// What was wrong with the response
        message: String,
    },

    /// Inference batch row the handler cannot read
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the row
        message: String,
    },

    /// Request-phase call made before the handler was initialized
    #[error("Handler is not initialized")]
    NotInitialized,

    /// Model name that cannot be used as a path or image component
    #[error("Invalid model name: {name}")]
    InvalidModelName {
        /// Rejected name
        name: String,
    },

    /// File operation error
    #[error("File error: {path} - {message}")]
    FileError {
        /// Path involved
        path: String,
        /// Underlying error
        message: String,
    },

    /// Translation model failed to load or generate
    #[error("Model error: {message}")]
    ModelError {
        /// Runtime error
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Reqwest error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ServingError {
    /// Whether this error means the remote resource is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServingError::NotFound { .. })
    }

    /// Map a non-success HTTP status to the matching variant
    pub fn from_status(status: u16, resource: impl Into<String>, body: String) -> Self {
        match status {
            404 => ServingError::NotFound {
                resource: resource.into(),
            },
            401 | 403 => ServingError::PermissionDenied {
                resource: resource.into(),
            },
            _ => ServingError::ApiError {
                status,
                message: body,
            },
        }
    }
}

impl From<config::ConfigError> for ServingError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => ServingError::MissingEnv {
                name: key.to_uppercase(),
            },
            other => ServingError::ConfigError {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for packaging and serving operations
pub type Result<T> = std::result::Result<T, ServingError>;
