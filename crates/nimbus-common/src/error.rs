//! Unified error types for the Nimbus workspace.
//!
//! Errors are categorized into a small sentinel taxonomy so callers can
//! match on the failure class (login required, not found, parsing failed…)
//! without inspecting message text. Higher-level crates wrap these variants
//! rather than defining parallel enums.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum NimbusError {
    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A resource with the same identifier already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Type of the conflicting resource.
        kind: &'static str,
        /// Identifier of the conflicting resource.
        id: String,
    },

    /// The operation was rejected by the remote service.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Description of the rejected operation.
        message: String,
    },

    /// User-supplied input could not be parsed.
    #[error("parsing failed: {message}")]
    ParsingFailed {
        /// Description of the malformed input.
        message: String,
    },

    /// No valid credentials are available; the user must authenticate.
    #[error("login required: {message}")]
    LoginRequired {
        /// Hint about which login is needed.
        message: String,
    },

    /// An authentication attempt failed.
    #[error("login failed: {message}")]
    LoginFailed {
        /// Description of the failure.
        message: String,
    },

    /// The requested operation is not supported by the active backend.
    #[error("{operation} is not implemented for this context type")]
    NotImplemented {
        /// Name of the unsupported operation.
        operation: &'static str,
    },

    /// The operation was canceled before completion.
    #[error("operation canceled")]
    Canceled,

    /// A conversion from the Compose model to the backend model failed.
    #[error("{message}")]
    Conversion {
        /// Description of the unsupported or inconsistent declaration.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An HTTP request failed before a response was obtained.
    #[error("HTTP request failed: {source}")]
    Http {
        /// Underlying transport error.
        #[from]
        source: reqwest::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl NimbusError {
    /// Builds a conversion error from a displayable message.
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
        }
    }

    /// Maps the error to the CLI process exit code.
    ///
    /// The taxonomy is deliberately small: scripts only ever branch on
    /// login-required, not-implemented, and cancellation.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::LoginRequired { .. } => 3,
            Self::NotImplemented { .. } => 4,
            Self::Canceled => 130,
            _ => 1,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, NimbusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_required_maps_to_dedicated_exit_code() {
        let err = NimbusError::LoginRequired {
            message: "run nimbus login".into(),
        };
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn not_implemented_maps_to_dedicated_exit_code() {
        let err = NimbusError::NotImplemented { operation: "up" };
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn canceled_maps_to_sigint_convention() {
        assert_eq!(NimbusError::Canceled.exit_code(), 130);
    }

    #[test]
    fn other_errors_map_to_generic_failure() {
        let err = NimbusError::NotFound {
            kind: "context",
            id: "prod".into(),
        };
        assert_eq!(err.exit_code(), 1);
    }
}
