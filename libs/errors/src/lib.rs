//! Unified error handling for leasekit
//!
//! A single taxonomy shared by the store backends, the lock manager, the
//! stampede-guarded cache and the rate limiters. "Not acquired" and
//! "cache miss" are normal outcomes and are modelled as `bool` / `Option`
//! by the operations themselves; they only become errors where an
//! operation cannot proceed without them.

use thiserror::Error;

// ============================================================================
// LeaseError - Main error type
// ============================================================================

/// Main error type for all leasekit components
#[derive(Debug, Error)]
pub enum LeaseError {
    // ======================================
    // Lock Ownership Errors
    // ======================================
    /// The resource is held by another token.
    #[error("Lock not acquired: {resource} is held by another holder")]
    NotAcquired { resource: String },

    /// Release/renew was attempted with a token that no longer holds the lock.
    #[error("Lock not held: {resource} (lease expired or already released)")]
    NotHeld { resource: String },

    // ======================================
    // Store Errors
    // ======================================
    /// Any transport or backend failure, whatever the store.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    // ======================================
    // Cache Errors
    // ======================================
    /// The population lock could not be taken and no entry appeared meanwhile.
    #[error("Contended: no cached value for {key} and population lock is busy")]
    Contended { key: String },

    #[error("Loader failed: {0:#}")]
    LoaderFailed(anyhow::Error),

    // ======================================
    // Caller Errors
    // ======================================
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid argument: {param}: {reason}")]
    InvalidArgument { param: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using LeaseError
pub type LeaseResult<T> = Result<T, LeaseError>;

impl LeaseError {
    /// Create a store-unavailable error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(param: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            param: param.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-held error
    pub fn not_held(resource: impl Into<String>) -> Self {
        Self::NotHeld {
            resource: resource.into(),
        }
    }

    /// Stable error code for logs and CLI output
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotAcquired { .. } => "NOT_ACQUIRED",
            Self::NotHeld { .. } => "NOT_HELD",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Contended { .. } => "CONTENDED",
            Self::LoaderFailed(_) => "LOADER_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    /// Error category (for classification)
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotAcquired { .. } | Self::NotHeld { .. } => ErrorCategory::Ownership,
            Self::StoreUnavailable(_) => ErrorCategory::Store,
            Self::Contended { .. } => ErrorCategory::ResourceBusy,
            Self::LoaderFailed(_) => ErrorCategory::Loader,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::InvalidArgument { .. } => ErrorCategory::Validation,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the caller may reasonably retry the whole operation.
    ///
    /// Nothing in leasekit retries store errors internally; this is a hint
    /// for the caller's own policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Store | ErrorCategory::ResourceBusy | ErrorCategory::Ownership
        )
    }

    /// Suggested log level when reporting this error
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Store | ErrorCategory::Internal => Level::ERROR,
            ErrorCategory::Ownership | ErrorCategory::Loader | ErrorCategory::ResourceBusy => {
                Level::WARN
            },
            ErrorCategory::Cancelled => Level::DEBUG,
            ErrorCategory::Validation | ErrorCategory::Configuration => Level::INFO,
        }
    }
}

/// Error category enum - used for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Ownership,
    Store,
    ResourceBusy,
    Loader,
    Cancelled,
    Validation,
    Configuration,
    Internal,
}

// Conversion traits for common error types
impl From<serde_json::Error> for LeaseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for LeaseError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self::Serialization(format!("Invalid UTF-8: {}", err))
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::LeaseError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::LeaseError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! store_error {
    ($msg:expr) => {
        $crate::LeaseError::StoreUnavailable($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::LeaseError::StoreUnavailable(format!($fmt, $($arg)*))
    };
}

// Tests
#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LeaseError::not_held("order:42").error_code(),
            "NOT_HELD"
        );
        assert_eq!(
            LeaseError::Contended { key: "k".into() }.error_code(),
            "CONTENDED"
        );
        assert_eq!(LeaseError::Cancelled.error_code(), "CANCELLED");
    }

    #[test]
    fn test_error_retryable() {
        assert!(LeaseError::store("connection refused").is_retryable());
        assert!(LeaseError::Contended { key: "k".into() }.is_retryable());
        assert!(!LeaseError::Cancelled.is_retryable());
        assert!(!LeaseError::LoaderFailed(anyhow::anyhow!("boom")).is_retryable());
        assert!(!LeaseError::invalid_argument("lease", "must be > 0").is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = LeaseError::invalid_argument("resource_key", "must not be empty");
        assert_eq!(
            err.to_string(),
            "Invalid argument: resource_key: must not be empty"
        );

        let err = LeaseError::LoaderFailed(
            anyhow::anyhow!("db timeout").context("loading user 7"),
        );
        let msg = err.to_string();
        assert!(msg.contains("loading user 7"));
        assert!(msg.contains("db timeout"));
    }

    #[test]
    fn test_from_conversions() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: LeaseError = json_err.into();
        assert!(matches!(err, LeaseError::Serialization(_)));

        let err: LeaseError = anyhow::anyhow!("other").into();
        assert!(matches!(err, LeaseError::Other(_)));
        assert_eq!(err.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_macros() {
        let err = config_error!("lease_ms must be > {}", 0);
        assert!(matches!(err, LeaseError::Configuration(ref m) if m.contains("lease_ms")));

        let err = store_error!("pool exhausted");
        assert_eq!(err.category(), ErrorCategory::Store);
    }

    #[test]
    fn test_store_failures_share_one_variant() {
        for err in [
            LeaseError::store("connection refused"),
            store_error!("pool timed out after {}s", 5),
        ] {
            assert!(matches!(err, LeaseError::StoreUnavailable(_)));
            assert_eq!(err.error_code(), "STORE_UNAVAILABLE");
            assert_eq!(err.category(), ErrorCategory::Store);
            assert!(err.is_retryable());
        }
    }
}
