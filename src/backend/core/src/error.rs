//! Error handling for Strand Core.
//!
//! Every failure surfaced by the store or the command pipeline is a
//! [`StrandError`] carrying a stable [`ErrorCode`]. Codes fall into one of
//! four classes, which is what callers branch on:
//!
//! - [`ErrorClass::Concurrency`]: the writer's expected version was stale.
//!   Reload the aggregate, re-validate, and try again.
//! - [`ErrorClass::Validation`]: the command was rejected by a business rule
//!   or the request was malformed. Never retried.
//! - [`ErrorClass::Storage`]: the engine or the connection failed. Reads are
//!   retried internally for transient codes; writes never are.
//! - [`ErrorClass::Internal`]: configuration problems, cancellation, bugs.
//!
//! # Usage
//!
//! ```rust,ignore
//! use strand_core::error::{ErrorClass, StrandError};
//!
//! match handler.handle(command).await {
//!     Ok(outcome) => { /* ... */ }
//!     Err(e) if e.class() == ErrorClass::Concurrency => { /* reload and retry */ }
//!     Err(e) => return Err(e),
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::events::postgres::{AGGREGATE_VERSION_CONSTRAINT, EVENT_ID_CONSTRAINT};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Strand operations.
pub type Result<T> = std::result::Result<T, StrandError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Concurrency Errors (1000-1099)
    ConcurrencyConflict,

    // Validation Errors (1100-1199)
    ValidationError,
    InvalidInput,
    InvalidStateTransition,
    AggregateNotFound,
    AggregateAlreadyExists,
    DuplicateEvent,

    // Storage Errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseQueryFailed,
    DatabaseTransactionFailed,
    OperationTimedOut,
    CorruptHistory,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    Cancelled,
    InternalError,
}

/// The coarse taxonomy callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Expected version did not match; safe to retry after reloading.
    Concurrency,
    /// Business-rule or input rejection; never retried.
    Validation,
    /// Engine or connectivity fault.
    Storage,
    /// Configuration, cancellation, or a bug.
    Internal,
}

impl ErrorClass {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Concurrency => "concurrency",
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::ConcurrencyConflict => 1000,

            Self::ValidationError => 1100,
            Self::InvalidInput => 1101,
            Self::InvalidStateTransition => 1102,
            Self::AggregateNotFound => 1103,
            Self::AggregateAlreadyExists => 1104,
            Self::DuplicateEvent => 1105,

            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::DatabaseQueryFailed => 2002,
            Self::DatabaseTransactionFailed => 2003,
            Self::OperationTimedOut => 2004,
            Self::CorruptHistory => 2005,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::Cancelled => 9000,
            Self::InternalError => 9001,
        }
    }

    /// Get the class this code belongs to.
    pub const fn class(&self) -> ErrorClass {
        match self.numeric_code() {
            1000..=1099 => ErrorClass::Concurrency,
            1100..=1199 => ErrorClass::Validation,
            2000..=2299 => ErrorClass::Storage,
            _ => ErrorClass::Internal,
        }
    }

    /// Check if this error is transient and a read may be retried.
    ///
    /// Concurrency conflicts are deliberately excluded: the store never
    /// retries them, the caller does after reloading state.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseConnectionFailed
                | Self::DatabaseTransactionFailed
                | Self::OperationTimedOut
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Rejected input or business rules
    Low,
    /// Expected operational outcomes (races, timeouts, cancellation)
    Medium,
    /// Storage and data faults
    High,
    /// Loss of connectivity or internal bugs
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError
            | ErrorCode::InvalidInput
            | ErrorCode::InvalidStateTransition
            | ErrorCode::AggregateNotFound
            | ErrorCode::AggregateAlreadyExists
            | ErrorCode::DuplicateEvent => Self::Low,

            ErrorCode::ConcurrencyConflict
            | ErrorCode::OperationTimedOut
            | ErrorCode::DatabaseTransactionFailed
            | ErrorCode::Cancelled => Self::Medium,

            ErrorCode::DatabaseError
            | ErrorCode::DatabaseQueryFailed
            | ErrorCode::CorruptHistory
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::DatabaseConnectionFailed | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related aggregate ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<String>,

    /// Related aggregate type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_type: Option<String>,

    /// Version the writer expected (concurrency conflicts only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<i64>,

    /// Version found in the store (concurrency conflicts only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_version: Option<i64>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_aggregate(
        mut self,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
    ) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    pub fn with_versions(mut self, expected: i64, actual: i64) -> Self {
        self.expected_version = Some(expected);
        self.actual_version = Some(actual);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Strand Core.
#[derive(Error, Debug)]
pub struct StrandError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Message safe to show to the caller
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for StrandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl StrandError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create an invalid input error (malformed request, not a business rule).
    pub fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        Self::new(
            ErrorCode::Cancelled,
            format!("Operation cancelled: {}", operation),
        )
        .with_context("operation", operation)
    }

    /// Create a transient storage error (connection lost, server restarting).
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::DatabaseConnectionFailed,
            "The event store is unavailable",
            message,
        )
    }

    /// Create a non-transient storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::DatabaseError, "An event store error occurred", message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Replace error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the error class.
    pub fn class(&self) -> ErrorClass {
        self.code.class()
    }

    /// Get the user-facing message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Check if a read failing with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// True for stale-version failures.
    pub fn is_concurrency_conflict(&self) -> bool {
        self.class() == ErrorClass::Concurrency
    }

    /// True for business-rule and input rejections.
    pub fn is_validation(&self) -> bool {
        self.class() == ErrorClass::Validation
    }

    /// True for engine and connectivity faults.
    pub fn is_storage(&self) -> bool {
        self.class() == ErrorClass::Storage
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    ///
    /// Concurrency conflicts log at warn and storage faults at error, so a
    /// burst of races is never mistaken for an outage.
    pub fn log(&self) {
        let code = self.code.to_string();
        let class = self.class().as_str();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    class = class,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    class = class,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    class = class,
                    user_message = %self.user_message,
                    details = ?self.details,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    class = class,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "strand_errors_total",
            "code" => self.code.to_string(),
            "class" => self.class().as_str(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Wrap the error with a specific code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| StrandError::new(code, e.to_string()).with_source(e))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for StrandError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::Database(db_err) => {
                let sqlstate = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
                match db_err.constraint() {
                    // The last line of defense against two writers claiming the
                    // same version: surface it as the race it is.
                    Some(AGGREGATE_VERSION_CONSTRAINT) => {
                        counter!("strand_append_conflicts_total").increment(1);
                        return Self::with_internal(
                            ErrorCode::ConcurrencyConflict,
                            "Another writer appended to this aggregate first",
                            db_err.message().to_string(),
                        )
                        .with_source(error);
                    }
                    Some(EVENT_ID_CONSTRAINT) => {
                        return Self::with_internal(
                            ErrorCode::DuplicateEvent,
                            "An event with this id has already been stored",
                            db_err.message().to_string(),
                        )
                        .with_source(error);
                    }
                    _ => {}
                }
                match sqlstate.as_str() {
                    // serialization_failure, deadlock_detected
                    "40001" | "40P01" => (
                        ErrorCode::DatabaseTransactionFailed,
                        "The database transaction could not complete",
                    ),
                    // connection exceptions, admin/crash shutdown
                    s if s.starts_with("08") || s.starts_with("57P") => (
                        ErrorCode::DatabaseConnectionFailed,
                        "Unable to connect to the event store",
                    ),
                    _ => (ErrorCode::DatabaseQueryFailed, "An event store query failed"),
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the event store",
            ),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => (
                ErrorCode::DeserializationError,
                "Stored event data could not be decoded",
            ),
            _ => (ErrorCode::DatabaseError, "An event store error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<sqlx::migrate::MigrateError> for StrandError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::with_internal(
            ErrorCode::DatabaseError,
            "Failed to apply event store migrations",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<serde_json::Error> for StrandError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for StrandError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(
            ErrorCode::OperationTimedOut,
            "Event store operation timed out",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<config::ConfigError> for StrandError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl StrandError {
    /// The aggregate's version moved past what the writer read.
    pub fn concurrency_conflict(aggregate_id: impl fmt::Display, expected: i64, actual: i64) -> Self {
        counter!("strand_append_conflicts_total").increment(1);
        Self::new(
            ErrorCode::ConcurrencyConflict,
            format!(
                "Concurrency conflict on aggregate {}: expected version {}, found {}",
                aggregate_id, expected, actual
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_versions(expected, actual)
                .with_context("aggregate_id", aggregate_id.to_string()),
        )
    }

    /// Create an aggregate not found error.
    pub fn aggregate_not_found(aggregate_type: &str, aggregate_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::AggregateNotFound,
            format!("{} not found: {}", aggregate_type, aggregate_id),
        )
        .with_details(ErrorDetails::new().with_aggregate(aggregate_type, aggregate_id.to_string()))
    }

    /// Create an aggregate already exists error.
    pub fn aggregate_already_exists(aggregate_type: &str, aggregate_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::AggregateAlreadyExists,
            format!("{} already exists: {}", aggregate_type, aggregate_id),
        )
        .with_details(ErrorDetails::new().with_aggregate(aggregate_type, aggregate_id.to_string()))
    }

    /// Create an invalid state transition error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidStateTransition, message.into())
    }

    /// The event history handed to replay is not a contiguous version run.
    pub fn corrupt_history(aggregate_id: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::CorruptHistory,
            format!("Event history for aggregate {} is inconsistent", aggregate_id),
            message,
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
