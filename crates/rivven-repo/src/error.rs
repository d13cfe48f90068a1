//! Error types for rivven-repo
//!
//! Errors are classified so the retry engine can tell them apart:
//! - Transient faults (connection loss, statement/lock timeout, deadlock) are retried
//! - Permanent faults (constraint, syntax, permission) surface immediately
//! - Validation and configuration errors fail before any I/O and are never retried

use std::fmt;
use thiserror::Error;

/// Result type for rivven-repo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (transient)
    Connection,
    /// Query execution errors
    Query,
    /// Transaction errors
    Transaction,
    /// Constraint violation (permanent)
    Constraint,
    /// Type conversion errors (permanent)
    TypeConversion,
    /// Statement timeout (transient)
    Timeout,
    /// Deadlock victim (transient)
    Deadlock,
    /// Lock request timed out (transient)
    LockTimeout,
    /// Authentication failure
    Authentication,
    /// Permission denied (permanent)
    Permission,
    /// Syntax or unknown object (permanent)
    Syntax,
    /// Configuration error (fatal)
    Configuration,
    /// Caller input rejected before any I/O
    Validation,
    /// Operation cancelled by the caller
    Cancelled,
    /// Operation not supported by the backend
    Unsupported,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are expected to clear up on retry
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(
            self,
            Self::Connection | Self::Timeout | Self::Deadlock | Self::LockTimeout
        )
    }
}

/// Main error type for rivven-repo
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed or was lost
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    ///
    /// The SQL text is kept for diagnostics but never rendered by `Display`.
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transaction error
    #[error("transaction error: {message}")]
    Transaction { message: String },

    /// Constraint violation (PK, FK, unique, check, not null)
    #[error("constraint violation: {message}")]
    Constraint { code: i32, message: String },

    /// Value could not be converted to the requested type
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// Statement timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Chosen as deadlock victim
    #[error("deadlock detected")]
    Deadlock,

    /// Lock request timed out
    #[error("lock timeout: {message}")]
    LockTimeout { message: String },

    /// Authentication failed
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// Permission denied on an object
    #[error("permission denied: {message}")]
    Permission { message: String },

    /// Syntax error or invalid object/column reference
    #[error("syntax error: {message}")]
    Syntax { code: i32, message: String },

    /// Configuration error (e.g. missing connection string)
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Caller-supplied argument rejected before any I/O
    #[error("invalid argument '{field}': {message}")]
    Validation { field: String, message: String },

    /// Cancelled through the caller's cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Unsupported operation for this backend
    #[error("unsupported: {message}")]
    Unsupported { message: String },

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },

    /// A failure annotated with the repository operation that produced it
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Operation {
        operation: String,
        target: Option<&'static str>,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Get the error category
    ///
    /// Annotated errors report the category of the underlying fault.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Constraint { .. } => ErrorCategory::Constraint,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Deadlock => ErrorCategory::Deadlock,
            Self::LockTimeout { .. } => ErrorCategory::LockTimeout,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Permission { .. } => ErrorCategory::Permission,
            Self::Syntax { .. } => ErrorCategory::Syntax,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Unsupported { .. } => ErrorCategory::Unsupported,
            Self::Internal { .. } => ErrorCategory::Other,
            Self::Operation { source, .. } => source.category(),
        }
    }

    /// Whether this error is a transient fault worth retrying
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether this error will recur identically on retry
    #[inline]
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Whether this error is (or wraps) a cancellation
    pub fn is_cancelled(&self) -> bool {
        self.category() == ErrorCategory::Cancelled
    }

    /// Name of the repository operation, if annotated
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::Operation { operation, .. } => Some(operation),
            _ => None,
        }
    }

    /// Number of attempts made before this error surfaced (1 if not annotated)
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Operation { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    /// The innermost fault, skipping operation annotations
    pub fn root(&self) -> &Error {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// SQL text attached to the underlying query error, if any
    pub fn sql(&self) -> Option<&str> {
        match self.root() {
            Self::Query { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    /// Annotate this error with the operation name and attempt count
    pub fn in_operation(self, operation: impl Into<String>, attempts: u32) -> Self {
        match self {
            Self::Cancelled => Self::Cancelled,
            Self::Operation {
                operation,
                target,
                source,
                ..
            } => Self::Operation {
                operation,
                target,
                attempts,
                source,
            },
            other => Self::Operation {
                operation: operation.into(),
                target: None,
                attempts,
                source: Box::new(other),
            },
        }
    }

    /// Attach the target record type to an annotated error
    pub fn with_target(self, target: &'static str) -> Self {
        match self {
            Self::Operation {
                operation,
                attempts,
                source,
                ..
            } => Self::Operation {
                operation,
                target: Some(target),
                attempts,
                source,
            },
            other => other,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a validation error for the named argument
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Transaction => write!(f, "transaction"),
            Self::Constraint => write!(f, "constraint"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Timeout => write!(f, "timeout"),
            Self::Deadlock => write!(f, "deadlock"),
            Self::LockTimeout => write!(f, "lock_timeout"),
            Self::Authentication => write!(f, "authentication"),
            Self::Permission => write!(f, "permission"),
            Self::Syntax => write!(f, "syntax"),
            Self::Configuration => write!(f, "configuration"),
            Self::Validation => write!(f, "validation"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Other => write!(f, "other"),
        }
    }
}
