//! Error handling for the registrar service.
//!
//! This module provides:
//! - The stable error-kind taxonomy carried on outcome messages
//! - `AuthError` with source chaining and severity-aware logging
//! - Conversions from the store and serialization layers
//!
//! Every per-message failure is recovered at the handling-task boundary and
//! converted into a correlated outcome envelope; nothing in this module
//! panics or unwinds past a handler.

use std::borrow::Cow;
use std::fmt;

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

/// A specialized Result type for registrar operations.
pub type Result<T> = std::result::Result<T, AuthError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Kinds
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error kinds carried on outcome messages.
///
/// The wire codes are stable; the requester matches on them programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Infrastructural or decoding failure; not the requester's fault.
    Internal,
    /// Uniqueness violation on the username index; retrying cannot succeed.
    DuplicateUsername,
}

impl ErrorKind {
    /// Stable integer code used in the `error_code` field of outcome messages.
    pub const fn wire_code(&self) -> i16 {
        match self {
            Self::Internal => 1,
            Self::DuplicateUsername => 2,
        }
    }

    /// Whether a retry of the failed operation could change the outcome.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the registrar service.
#[derive(Error, Debug)]
pub struct AuthError {
    /// Machine-readable error kind
    kind: ErrorKind,

    /// Message safe to place on an outcome envelope
    message: Cow<'static, str>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl AuthError {
    /// Create a new error with kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        let err = Self {
            kind,
            message: message.into(),
            source: None,
        };
        err.record_metrics();
        err
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Create a duplicate-username error.
    pub fn duplicate_username(username: impl AsRef<str>) -> Self {
        Self::new(
            ErrorKind::DuplicateUsername,
            format!("username already registered: {}", username.as_ref()),
        )
    }

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the message placed on outcome envelopes.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the stable wire code for this error.
    pub fn wire_code(&self) -> i16 {
        self.kind.wire_code()
    }

    /// Log this error with severity appropriate to its kind.
    pub fn log(&self) {
        match self.kind {
            ErrorKind::Internal => {
                error!(
                    kind = %self.kind,
                    message = %self.message,
                    source = ?self.source,
                    "registration pipeline error"
                );
            }
            ErrorKind::DuplicateUsername => {
                warn!(kind = %self.kind, message = %self.message, "registration rejected");
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "registrar_errors_total",
            "kind" => self.kind.to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for AuthError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &error {
            // The store's unique index is the only uniqueness enforcement;
            // a violated username constraint is the requester's error, every
            // other store failure is ours.
            let constraint = db_err.constraint().map(str::to_string);
            if let Some(constraint) = constraint {
                if constraint.contains("username") {
                    return Self::new(
                        ErrorKind::DuplicateUsername,
                        "username already registered",
                    )
                    .with_source(error);
                }
                return Self::internal(format!("constraint violation: {constraint}"))
                    .with_source(error);
            }
        }

        Self::internal(error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::internal(format!("payload decoding failed: {error}")).with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
