//! # Error Handling Module
//!
//! This module provides error handling for flowgate using the `thiserror` crate.
//! It defines the error types that can occur during configuration refresh and
//! request dispatch, and maps them to HTTP status codes where a response is
//! user-visible.
//!
//! The two failure domains are deliberately isolated:
//! - Configuration-time errors (`UnknownPredicate`, `Bind`, `Compile`) are fatal
//!   to a single refresh attempt only. The previously published snapshot keeps
//!   serving traffic, and the error is surfaced to the operator via logs.
//! - Request-time outcomes never touch the snapshot or the engine rule set.
//!   A denied admission check is a routine control signal, not an error, and is
//!   represented by `AdmissionDecision::Blocked` rather than a variant here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout flowgate
///
/// Type alias so call sites can write `FlowgateResult<T>` instead of
/// `Result<T, FlowgateError>`.
pub type FlowgateResult<T> = Result<T, FlowgateError>;

/// Error types for flowgate
///
/// Each variant represents a different category of failure. The `#[error("...")]`
/// attribute from `thiserror` implements `Display` with the given message.
#[derive(Debug, Error, Clone)]
pub enum FlowgateError {
    /// Configuration-related errors (invalid config structure, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Failure to parse a configuration document or a compact predicate string
    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    /// A route references a predicate name that is not registered
    #[error("Unable to find route predicate factory with name '{name}'")]
    UnknownPredicate { name: String },

    /// Binding raw predicate arguments onto a typed config failed
    #[error("Failed to bind predicate '{predicate}': {message}")]
    Bind { predicate: String, message: String },

    /// Route compilation failed; wraps the underlying lookup or bind failure
    ///
    /// Carries the index of the offending route so the operator can find it in
    /// the declared route list. Compilation is all-or-nothing: one `Compile`
    /// error aborts the whole refresh.
    #[error("Failed to compile route at index {route_index}: {source}")]
    Compile {
        route_index: usize,
        #[source]
        source: Box<FlowgateError>,
    },

    /// I/O errors (config file reads, watcher setup, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Internal errors for unexpected failures
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FlowgateError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a parse error with a custom message
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::ConfigParse {
            message: message.into(),
        }
    }

    /// Create an unknown-predicate error
    pub fn unknown_predicate<S: Into<String>>(name: S) -> Self {
        Self::UnknownPredicate { name: name.into() }
    }

    /// Create a bind error attached to a predicate name
    pub fn bind<S: Into<String>, M: Into<String>>(predicate: S, message: M) -> Self {
        Self::Bind {
            predicate: predicate.into(),
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap an error as a compile failure for the route at `route_index`
    pub fn compile(route_index: usize, source: FlowgateError) -> Self {
        Self::Compile {
            route_index,
            source: Box::new(source),
        }
    }

    /// Get the appropriate HTTP status code for this error
    ///
    /// Configuration-class errors are operator-facing; they only surface on the
    /// admin/demo surface and therefore map to 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigParse { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UnknownPredicate { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Bind { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Compile { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Implement conversion from std::io::Error
impl From<std::io::Error> for FlowgateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_yaml::Error
impl From<serde_yaml::Error> for FlowgateError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ConfigParse {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_json::Error
impl From<serde_json::Error> for FlowgateError {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigParse {
            message: err.to_string(),
        }
    }
}

/// Convert errors into HTTP responses for the admin/demo surface
///
/// Request-path outcomes never go through this conversion; a blocked request is
/// answered with the fixed 429 response in the middleware layer.
impl IntoResponse for FlowgateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}
