//! Unified error type for configuration, capture, discovery and the query API.
//!
//! `AppError` serializes as `{ "kind": "...", "message": "..." }` so the
//! dashboard can distinguish error categories, and converts directly into an
//! HTTP response at the API boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::ser::SerializeStruct;

/// Application-level error.
///
/// Each variant maps to a distinct failure domain.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Invalid, unreadable or unparseable configuration.
    #[error("{0}")]
    Config(String),

    /// The capture source could not be opened or failed while reading.
    #[error("{0}")]
    Capture(String),

    /// The container inventory could not be reached or returned garbage.
    #[error("{0}")]
    Discovery(String),

    /// A counter was credited for a service that was never ensured.
    /// Indicates a logic error upstream, never an environmental condition.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// I/O and OS-level errors (sockets, filesystem).
    #[error("{0}")]
    Io(String),
}

impl AppError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "Config",
            AppError::Capture(_) => "Capture",
            AppError::Discovery(_) => "Discovery",
            AppError::UnknownService(_) => "UnknownService",
            AppError::Io(_) => "Io",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(kind = self.kind(), "request failed: {self}");
        (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(self)).into_response()
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<bollard::errors::Error> for AppError {
    fn from(err: bollard::errors::Error) -> Self {
        AppError::Discovery(err.to_string())
    }
}
