//! Error types.
//!
//! Two layers, kept apart on purpose:
//!
//! - [`Error`] surfaces infrastructure failures: binding to a port or
//!   accepting a connection. It never reaches a caller over HTTP.
//! - [`BridgeError`] is what a method or middleware fails with. The
//!   dispatcher maps every variant onto an HTTP status, so a failing request
//!   never takes the server down with it.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error type returned by the server's fallible operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ── Validation ────────────────────────────────────────────────────────────────

/// One failed check inside a [`ValidationError`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Issue {
    /// Location of the offending value, outermost key first.
    pub path: Vec<String>,
    pub message: String,
}

impl Issue {
    pub fn new<P, S>(path: P, message: impl Into<String>) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            message: message.into(),
        }
    }
}

/// Structured argument validation failure: an ordered list of [`Issue`]s.
///
/// Only the first issue is ever shown to the client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationError {
    issues: Vec<Issue>,
}

impl ValidationError {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self { issues }
    }

    /// Shorthand for a validation error with exactly one issue.
    pub fn single<P, S>(path: P, message: impl Into<String>) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(vec![Issue::new(path, message)])
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// `"<path joined by '/'>: <message>"` for the first issue, or just the
    /// message when its path is empty.
    pub(crate) fn client_message(&self) -> String {
        let Some(first) = self.issues.first() else {
            return "Invalid request".to_owned();
        };
        let key_path = first.path.join("/");
        if key_path.is_empty() {
            first.message.clone()
        } else {
            format!("{key_path}: {}", first.message)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed: {}", self.client_message())?;
        if self.issues.len() > 1 {
            write!(f, " (+{} more)", self.issues.len() - 1)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

// ── BridgeError ──────────────────────────────────────────────────────────────

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a single bridge call.
///
/// | Variant      | Status                    | Body                  |
/// |--------------|---------------------------|-----------------------|
/// | `Validation` | 400                       | first issue, as text  |
/// | `NotFound`   | 404 (or 400, configurable)| `{"error": message}`  |
/// | `Failed`     | 500                       | `{"error": message}`  |
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl BridgeError {
    /// A generic failure carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed { message: message.into(), source: None }
    }

    /// A generic failure wrapping another error. The client sees the error's
    /// `Display`; the server log keeps the whole value.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

impl From<&str> for BridgeError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

impl From<String> for BridgeError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::other(err)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::other(err)
    }
}
