//! Server configuration.
//!
//! Passed explicitly to [`App::with_config`](crate::App::with_config) and
//! read-only afterwards. All fields have defaults, so a partial document
//! deserialises:
//!
//! ```rust
//! use typed_bridge::{BridgeConfig, NotFoundStatus};
//!
//! let config: BridgeConfig = serde_json::from_str(r#"{
//!     "logs": { "request": false },
//!     "response_delay_ms": 250,
//!     "not_found": "bad_request"
//! }"#).unwrap();
//!
//! assert!(!config.logs.request);
//! assert!(config.logs.error);
//! assert_eq!(config.not_found, NotFoundStatus::BadRequest);
//! ```

use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub logs: LogConfig,

    /// Artificial delay applied to every request before it is dispatched.
    pub response_delay_ms: u64,

    /// Prepended to every request id (`"api-"` gives `api-1`, `api-2`, …).
    pub id_prefix: String,

    /// When `false`, the process exits with status 0 once shutdown finishes.
    /// When `true`, shutdown only stops the server and
    /// [`Server::serve`](crate::Server::serve) returns.
    pub graceful_shutdown: bool,

    /// Status used when the requested method does not exist.
    pub not_found: NotFoundStatus,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            logs: LogConfig::default(),
            response_delay_ms: 0,
            id_prefix: String::new(),
            graceful_shutdown: true,
            not_found: NotFoundStatus::default(),
        }
    }
}

impl BridgeConfig {
    pub fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms)
    }
}

/// Logging switches. Everything is on by default.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// One line per incoming request.
    pub request: bool,
    /// One line per finished response, with status and latency.
    pub response: bool,
    /// Log failed calls server-side before answering.
    pub error: bool,
    /// Attach the call arguments to error logs.
    pub args_on_error: bool,
    /// Attach the accumulated context to error logs.
    pub context_on_error: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            request: true,
            response: true,
            error: true,
            args_on_error: true,
            context_on_error: true,
        }
    }
}

/// How an unknown method name is answered. The body is
/// `{"error": "Bridge not found: <name>"}` either way.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundStatus {
    /// `404 Not Found`.
    #[default]
    NotFound,
    /// `400 Bad Request`, as older bridge servers answered.
    BadRequest,
}

impl NotFoundStatus {
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest => StatusCode::BAD_REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert!(config.logs.request && config.logs.response && config.logs.error);
        assert_eq!(config.response_delay(), Duration::ZERO);
        assert!(config.id_prefix.is_empty());
        assert!(config.graceful_shutdown);
        assert_eq!(config.not_found.status_code(), StatusCode::NOT_FOUND);
    }
}
