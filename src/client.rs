//! Generic client for calling a bridge over HTTP.
//!
//! One entry point, [`BridgeClient::call`], taking the method name as a
//! string. Typed wrappers are left to the application:
//!
//! ```rust,no_run
//! # use serde::Deserialize;
//! # use serde_json::json;
//! # use typed_bridge::{BridgeClient, ClientError};
//! #[derive(Deserialize)]
//! struct User { id: u64, name: String }
//!
//! # async fn run() -> Result<(), ClientError> {
//! let client = BridgeClient::new("http://localhost:8080/bridge")
//!     .header("authorization", "Bearer 123");
//!
//! let user: User = client.call("user.fetch", &json!({ "id": 1 })).await?;
//!
//! // Inspect every raw response, e.g. to pick up a refreshed token.
//! let client = client.on_response(|res| {
//!     if let Some(token) = res.headers().get("x-refresh-token") {
//!         println!("new token: {token:?}");
//!     }
//! });
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure of a remote bridge call.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-2xx status. `body` is the raw response
    /// text: `{"error": …}` JSON or a plain-text validation message.
    #[error("bridge call failed with {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("invalid header `{0}`")]
    InvalidHeader(String),
}

type ResponseHook = Arc<dyn Fn(&reqwest::Response) + Send + Sync + 'static>;

/// HTTP client bound to one bridge base URL.
#[derive(Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    host: String,
    headers: HeaderMap,
    invalid_header: Option<String>,
    on_response: Option<ResponseHook>,
}

impl fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeClient")
            .field("host", &self.host)
            .field("headers", &self.headers)
            .field("on_response", &self.on_response.is_some())
            .finish_non_exhaustive()
    }
}

impl BridgeClient {
    /// `host` is the bridge base URL, e.g. `http://localhost:8080/bridge`.
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), host)
    }

    /// Like [`new`](BridgeClient::new), reusing an existing reqwest client.
    pub fn with_client(http: reqwest::Client, host: impl Into<String>) -> Self {
        let mut host = host.into();
        if !host.ends_with('/') {
            host.push('/');
        }
        Self { http, host, headers: HeaderMap::new(), invalid_header: None, on_response: None }
    }

    /// Adds a header sent with every call. An invalid name or value is
    /// reported by the next [`call`](BridgeClient::call).
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => self.invalid_header = Some(name.to_owned()),
        }
        self
    }

    /// Registers a callback that sees every raw response (status, headers)
    /// before it is decoded, successful or not. A later call replaces an
    /// earlier one.
    pub fn on_response(mut self, hook: impl Fn(&reqwest::Response) + Send + Sync + 'static) -> Self {
        self.on_response = Some(Arc::new(hook));
        self
    }

    /// POSTs `args` as JSON to `<host>/<method>` and decodes the JSON reply.
    pub async fn call<A, R>(&self, method: &str, args: &A) -> Result<R, ClientError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        if let Some(name) = &self.invalid_header {
            return Err(ClientError::InvalidHeader(name.clone()));
        }

        let res = self
            .http
            .post(format!("{}{method}", self.host))
            .headers(self.headers.clone())
            .json(args)
            .send()
            .await?;

        if let Some(hook) = &self.on_response {
            hook(&res);
        }

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await?;
            return Err(ClientError::Remote { status: status.as_u16(), body });
        }
        Ok(res.json().await?)
    }
}
