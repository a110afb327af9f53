//! Incoming bridge request.
//!
//! Built once at ingress and shared by reference count between the
//! middleware chain and the method call. Cloning a [`Request`] is one atomic
//! increment.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde_json::Value;

/// Per-request metadata attached at ingress.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Bind {
    /// Request id, with the configured prefix applied.
    pub id: String,
    /// Milliseconds since the Unix epoch when the request arrived.
    pub timestamp: u64,
    /// Client address: first `X-Forwarded-For` entry, else the peer address.
    pub ip: String,
}

/// An incoming request routed to a bridge.
#[derive(Clone, Debug)]
pub struct Request {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Bytes,
    args: Value,
    method_name: String,
    bind: Bind,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        path: String,
        headers: HeaderMap,
        body: Bytes,
        args: Value,
        method_name: String,
        bind: Bind,
    ) -> Self {
        Self {
            inner: Arc::new(Inner { method, path, headers, body, args, method_name, bind }),
        }
    }

    /// HTTP verb of the request.
    pub fn method(&self) -> &Method { &self.inner.method }
    /// Full request path, base path included.
    pub fn path(&self) -> &str { &self.inner.path }
    pub fn headers(&self) -> &HeaderMap { &self.inner.headers }
    /// Raw body bytes, exactly as received.
    pub fn body(&self) -> &[u8] { &self.inner.body }
    /// Parsed JSON body. An empty body parses as `{}`.
    pub fn args(&self) -> &Value { &self.inner.args }
    /// Bridge method name: the last `/` segment of the path.
    pub fn method_name(&self) -> &str { &self.inner.method_name }
    pub fn bind(&self) -> &Bind { &self.inner.bind }

    /// Header lookup by name. Returns `None` for missing or non-UTF-8 values.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name)?.to_str().ok()
    }
}

#[cfg(test)]
impl Request {
    /// A request for `name` with the given headers and args, for unit tests.
    pub(crate) fn for_test(name: &str, headers: HeaderMap, args: Value) -> Self {
        Self::new(
            Method::POST,
            format!("/bridge/{name}"),
            headers,
            Bytes::new(),
            args,
            name.to_owned(),
            Bind { id: "1".to_owned(), timestamp: 0, ip: "127.0.0.1".to_owned() },
        )
    }
}
