//! Middleware layer.
//!
//! Middleware run before a bridge method and are the place for cross-cutting
//! concerns: authentication-header inspection, tenant lookup, request
//! tagging. Each one is registered against a wildcard [`Pattern`] and runs
//! only for method names that pattern matches.
//!
//! A middleware answers with a [`MiddlewareResult`]:
//!
//! | Result       | Effect                                                         |
//! |--------------|----------------------------------------------------------------|
//! | `Next`       | continue with the next middleware, context unchanged           |
//! | `Context(c)` | shallow-merge `c` into the context (later keys win), continue  |
//! | `Stop(res)`  | send `res` right away; no further middleware, no method call   |
//!
//! Returning `Err` fails the request exactly like a failing method.

use crate::Context;
use crate::error::BridgeError;
use crate::handler::{BoxedMiddleware, Middleware};
use crate::pattern::Pattern;
use crate::response::{IntoResponse, Response};

// ── MiddlewareResult ──────────────────────────────────────────────────────────

/// What a middleware decided for the current request.
#[derive(Debug)]
pub enum MiddlewareResult {
    Next,
    Context(Context),
    Stop(Response),
}

impl MiddlewareResult {
    /// Ends the request with `res`; the bridge method is never called.
    pub fn stop(res: impl IntoResponse) -> Self {
        Self::Stop(res.into_response())
    }
}

/// Conversion into a [`MiddlewareResult`], used on middleware return values.
pub trait IntoMiddlewareResult {
    fn into_middleware_result(self) -> Result<MiddlewareResult, BridgeError>;
}

impl IntoMiddlewareResult for MiddlewareResult {
    fn into_middleware_result(self) -> Result<MiddlewareResult, BridgeError> { Ok(self) }
}

impl IntoMiddlewareResult for () {
    fn into_middleware_result(self) -> Result<MiddlewareResult, BridgeError> {
        Ok(MiddlewareResult::Next)
    }
}

impl IntoMiddlewareResult for Context {
    fn into_middleware_result(self) -> Result<MiddlewareResult, BridgeError> {
        Ok(MiddlewareResult::Context(self))
    }
}

impl IntoMiddlewareResult for Option<Context> {
    fn into_middleware_result(self) -> Result<MiddlewareResult, BridgeError> {
        Ok(self.map_or(MiddlewareResult::Next, MiddlewareResult::Context))
    }
}

impl<T, E> IntoMiddlewareResult for Result<T, E>
where
    T: IntoMiddlewareResult,
    E: Into<BridgeError>,
{
    fn into_middleware_result(self) -> Result<MiddlewareResult, BridgeError> {
        self.map_err(Into::into)?.into_middleware_result()
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

pub(crate) struct Entry {
    pub(crate) pattern: Pattern,
    pub(crate) handler: BoxedMiddleware,
}

/// Ordered list of pattern-scoped middleware.
///
/// Append-only while the bridge is being built; read-only once it serves.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub(crate) fn register(&mut self, pattern: &str, handler: impl Middleware) {
        self.entries.push(Entry {
            pattern: Pattern::new(pattern),
            handler: handler.into_boxed_middleware(),
        });
    }

    /// Entries whose pattern matches `name`, in registration order.
    pub(crate) fn matching<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Entry> + 'a {
        self.entries.iter().filter(move |e| e.pattern.matches(name))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
