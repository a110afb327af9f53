//! Method and middleware traits, and their type erasure.
//!
//! # How async functions are stored
//!
//! A bridge holds functions of *different* types in a single
//! `HashMap<String, BoxedMethod>`, and middleware of different types in a
//! single `Vec`. Rust collections hold one concrete type, so each function
//! is hidden behind a trait object and stored uniformly:
//!
//! ```text
//! async fn fetch(args: Value, ctx: Context) -> Result<User, BridgeError>   ← user writes this
//!        ↓ Bridge::new().method("user.fetch", fetch)
//! fetch.into_boxed_method()                                               ← Method blanket impl
//!        ↓
//! Arc::new(FnMethod(fetch))                                               ← heap-allocated wrapper
//!        ↓  stored as BoxedMethod = Arc<dyn ErasedMethod>
//! method.call(args, ctx)  at request time                                 ← one vtable dispatch
//!        ↓
//! Box::pin(async { serde_json::to_value(fetch(args, ctx).await?) })       ← BoxFuture
//! ```
//!
//! Middleware follow the same path through [`Middleware`] and
//! `BoxedMiddleware`.
//!
//! A panic inside a method or middleware, whether while building the future
//! or while polling it, is caught here and surfaces as a
//! [`BridgeError::Failed`], so the caller gets a `500` instead of a dropped
//! connection.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;

use crate::error::BridgeError;
use crate::middleware::{IntoMiddlewareResult, MiddlewareResult};
use crate::request::Request;
use crate::Context;

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` let tokio move the future across worker threads.
pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Internal dispatch interface for bridge methods.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public [`Method`] trait.
#[doc(hidden)]
pub trait ErasedMethod {
    fn call(&self, args: Value, context: Context) -> BoxFuture<Result<Value, BridgeError>>;
}

#[doc(hidden)]
pub type BoxedMethod = Arc<dyn ErasedMethod + Send + Sync + 'static>;

/// Internal dispatch interface for middleware.
#[doc(hidden)]
pub trait ErasedMiddleware {
    fn call(&self, req: Request) -> BoxFuture<Result<MiddlewareResult, BridgeError>>;
}

#[doc(hidden)]
pub type BoxedMiddleware = Arc<dyn ErasedMiddleware + Send + Sync + 'static>;

// ── Public traits ─────────────────────────────────────────────────────────────

/// Implemented for every valid bridge method.
///
/// Satisfied automatically by any function with the shape
///
/// ```text
/// async fn name(args: Value, context: Context) -> Result<impl Serialize, impl Into<BridgeError>>
/// ```
///
/// Returning `()` or `None` produces an empty `{}` response body.
///
/// Sealed: only the blanket impl below can satisfy it.
pub trait Method: private::Sealed<MethodMarker> + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_method(self) -> BoxedMethod;
}

/// Implemented for every valid middleware handler.
///
/// Satisfied automatically by any function with the shape
///
/// ```text
/// async fn name(req: Request) -> impl IntoMiddlewareResult
/// ```
///
/// `()`, `Context`, `Option<Context>`, [`MiddlewareResult`] and
/// `Result<_, impl Into<BridgeError>>` of any of them all qualify.
pub trait Middleware: private::Sealed<MiddlewareMarker> + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_middleware(self) -> BoxedMiddleware;
}

#[doc(hidden)]
pub enum MethodMarker {}
#[doc(hidden)]
pub enum MiddlewareMarker {}

/// The sealing module. `Sealed` is private, so external crates cannot
/// implement [`Method`] or [`Middleware`] on their own types.
mod private {
    pub trait Sealed<Kind> {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, T, E> private::Sealed<MethodMarker> for F
where
    F: Fn(Value, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Serialize + Send + 'static,
    E: Into<BridgeError> + Send + 'static,
{
}

impl<F, Fut, T, E> Method for F
where
    F: Fn(Value, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Serialize + Send + 'static,
    E: Into<BridgeError> + Send + 'static,
{
    fn into_boxed_method(self) -> BoxedMethod {
        Arc::new(FnMethod(self))
    }
}

impl<F, Fut, R> private::Sealed<MiddlewareMarker> for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoMiddlewareResult + Send + 'static,
{
}

impl<F, Fut, R> Middleware for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoMiddlewareResult + Send + 'static,
{
    fn into_boxed_middleware(self) -> BoxedMiddleware {
        Arc::new(FnMiddleware(self))
    }
}

// ── Concrete wrappers ─────────────────────────────────────────────────────────

struct FnMethod<F>(F);

impl<F, Fut, T, E> ErasedMethod for FnMethod<F>
where
    F: Fn(Value, Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Serialize + Send + 'static,
    E: Into<BridgeError> + Send + 'static,
{
    fn call(&self, args: Value, context: Context) -> BoxFuture<Result<Value, BridgeError>> {
        let fut = match panic::catch_unwind(AssertUnwindSafe(|| (self.0)(args, context))) {
            Ok(fut) => fut,
            Err(payload) => return Box::pin(std::future::ready(Err(panicked(payload)))),
        };
        Box::pin(async move {
            let value = AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .map_err(panicked)?
                .map_err(Into::<BridgeError>::into)?;
            Ok(serde_json::to_value(value)?)
        })
    }
}

struct FnMiddleware<F>(F);

impl<F, Fut, R> ErasedMiddleware for FnMiddleware<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoMiddlewareResult + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<Result<MiddlewareResult, BridgeError>> {
        let fut = match panic::catch_unwind(AssertUnwindSafe(|| (self.0)(req))) {
            Ok(fut) => fut,
            Err(payload) => return Box::pin(std::future::ready(Err(panicked(payload)))),
        };
        Box::pin(async move {
            AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .map_err(panicked)?
                .into_middleware_result()
        })
    }
}

/// Turns a panic payload into the error sent back to the caller. `panic!`
/// payloads are a `&str` or a `String`; anything else gets a fixed message.
fn panicked(payload: Box<dyn Any + Send>) -> BridgeError {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause");
    BridgeError::msg(format!("handler panicked: {detail}"))
}
