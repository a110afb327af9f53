//! Per-request dispatch: resolve, run middleware, call, map the outcome.
//!
//! ```text
//! method name ─► lookup ─► middleware (in order) ─► method(args, context) ─► 200 JSON
//!      │            │            │                          │
//!      └─ empty ────┴─ absent ───┼─ Stop(res) ─► res        └─ Err ─► 400 / 500
//!         NotFound     NotFound  └─ Err ─► 400 / 500
//! ```
//!
//! Nothing escapes [`Dispatcher::handle`]: every failure becomes a response,
//! including a panic in a method or middleware (caught in `handler`).

use std::sync::Arc;

use http::StatusCode;
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::Context;
use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::middleware::MiddlewareResult;
use crate::request::Request;
use crate::response::Response;

pub(crate) struct Dispatcher {
    bridge: Bridge,
    config: Arc<BridgeConfig>,
}

impl Dispatcher {
    pub(crate) fn new(bridge: Bridge, config: Arc<BridgeConfig>) -> Self {
        Self { bridge, config }
    }

    pub(crate) async fn handle(&self, req: Request) -> Response {
        let mut context = Context::new();
        match self.dispatch(&req, &mut context).await {
            Ok(res) => res,
            Err(err) => self.reject(&req, &context, err),
        }
    }

    async fn dispatch(&self, req: &Request, context: &mut Context) -> Result<Response, BridgeError> {
        let name = req.method_name();
        if name.is_empty() {
            return Err(BridgeError::NotFound("Bridge not found!".to_owned()));
        }

        let method = self
            .bridge
            .lookup(name)
            .ok_or_else(|| BridgeError::NotFound(format!("Bridge not found: {name}")))?;

        for entry in self.bridge.registry().matching(name) {
            match entry.handler.call(req.clone()).await? {
                MiddlewareResult::Next => {}
                MiddlewareResult::Context(extra) => context.extend(extra),
                MiddlewareResult::Stop(res) => {
                    debug!(method = name, pattern = entry.pattern.as_str(), "middleware stopped request");
                    return Ok(res);
                }
            }
        }

        let value = method.call(req.args().clone(), context.clone()).await?;
        Ok(match value {
            Value::Null => Response::json(&json!({})),
            value => Response::json(&value),
        })
    }

    fn reject(&self, req: &Request, context: &Context, err: BridgeError) -> Response {
        match err {
            BridgeError::Validation(v) => {
                debug!(id = %req.bind().id, method = req.method_name(), error = %v, "validation failed");
                Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .text(v.client_message())
            }
            BridgeError::NotFound(message) => {
                self.log_error(req, context, &message);
                Response::builder()
                    .status(self.config.not_found.status_code())
                    .json(&json!({ "error": message }))
            }
            err @ BridgeError::Failed { .. } => {
                self.log_error(req, context, &err);
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .json(&json!({ "error": err.to_string() }))
            }
        }
    }

    /// Logs the raw error, not the client-facing message.
    fn log_error(&self, req: &Request, context: &Context, err: &dyn std::fmt::Debug) {
        let logs = &self.config.logs;
        if !logs.error {
            return;
        }
        let args = logs.args_on_error.then(|| req.args().to_string());
        let context = logs.context_on_error.then(|| Value::Object(context.clone()).to_string());
        error!(
            id = %req.bind().id,
            method = req.method_name(),
            args = args.as_deref(),
            context = context.as_deref(),
            error = ?err,
            "bridge call failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::HeaderMap;

    use super::*;
    use crate::error::ValidationError;

    fn dispatcher(bridge: Bridge) -> Dispatcher {
        Dispatcher::new(bridge, Arc::new(BridgeConfig::default()))
    }

    fn body_json(res: &Response) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    async fn whoami(_args: Value, ctx: Context) -> Result<Context, BridgeError> {
        Ok(ctx)
    }

    async fn guest(_req: Request) -> Context {
        let mut ctx = Context::new();
        ctx.insert("role".into(), "guest".into());
        ctx.insert("name".into(), "Typed Bridge".into());
        ctx
    }

    async fn admin(_req: Request) -> Option<Context> {
        let mut ctx = Context::new();
        ctx.insert("role".into(), "admin".into());
        Some(ctx)
    }

    #[tokio::test]
    async fn later_middleware_overrides_context() {
        let d = dispatcher(
            Bridge::new()
                .method("user.whoami", whoami)
                .middleware("user.*", guest)
                .middleware("*", admin),
        );
        let res = d.handle(Request::for_test("user.whoami", HeaderMap::new(), json!({}))).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(body_json(&res), json!({ "role": "admin", "name": "Typed Bridge" }));
    }

    #[tokio::test]
    async fn non_matching_middleware_is_skipped() {
        let d = dispatcher(
            Bridge::new()
                .method("user.whoami", whoami)
                .middleware("post.*", admin),
        );
        let res = d.handle(Request::for_test("user.whoami", HeaderMap::new(), json!({}))).await;
        assert_eq!(body_json(&res), json!({}));
    }

    #[tokio::test]
    async fn stop_skips_method_and_later_middleware() {
        let calls = Arc::new(AtomicUsize::new(0));
        let later = Arc::new(AtomicUsize::new(0));

        let method_calls = Arc::clone(&calls);
        let later_calls = Arc::clone(&later);
        let d = dispatcher(
            Bridge::new()
                .method("test.error", move |_args: Value, _ctx: Context| {
                    let calls = Arc::clone(&method_calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, BridgeError>(())
                    }
                })
                .middleware("test.*", |_req: Request| async {
                    MiddlewareResult::stop(StatusCode::BAD_REQUEST)
                })
                .middleware("*", move |_req: Request| {
                    let later = Arc::clone(&later_calls);
                    async move {
                        later.fetch_add(1, Ordering::SeqCst);
                    }
                }),
        );

        let res = d.handle(Request::for_test("test.error", HeaderMap::new(), json!({}))).await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert!(res.body().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn middleware_sees_headers() {
        let d = dispatcher(
            Bridge::new()
                .method("user.whoami", whoami)
                .middleware("*", |req: Request| async move {
                    let mut ctx = Context::new();
                    let auth = req.header("authorization").unwrap_or("NO_AUTH");
                    ctx.insert("authorization".into(), auth.into());
                    ctx
                }),
        );
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer 123".parse().unwrap());
        let res = d.handle(Request::for_test("user.whoami", headers, json!({}))).await;
        assert_eq!(body_json(&res), json!({ "authorization": "Bearer 123" }));
    }

    #[tokio::test]
    async fn middleware_error_is_500() {
        let d = dispatcher(
            Bridge::new()
                .method("user.whoami", whoami)
                .middleware("*", |_req: Request| async {
                    Err::<(), _>(BridgeError::msg("session store unavailable"))
                }),
        );
        let res = d.handle(Request::for_test("user.whoami", HeaderMap::new(), json!({}))).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(&res), json!({ "error": "session store unavailable" }));
    }

    #[tokio::test]
    async fn panicking_method_is_500() {
        let d = dispatcher(Bridge::new().method("user.fetch", |args: Value, _ctx: Context| async move {
            if args.is_object() {
                panic!("kaboom");
            }
            Ok::<_, BridgeError>(())
        }));
        let res = d.handle(Request::for_test("user.fetch", HeaderMap::new(), json!({}))).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(&res), json!({ "error": "handler panicked: kaboom" }));
    }

    #[tokio::test]
    async fn method_panicking_before_its_future_is_500() {
        let d = dispatcher(Bridge::new().method("user.fetch", |args: Value, _ctx: Context| {
            if let Some(id) = args.get("id") {
                panic!("no row {id}");
            }
            async { Ok::<_, BridgeError>(()) }
        }));
        let res = d.handle(Request::for_test("user.fetch", HeaderMap::new(), json!({ "id": 7 }))).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(&res), json!({ "error": "handler panicked: no row 7" }));
    }

    #[tokio::test]
    async fn panicking_middleware_is_500_and_skips_method() {
        let calls = Arc::new(AtomicUsize::new(0));
        let method_calls = Arc::clone(&calls);
        let d = dispatcher(
            Bridge::new()
                .method("user.whoami", move |_args: Value, ctx: Context| {
                    method_calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, BridgeError>(ctx) }
                })
                .middleware("*", |req: Request| async move {
                    if req.header("authorization").is_none() {
                        panic!("kaboom");
                    }
                }),
        );
        let res = d.handle(Request::for_test("user.whoami", HeaderMap::new(), json!({}))).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(&res), json!({ "error": "handler panicked: kaboom" }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn validation_error_is_400_text() {
        let d = dispatcher(Bridge::new().method("user.fetch", |_args: Value, _ctx: Context| async {
            Err::<(), _>(ValidationError::single(["id"], "Number must be greater than or equal to 1"))
        }));
        let res = d.handle(Request::for_test("user.fetch", HeaderMap::new(), json!({ "id": 0 }))).await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(res.body(), b"id: Number must be greater than or equal to 1");
    }

    #[tokio::test]
    async fn empty_name_is_not_found() {
        let d = dispatcher(Bridge::new().method("user.whoami", whoami));
        let res = d.handle(Request::for_test("", HeaderMap::new(), json!({}))).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(&res), json!({ "error": "Bridge not found!" }));
    }

    #[tokio::test]
    async fn legacy_not_found_status() {
        let config = BridgeConfig {
            not_found: crate::config::NotFoundStatus::BadRequest,
            ..BridgeConfig::default()
        };
        let d = Dispatcher::new(Bridge::new(), Arc::new(config));
        let res = d.handle(Request::for_test("nope", HeaderMap::new(), json!({}))).await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(&res), json!({ "error": "Bridge not found: nope" }));
    }

    #[tokio::test]
    async fn method_returning_nothing_gives_empty_object() {
        let d = dispatcher(Bridge::new().method("user.touch", |_args: Value, _ctx: Context| async {
            Ok::<_, BridgeError>(None::<Value>)
        }));
        let res = d.handle(Request::for_test("user.touch", HeaderMap::new(), json!({}))).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(body_json(&res), json!({}));
    }
}
