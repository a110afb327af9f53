//! The application: ingress handling in front of the mounted bridges.
//!
//! For every request, in order:
//!
//! 1. assign a request id and capture bind metadata (timestamp, client ip);
//! 2. log the request line;
//! 3. route the path; unknown paths get an empty `404`;
//! 4. read the body and parse it as JSON (bridge routes only); failure is a
//!    plain-text `400 Can not parse request!`;
//! 5. apply the configured response delay;
//! 6. answer `/health` with an empty `200`, or hand the request to the
//!    bridge's dispatcher;
//! 7. stamp `X-Powered-By` and log the response with its latency.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body_util::{BodyExt, Full};
use serde_json::Value;
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::dispatch::Dispatcher;
use crate::health;
use crate::request::{Bind, Request};
use crate::response::Response;
use crate::router::{Endpoint, Router};

/// A set of mounted bridges plus the shared request pipeline.
///
/// ```rust,no_run
/// # use typed_bridge::{App, Bridge, BridgeConfig, Server};
/// # async fn run() -> Result<(), typed_bridge::Error> {
/// let app = App::with_config(BridgeConfig::default())
///     .mount("/bridge", Bridge::new());
///
/// Server::bind("0.0.0.0:8080").serve(app).await
/// # }
/// ```
pub struct App {
    router: Router,
    config: Arc<BridgeConfig>,
    next_id: AtomicU64,
}

impl App {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        Self {
            router: Router::new(),
            config: Arc::new(config),
            next_id: AtomicU64::new(1),
        }
    }

    /// Serves `bridge` under `base`, so `POST {base}/user.fetch` calls the
    /// method registered as `user.fetch`. Returns `self` for chaining.
    ///
    /// # Panics
    ///
    /// Panics if `base` is already mounted.
    pub fn mount(mut self, base: &str, bridge: Bridge) -> Self {
        info!(base, middleware = bridge.registry().len(), "mounting bridge");
        let dispatcher = Dispatcher::new(bridge, Arc::clone(&self.config));
        self.router.mount(base, Arc::new(dispatcher));
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Handles one HTTP request end to end. Never fails: every error is
    /// turned into a response.
    ///
    /// The server calls this for each request; it is public so the app can
    /// also sit behind another hyper-based stack.
    pub async fn handle<B>(
        &self,
        req: http::Request<B>,
        remote_addr: SocketAddr,
    ) -> http::Response<Full<Bytes>>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: std::fmt::Display,
    {
        let started = Instant::now();
        let id = format!("{}{}", self.config.id_prefix, self.next_id.fetch_add(1, Ordering::Relaxed));
        let ip = client_ip(req.headers(), remote_addr);

        if self.config.logs.request {
            info!(id = %id, method = %req.method(), path = req.uri().path(), ip = %ip, "REQ");
        }

        let res = self.route(req, Bind { id: id.clone(), timestamp: unix_millis(), ip }).await;

        if self.config.logs.response {
            let status = res.status_code().as_u16();
            let elapsed_ms = started.elapsed().as_millis() as u64;
            if status < 400 {
                info!(id = %id, status, elapsed_ms, "RES");
            } else {
                warn!(id = %id, status, elapsed_ms, "RES");
            }
        }

        res.into_inner()
    }

    async fn route<B>(&self, req: http::Request<B>, bind: Bind) -> Response
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: std::fmt::Display,
    {
        let Some(matched) = self.router.lookup(req.uri().path()) else {
            return Response::status(StatusCode::NOT_FOUND);
        };

        let dispatcher = match matched.endpoint {
            Endpoint::Health => {
                self.delay().await;
                return health::check();
            }
            Endpoint::Bridge(dispatcher) => dispatcher,
        };

        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(id = %bind.id, error = %e, "failed to read request body");
                return unparsable();
            }
        };
        let Some(args) = parse_body(&body) else {
            return unparsable();
        };

        self.delay().await;

        let request = Request::new(
            parts.method,
            parts.uri.path().to_owned(),
            parts.headers,
            body,
            args,
            matched.method_name,
            bind,
        );
        dispatcher.handle(request).await
    }

    async fn delay(&self) {
        let delay = self.config.response_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for App {
    fn default() -> Self { Self::new() }
}

fn unparsable() -> Response {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .text("Can not parse request!")
}

/// An empty (or whitespace-only) body is `{}`; anything else must be JSON.
fn parse_body(body: &[u8]) -> Option<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Some(Value::Object(Default::default()));
    }
    serde_json::from_slice(body).ok()
}

/// First `X-Forwarded-For` entry, else the peer address. IPv6 loopback is
/// reported as `127.0.0.1`.
fn client_ip(headers: &HeaderMap, remote_addr: SocketAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let ip = match forwarded {
        Some(ip) => ip.to_owned(),
        None => remote_addr.ip().to_string(),
    };
    if ip == "::1" { "127.0.0.1".to_owned() } else { ip }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{BridgeError, Context, MiddlewareResult, parse_args};

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[derive(serde::Deserialize)]
    struct FetchArgs {
        id: u64,
    }

    async fn fetch(args: Value, _ctx: Context) -> Result<Value, BridgeError> {
        let FetchArgs { id } = parse_args(args)?;
        match id {
            1 => Ok(json!({ "id": 1, "name": "Neil" })),
            _ => Err(BridgeError::msg("not found")),
        }
    }

    fn app() -> App {
        App::new().mount("/bridge", Bridge::new().method("user.fetch", fetch))
    }

    async fn post(app: &App, path: &str, body: &str) -> http::Response<Full<Bytes>> {
        let req = http::Request::post(path)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(body.to_owned())))
            .unwrap();
        app.handle(req, peer()).await
    }

    async fn body_of(res: http::Response<Full<Bytes>>) -> Bytes {
        res.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn fetch_user() {
        let res = post(&app(), "/bridge/user.fetch", r#"{"id":1}"#).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-powered-by"], "typed-bridge");
        let body: Value = serde_json::from_slice(&body_of(res).await).unwrap();
        assert_eq!(body, json!({ "id": 1, "name": "Neil" }));
    }

    #[tokio::test]
    async fn thrown_error_is_500() {
        let res = post(&app(), "/bridge/user.fetch", r#"{"id":99}"#).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(&body_of(res).await).unwrap();
        assert_eq!(body, json!({ "error": "not found" }));
    }

    #[tokio::test]
    async fn unknown_method_is_404() {
        let res = post(&app(), "/bridge/unknown.method", "{}").await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(&body_of(res).await).unwrap();
        assert_eq!(body, json!({ "error": "Bridge not found: unknown.method" }));
    }

    #[tokio::test]
    async fn health_is_empty_200() {
        let app = app();
        for path in ["/bridge/health", "/health"] {
            let req = http::Request::get(path).body(Full::new(Bytes::new())).unwrap();
            let res = app.handle(req, peer()).await;
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(res.headers()["x-powered-by"], "typed-bridge");
            assert!(body_of(res).await.is_empty());
        }
    }

    #[tokio::test]
    async fn malformed_json_is_400_text() {
        let res = post(&app(), "/bridge/user.fetch", "{\"id\":").await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_of(res).await, "Can not parse request!");
    }

    #[tokio::test]
    async fn bad_args_are_400_text() {
        let res = post(&app(), "/bridge/user.fetch", r#"{"id":"one"}"#).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = body_of(res).await;
        assert!(std::str::from_utf8(&body).unwrap().contains("invalid type"));
    }

    #[tokio::test]
    async fn empty_body_is_empty_object() {
        let app = App::new().mount(
            "/bridge",
            Bridge::new().method("echo", |args: Value, _ctx: Context| async move {
                Ok::<_, BridgeError>(args)
            }),
        );
        let res = post(&app, "/bridge/echo", "").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_of(res).await, "{}");
    }

    #[tokio::test]
    async fn unmounted_path_is_empty_404() {
        let res = post(&app(), "/other/user.fetch", "{}").await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(body_of(res).await.is_empty());
    }

    #[tokio::test]
    async fn request_ids_are_prefixed_and_increasing() {
        let config = BridgeConfig { id_prefix: "api-".into(), ..BridgeConfig::default() };
        let app = App::with_config(config).mount(
            "/bridge",
            Bridge::new().method("id", |_args: Value, _ctx: Context| async { Ok::<_, BridgeError>(()) })
                .middleware("*", |req: Request| async move {
                    let mut ctx = Context::new();
                    ctx.insert("id".into(), req.bind().id.clone().into());
                    MiddlewareResult::stop(Response::json(&ctx))
                }),
        );
        let first = body_of(post(&app, "/bridge/id", "{}").await).await;
        let second = body_of(post(&app, "/bridge/id", "{}").await).await;
        assert_eq!(first, r#"{"id":"api-1"}"#);
        assert_eq!(second, r#"{"id":"api-2"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn response_delay_is_applied() {
        let config = BridgeConfig { response_delay_ms: 500, ..BridgeConfig::default() };
        let app = App::with_config(config).mount("/bridge", Bridge::new().method("user.fetch", fetch));
        let started = tokio::time::Instant::now();
        let res = post(&app, "/bridge/user.fetch", r#"{"id":1}"#).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, peer()), "203.0.113.7");

        let v6: SocketAddr = "[::1]:8080".parse().unwrap();
        assert_eq!(client_ip(&HeaderMap::new(), v6), "127.0.0.1");
        assert_eq!(client_ip(&HeaderMap::new(), peer()), "127.0.0.1");
    }
}
