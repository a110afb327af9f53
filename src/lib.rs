//! # typed-bridge
//!
//! Named async functions over HTTP. One endpoint, JSON in, JSON out.
//!
//! ## The contract
//!
//! A caller POSTs a JSON body to `<base>/<method>`. The server looks the
//! method name up in a table, runs the middleware whose pattern matches that
//! name, calls the function with `(args, context)` and answers with its
//! result as JSON.
//!
//! | Outcome                               | Status | Body                          |
//! |---------------------------------------|--------|-------------------------------|
//! | method returned `v`                   | 200    | `v` (`{}` for unit / `None`)  |
//! | method or middleware returned `Err`   | 500    | `{"error": message}`          |
//! | argument validation failed            | 400    | `path: message` (text)        |
//! | no such method                        | 404    | `{"error": "Bridge not found: <name>"}` |
//! | body is not JSON                      | 400    | `Can not parse request!`      |
//! | middleware returned `Stop(res)`       | any    | whatever `res` says           |
//!
//! Authentication, tenancy and the like are middleware concerns; the bridge
//! itself has no opinion on them.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use serde_json::{Value, json};
//! use typed_bridge::{App, Bridge, BridgeError, Context, Request, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bridge = Bridge::new()
//!         .method("user.fetch", fetch)
//!         .middleware("user.*", auth);
//!
//!     let app = App::new().mount("/bridge", bridge);
//!
//!     Server::port(8080).serve(app).await.unwrap();
//! }
//!
//! async fn fetch(args: Value, ctx: Context) -> Result<Value, BridgeError> {
//!     Ok(json!({ "id": args["id"], "caller": ctx.get("authorization") }))
//! }
//!
//! async fn auth(req: Request) -> Context {
//!     let mut ctx = Context::new();
//!     let token = req.header("authorization").unwrap_or("NO_AUTH");
//!     ctx.insert("authorization".into(), token.into());
//!     ctx
//! }
//! ```

mod app;
mod bridge;
mod client;
mod config;
mod dispatch;
mod error;
mod handler;
mod health;
mod pattern;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

/// Per-request context handed to a method as its second argument. Built by
/// shallow-merging what each matching middleware returned.
pub type Context = serde_json::Map<String, serde_json::Value>;

pub use app::App;
pub use bridge::{Bridge, parse_args};
pub use client::{BridgeClient, ClientError};
pub use config::{BridgeConfig, LogConfig, NotFoundStatus};
pub use error::{BridgeError, Error, Issue, ValidationError};
pub use handler::{Method, Middleware};
pub use middleware::{IntoMiddlewareResult, MiddlewareResult};
pub use pattern::{Pattern, matches};
pub use request::{Bind, Request};
pub use response::{IntoResponse, POWERED_BY, Response, ResponseBuilder};
pub use server::{Server, ServerHandle, State};
