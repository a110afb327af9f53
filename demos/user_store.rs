//! Demo bridge: an in-memory user store behind a context middleware.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example user_store
//!
//! Try:
//!   curl -X POST http://localhost:8080/bridge/user.fetch \
//!        -H 'content-type: application/json' -d '{"id":1}'
//!   curl -X POST http://localhost:8080/bridge/user.update \
//!        -H 'authorization: Bearer 123' -d '{"id":1,"name":"John Doe"}'
//!   curl -X POST http://localhost:8080/bridge/user.fetchAll
//!   curl -X POST http://localhost:8080/bridge/user.fetch -d '{"id":0}'    # 400
//!   curl -X POST http://localhost:8080/bridge/test.error                   # 400, from middleware
//!   curl http://localhost:8080/bridge/health

use std::sync::{Arc, Mutex};

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use typed_bridge::{
    App, Bridge, BridgeConfig, BridgeError, Context, MiddlewareResult, Request, Server,
    ValidationError, parse_args,
};

#[derive(Clone, Debug, Serialize)]
struct User {
    id: u64,
    name: String,
}

type Users = Arc<Mutex<Vec<User>>>;

#[derive(Deserialize)]
struct FetchArgs {
    id: i64,
}

#[derive(Deserialize)]
struct UpdateArgs {
    id: u64,
    name: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let users: Users = Arc::new(Mutex::new(vec![
        User { id: 1, name: "Neil".into() },
        User { id: 2, name: "John".into() },
        User { id: 3, name: "Jane".into() },
    ]));

    let bridge = Bridge::new()
        .method("user.fetch", {
            let users = Arc::clone(&users);
            move |args: Value, _ctx: Context| fetch(Arc::clone(&users), args)
        })
        .method("user.update", {
            let users = Arc::clone(&users);
            move |args: Value, ctx: Context| update(Arc::clone(&users), args, ctx)
        })
        .method("user.fetchAll", {
            let users = Arc::clone(&users);
            move |_args: Value, _ctx: Context| fetch_all(Arc::clone(&users))
        })
        .method("test.error", |_args: Value, _ctx: Context| async { Ok::<_, BridgeError>(()) })
        .middleware("*", context_parser);

    let app = App::with_config(BridgeConfig::default()).mount("/bridge", bridge);

    Server::port(8080)
        .on_shutdown(|| tracing::info!("user store flushed"))
        .serve(app)
        .await
        .expect("server error");
}

// Every call gets the caller's authorization header in its context.
// `test.error` is refused before any method runs.
async fn context_parser(req: Request) -> MiddlewareResult {
    if req.method_name() == "test.error" {
        return MiddlewareResult::stop(StatusCode::BAD_REQUEST);
    }

    let mut ctx = Context::new();
    ctx.insert("name".into(), "Typed Bridge".into());
    ctx.insert(
        "authorization".into(),
        req.header("authorization").unwrap_or("NO_AUTH").into(),
    );
    MiddlewareResult::Context(ctx)
}

// user.fetch → the user, or `{}` when the id is unknown
async fn fetch(users: Users, args: Value) -> Result<Option<User>, BridgeError> {
    let FetchArgs { id } = parse_args(args)?;
    if id < 1 {
        return Err(ValidationError::single(["id"], "Number must be greater than or equal to 1").into());
    }
    let users = users.lock().map_err(|_| BridgeError::msg("user store poisoned"))?;
    Ok(users.iter().find(|u| u.id == id as u64).cloned())
}

// user.update → `{}`; fails with 500 for an unknown id
async fn update(users: Users, args: Value, ctx: Context) -> Result<(), BridgeError> {
    let UpdateArgs { id, name } = parse_args(args)?;
    tracing::info!(id, caller = ?ctx.get("authorization"), "updating user");

    let mut users = users.lock().map_err(|_| BridgeError::msg("user store poisoned"))?;
    let user = users
        .iter_mut()
        .find(|u| u.id == id)
        .ok_or_else(|| BridgeError::msg("User not found"))?;
    user.name = name;
    Ok(())
}

// user.fetchAll → every user
async fn fetch_all(users: Users) -> Result<Vec<User>, BridgeError> {
    let users = users.lock().map_err(|_| BridgeError::msg("user store poisoned"))?;
    Ok(users.clone())
}
