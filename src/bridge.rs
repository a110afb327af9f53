//! The method table and its middleware, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::{BridgeError, ValidationError};
use crate::handler::{BoxedMethod, Method, Middleware};
use crate::middleware::Registry;

/// A set of named async functions plus the middleware guarding them.
///
/// Mount it on an [`App`](crate::App) under a base path. Each
/// [`method`](Bridge::method) and [`middleware`](Bridge::middleware) call
/// returns `self` so registrations chain:
///
/// ```rust,no_run
/// # use serde_json::{Value, json};
/// # use typed_bridge::{Bridge, BridgeError, Context, Request};
/// # async fn fetch(_: Value, _: Context) -> Result<Value, BridgeError> { Ok(json!({})) }
/// # async fn fetch_all(_: Value, _: Context) -> Result<Value, BridgeError> { Ok(json!([])) }
/// # async fn auth(_: Request) -> Context { Context::new() }
/// let bridge = Bridge::new()
///     .method("user.fetch",    fetch)
///     .method("user.fetchAll", fetch_all)
///     .middleware("user.*",    auth);
/// ```
#[derive(Default)]
pub struct Bridge {
    methods: HashMap<String, BoxedMethod>,
    middleware: Registry,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `method` under `name`. Names are matched by exact string
    /// equality; a dotted name like `user.fetch` is one key, not two.
    /// Registering the same name twice keeps the later function.
    pub fn method(mut self, name: &str, method: impl Method) -> Self {
        if self.contains(name) {
            warn!(method = name, "bridge method registered twice, keeping the later one");
        }
        self.methods.insert(name.to_owned(), method.into_boxed_method());
        self
    }

    /// Appends a middleware for every method name matching `pattern`
    /// (`*` matches any run of characters). Middleware run in the order they
    /// are registered.
    pub fn middleware(mut self, pattern: &str, handler: impl Middleware) -> Self {
        self.middleware.register(pattern, handler);
        self
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<BoxedMethod> {
        self.methods.get(name).map(Arc::clone)
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.middleware
    }
}

/// Deserialises method arguments into `T`.
///
/// Shape mismatches come back as a [`ValidationError`], which the dispatcher
/// answers with `400`.
///
/// ```rust
/// # use serde::Deserialize;
/// # use serde_json::{Value, json};
/// # use typed_bridge::{BridgeError, Context, parse_args};
/// #[derive(Deserialize)]
/// struct FetchArgs { id: u64 }
///
/// async fn fetch(args: Value, _ctx: Context) -> Result<Value, BridgeError> {
///     let FetchArgs { id } = parse_args(args)?;
///     Ok(json!({ "id": id }))
/// }
/// ```
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, BridgeError> {
    serde_json::from_value(args)
        .map_err(|e| ValidationError::single(Vec::<String>::new(), e.to_string()).into())
}
