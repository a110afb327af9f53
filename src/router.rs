//! Path routing for mounted bridges and the health endpoint.
//!
//! One radix tree, O(path-length) lookup. Every bridge mounted at `base`
//! owns three routes:
//!
//! ```text
//! {base}          → bridge, empty method name
//! {base}/         → bridge, empty method name
//! {base}/{*rest}  → bridge, method name = last '/' segment of rest
//! ```
//!
//! plus `{base}/health`. `/health` at the root is always present. Static
//! routes win over the catch-all, so a method literally named `health`
//! cannot shadow the health check.

use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::dispatch::Dispatcher;

#[derive(Clone)]
pub(crate) enum Endpoint {
    Health,
    Bridge(Arc<Dispatcher>),
}

pub(crate) struct Matched {
    pub(crate) endpoint: Endpoint,
    pub(crate) method_name: String,
}

pub(crate) struct Router {
    tree: MatchitRouter<Endpoint>,
}

impl Router {
    pub(crate) fn new() -> Self {
        let mut router = Self { tree: MatchitRouter::new() };
        router.insert("/health", Endpoint::Health);
        router
    }

    /// Mounts `dispatcher` under `base` (`""` or `"/"` for the root).
    ///
    /// # Panics
    ///
    /// Panics if `base` is already mounted or is not a valid route.
    pub(crate) fn mount(&mut self, base: &str, dispatcher: Arc<Dispatcher>) {
        let base = normalize_base(base);
        if !base.is_empty() {
            self.insert(&base, Endpoint::Bridge(Arc::clone(&dispatcher)));
            self.insert(&format!("{base}/health"), Endpoint::Health);
        }
        self.insert(&format!("{base}/"), Endpoint::Bridge(Arc::clone(&dispatcher)));
        self.insert(&format!("{base}/{{*rest}}"), Endpoint::Bridge(dispatcher));
    }

    fn insert(&mut self, path: &str, endpoint: Endpoint) {
        self.tree
            .insert(path, endpoint)
            .unwrap_or_else(|e| panic!("invalid bridge route `{path}`: {e}"));
    }

    pub(crate) fn lookup(&self, path: &str) -> Option<Matched> {
        let matched = self.tree.at(path).ok()?;
        let rest = matched.params.get("rest").unwrap_or("");
        Some(Matched {
            endpoint: matched.value.clone(),
            method_name: method_name(rest).to_owned(),
        })
    }
}

/// `"bridge/"` → `"/bridge"`, `"/"` → `""`.
fn normalize_base(base: &str) -> String {
    let trimmed = base.trim_matches('/');
    if trimmed.is_empty() { String::new() } else { format!("/{trimmed}") }
}

/// Last `/`-delimited segment: `"v1/user.fetch"` → `"user.fetch"`,
/// `"user.fetch/"` → `""`.
fn method_name(rest: &str) -> &str {
    rest.rsplit('/').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use crate::config::BridgeConfig;

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(Bridge::new(), Arc::new(BridgeConfig::default())))
    }

    fn lookup(router: &Router, path: &str) -> Option<(bool, String)> {
        router.lookup(path).map(|m| (matches!(m.endpoint, Endpoint::Health), m.method_name))
    }

    #[test]
    fn mounted_base() {
        let mut router = Router::new();
        router.mount("/bridge", dispatcher());

        assert_eq!(lookup(&router, "/bridge/user.fetch"), Some((false, "user.fetch".into())));
        assert_eq!(lookup(&router, "/bridge/v1/user.fetch"), Some((false, "user.fetch".into())));
        assert_eq!(lookup(&router, "/bridge/user.fetch/"), Some((false, String::new())));
        assert_eq!(lookup(&router, "/bridge/"), Some((false, String::new())));
        assert_eq!(lookup(&router, "/bridge"), Some((false, String::new())));
        assert_eq!(lookup(&router, "/bridge/health"), Some((true, String::new())));
        assert_eq!(lookup(&router, "/health"), Some((true, String::new())));
        assert_eq!(lookup(&router, "/elsewhere"), None);
    }

    #[test]
    fn root_mount() {
        let mut router = Router::new();
        router.mount("/", dispatcher());

        assert_eq!(lookup(&router, "/user.fetch"), Some((false, "user.fetch".into())));
        assert_eq!(lookup(&router, "/health"), Some((true, String::new())));
        assert_eq!(lookup(&router, "/"), Some((false, String::new())));
    }

    #[test]
    fn base_normalization() {
        assert_eq!(normalize_base("bridge/"), "/bridge");
        assert_eq!(normalize_base("/api/bridge"), "/api/bridge");
        assert_eq!(normalize_base("/"), "");
        assert_eq!(normalize_base(""), "");
    }
}
