//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store routes in registration order (registration order = priority)
//! - Store mounts as an ordered list of (guard, target) pairs
//! - Resolve a request to handler, middleware and extracted parameters
//! - Fall back to static files, then to an explicit no-match
//!
//! # Design Decisions
//! - Built once at startup, immutable while serving (shared via `Arc`)
//! - Prefixes compose at lookup time, so mount order does not matter
//!   relative to route registration
//! - Method set is checked before the path
//! - A mount that yields nothing does not end the search

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::http::handler::{Handler, RequestMiddleware, ResponseMiddleware, Reply};
use crate::http::request::Request;
use crate::routing::matcher::Guard;
use crate::routing::pattern::Pattern;
use crate::routing::proxy::ProxyRouter;
use crate::routing::static_files::StaticFiles;
use crate::routing::types::{ParamError, ParamValue, Params, TypeRegistry};

/// One registered (pattern, methods, handler, middleware) entry.
pub struct Route {
    methods: BTreeSet<String>,
    pattern: Pattern,
    handler: Arc<dyn Handler>,
    request_middleware: Vec<RequestMiddleware>,
    response_middleware: Vec<ResponseMiddleware>,
}

impl Route {
    /// Append a request transform, applied in registration order.
    pub fn request_middleware<F>(&mut self, middleware: F) -> &mut Self
    where
        F: Fn(Request) -> anyhow::Result<Request> + Send + Sync + 'static,
    {
        self.request_middleware.push(Arc::new(middleware));
        self
    }

    /// Append a reply transform, applied in registration order.
    pub fn response_middleware<F>(&mut self, middleware: F) -> &mut Self
    where
        F: Fn(&Request, Reply) -> anyhow::Result<Reply> + Send + Sync + 'static,
    {
        self.response_middleware.push(Arc::new(middleware));
        self
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(String::as_str)
    }

    pub fn allows(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    fn to_match(&self, params: Params) -> RouteMatch {
        RouteMatch {
            handler: Arc::clone(&self.handler),
            request_middleware: self.request_middleware.clone(),
            response_middleware: self.response_middleware.clone(),
            params,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: Vec<&str> = self.methods().collect();
        write!(f, "{} {}", methods.join(","), self.pattern)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("methods", &self.methods)
            .field("pattern", &self.pattern.as_str())
            .field("request_middleware", &self.request_middleware.len())
            .field("response_middleware", &self.response_middleware.len())
            .finish()
    }
}

/// What a mount delegates to.
#[derive(Debug)]
pub enum MountTarget {
    Router(Router),
    Proxy(ProxyRouter),
}

struct Mount {
    guard: Option<Guard>,
    target: MountTarget,
}

/// Result of a successful lookup.
pub struct RouteMatch {
    pub handler: Arc<dyn Handler>,
    pub request_middleware: Vec<RequestMiddleware>,
    pub response_middleware: Vec<ResponseMiddleware>,
    pub params: Params,
}

impl RouteMatch {
    fn leaf(handler: Arc<dyn Handler>, params: Params) -> Self {
        Self {
            handler,
            request_middleware: Vec::new(),
            response_middleware: Vec::new(),
            params,
        }
    }
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Ordered route table with mounts and a static-file fallback.
pub struct Router {
    name: String,
    prefix: String,
    routes: Vec<Route>,
    mounts: Vec<Mount>,
    static_files: Option<StaticFiles>,
    types: Arc<TypeRegistry>,
}

impl Router {
    /// A root router named `main` with no prefix.
    pub fn new() -> Self {
        Self::named("main")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            routes: Vec::new(),
            mounts: Vec::new(),
            static_files: Some(StaticFiles::default()),
            types: Arc::new(TypeRegistry::default()),
        }
    }

    /// Mount point of this router below its parent.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    /// Serve `dir` under `prefix` (relative to this router's own prefix).
    pub fn with_static(mut self, dir: impl Into<std::path::PathBuf>, prefix: impl Into<String>) -> Self {
        self.static_files = Some(StaticFiles::new(dir, prefix));
        self
    }

    pub fn without_static(mut self) -> Self {
        self.static_files = None;
        self
    }

    /// Use `types` for parameter coercion. Only the root's registry is
    /// consulted during a lookup.
    pub fn with_types(mut self, types: TypeRegistry) -> Self {
        self.types = Arc::new(types);
        self
    }

    /// Register an extra parameter type tag.
    pub fn register_type<F>(&mut self, tag: impl Into<String>, parser: F) -> &mut Self
    where
        F: Fn(&str) -> Result<ParamValue, ParamError> + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.types).register(tag, parser);
        self
    }

    /// Register a route; the returned handle attaches middleware.
    pub fn register<H: Handler>(&mut self, pattern: &str, methods: &[&str], handler: H) -> &mut Route {
        let route = Route {
            methods: methods.iter().map(|m| m.to_ascii_uppercase()).collect(),
            pattern: Pattern::parse(pattern),
            handler: Arc::new(handler),
            request_middleware: Vec::new(),
            response_middleware: Vec::new(),
        };
        tracing::debug!(router = %self.name, route = %route, "Route registered");
        self.routes.push(route);
        let last = self.routes.len() - 1;
        &mut self.routes[last]
    }

    pub fn get<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Route {
        self.register(pattern, &["GET"], handler)
    }

    pub fn post<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Route {
        self.register(pattern, &["POST"], handler)
    }

    pub fn put<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Route {
        self.register(pattern, &["PUT"], handler)
    }

    pub fn delete<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Route {
        self.register(pattern, &["DELETE"], handler)
    }

    /// Mount a subrouter behind the default guard (path starts with its
    /// full prefix, or always when it has none).
    pub fn mount(&mut self, router: Router) -> &mut Self {
        self.push_mount(None, MountTarget::Router(router))
    }

    /// Mount a subrouter behind a custom guard.
    pub fn mount_with(&mut self, guard: Guard, router: Router) -> &mut Self {
        self.push_mount(Some(guard), MountTarget::Router(router))
    }

    /// Mount a proxy behind the default guard (path starts with its mount path).
    pub fn add_proxy(&mut self, proxy: ProxyRouter) -> &mut Self {
        self.push_mount(None, MountTarget::Proxy(proxy))
    }

    pub fn add_proxy_with(&mut self, guard: Guard, proxy: ProxyRouter) -> &mut Self {
        self.push_mount(Some(guard), MountTarget::Proxy(proxy))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn mounts(&self) -> impl Iterator<Item = &MountTarget> {
        self.mounts.iter().map(|mount| &mount.target)
    }

    pub fn static_files(&self) -> Option<&StaticFiles> {
        self.static_files.as_ref()
    }

    /// Resolve `request`; `None` means not found.
    pub fn route(&self, request: &Request) -> Option<RouteMatch> {
        self.route_under(request, "", &self.types)
    }

    fn route_under(&self, request: &Request, parent_prefix: &str, types: &TypeRegistry) -> Option<RouteMatch> {
        let prefix = format!("{}{}", parent_prefix.trim_end_matches('/'), self.prefix);
        let path = request.path();

        for route in &self.routes {
            if route.allows(request.method()) && route.pattern.matches(&prefix, path, types) {
                tracing::debug!(router = %self.name, route = %route, "Found matching route");
                let params = route.pattern.extract(&prefix, path, types);
                return Some(route.to_match(params));
            }
        }

        for mount in &self.mounts {
            match &mount.target {
                MountTarget::Router(sub) => {
                    let sub_prefix = format!("{prefix}{}", sub.prefix);
                    let admitted = match &mount.guard {
                        Some(guard) => guard.matches(request),
                        None => sub_prefix.is_empty() || path.starts_with(&sub_prefix),
                    };
                    if !admitted {
                        continue;
                    }
                    tracing::debug!(router = %self.name, subrouter = %sub.name, "Routing request to subrouter");
                    if let Some(found) = sub.route_under(request, &prefix, types) {
                        return Some(found);
                    }
                }
                MountTarget::Proxy(proxy) => {
                    let mount_path = proxy.mount_path(&prefix);
                    let admitted = match &mount.guard {
                        Some(guard) => guard.matches(request),
                        None => path.starts_with(&mount_path),
                    };
                    if admitted {
                        tracing::debug!(router = %self.name, proxy = %proxy.name(), "Routing request to external server");
                        return Some(RouteMatch::leaf(
                            Arc::new(proxy.forwarder(mount_path)),
                            Params::default(),
                        ));
                    }
                }
            }
        }

        let files = self.static_files.as_ref()?;
        let relative = files.relative_path(&prefix, path)?;
        tracing::debug!(router = %self.name, file = relative, "Routing request to static handler");
        let mut params = Params::default();
        params.insert("path", ParamValue::Str(relative.to_string()));
        Some(RouteMatch::leaf(Arc::new(files.handler(relative)), params))
    }

    fn push_mount(&mut self, guard: Option<Guard>, target: MountTarget) -> &mut Self {
        match &target {
            MountTarget::Router(sub) => {
                tracing::debug!(router = %self.name, subrouter = %sub.name, "Added subrouter")
            }
            MountTarget::Proxy(proxy) => {
                tracing::debug!(router = %self.name, proxy = %proxy.name(), mount = %proxy.internal_path(), "Added proxy")
            }
        }
        self.mounts.push(Mount { guard, target });
        self
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("routes", &self.routes)
            .field("mounts", &self.mounts.iter().map(|m| &m.target).collect::<Vec<_>>())
            .field("static_files", &self.static_files)
            .field("types", &self.types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::IntoReply;
    use crate::routing::matcher::HostMatcher;
    use serde_json::json;

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap()
    }

    fn get(path: &str) -> Request {
        request(&format!("GET {path} HTTP/1.1\r\n\r\n"))
    }

    async fn body_of(router: &Router, req: Request) -> String {
        let found = router.route(&req).expect("route should match");
        let mut req = req;
        for middleware in &found.request_middleware {
            req = middleware(req).unwrap();
        }
        let mut reply = found.handler.call(req.clone(), found.params).await.unwrap();
        for middleware in &found.response_middleware {
            reply = middleware(&req, reply).unwrap();
        }
        String::from_utf8(reply.into_response().body().to_vec()).unwrap()
    }

    #[test]
    fn new_router_is_empty() {
        let router = Router::new();
        assert!(router.routes().is_empty());
        assert_eq!(router.mounts().count(), 0);
        assert!(router.route(&get("/")).is_none());
    }

    #[test]
    fn routes_render_method_and_path() {
        let mut router = Router::new();
        router.get("/", |_: &Request, _: &Params| "Hello, World!");
        let rendered: Vec<String> = router.routes().iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["GET /"]);
    }

    #[tokio::test]
    async fn root_route() {
        let mut router = Router::new();
        router.get("/", |_: &Request, _: &Params| "Hello, World!");
        assert_eq!(body_of(&router, get("/")).await, "Hello, World!");
    }

    #[tokio::test]
    async fn parametric_route() {
        let mut router = Router::new();
        router.get("/<name>", |_: &Request, params: &Params| {
            format!("Hello, {}!", params.str("name").unwrap_or_default())
        });
        assert_eq!(body_of(&router, get("/World/")).await, "Hello, World!");
    }

    #[tokio::test]
    async fn int_parameter_binds_integer() {
        let mut router = Router::new().without_static();
        router.get("/items/<int:id>", |_: &Request, params: &Params| {
            format!("item {}", params.int("id").unwrap() * 2)
        });
        assert!(router.route(&get("/items/abc")).is_none());
        let found = router.route(&get("/items/21")).unwrap();
        assert_eq!(found.params.int("id"), Some(21));
        assert_eq!(body_of(&router, get("/items/21")).await, "item 42");
    }

    #[tokio::test]
    async fn method_selects_between_same_paths() {
        let mut router = Router::new();
        router.get("/thing", |_: &Request, _: &Params| "read");
        router.register("/thing", &["POST", "put"], |_: &Request, _: &Params| "write");

        assert_eq!(body_of(&router, get("/thing")).await, "read");
        assert_eq!(body_of(&router, request("POST /thing HTTP/1.1\r\n\r\n")).await, "write");
        assert_eq!(body_of(&router, request("PUT /thing HTTP/1.1\r\n\r\n")).await, "write");
        assert!(router.route(&request("DELETE /thing HTTP/1.1\r\n\r\n")).is_none());
    }

    #[tokio::test]
    async fn first_registered_route_wins() {
        let mut router = Router::new();
        router.get("/<name>", |_: &Request, _: &Params| "param");
        router.get("/fixed", |_: &Request, _: &Params| "literal");
        assert_eq!(body_of(&router, get("/fixed")).await, "param");
    }

    #[tokio::test]
    async fn middleware_runs_in_order() {
        let mut router = Router::new();
        router
            .get("/", |req: &Request, _: &Params| {
                req.local("test").and_then(|v| v.as_str()).unwrap_or("missing").to_string()
            })
            .request_middleware(|req| Ok(req.with_local("test", "Hello, World")))
            .response_middleware(|_, reply| {
                let body = reply.into_response().body().clone();
                format!("{}!", String::from_utf8_lossy(&body)).into_reply()
            })
            .response_middleware(|_, reply| {
                let body = reply.into_response().body().clone();
                format!("{}?", String::from_utf8_lossy(&body)).into_reply()
            });

        assert_eq!(body_of(&router, get("/")).await, "Hello, World!?");
    }

    #[tokio::test]
    async fn subrouter_prefix_composition() {
        let mut router = Router::new();
        let mut sub = Router::named("sub").with_prefix("/sub");
        router.get("/", |_: &Request, _: &Params| "Hello, World!");
        sub.get("/", |_: &Request, _: &Params| "Hello, Again!");
        sub.get("/<name>", |_: &Request, p: &Params| format!("Hello, {}!", p.str("name").unwrap()));
        router.mount(sub);

        assert_eq!(router.mounts().count(), 1);
        assert_eq!(body_of(&router, get("/")).await, "Hello, World!");
        assert_eq!(body_of(&router, get("/sub/")).await, "Hello, Again!");
        assert_eq!(body_of(&router, get("/sub/Again")).await, "Hello, Again!");
    }

    #[tokio::test]
    async fn nested_subrouters_see_parent_context() {
        let mut leaf = Router::named("leaf").with_prefix("/c");
        leaf.get("/<int:n>", |_: &Request, p: &Params| format!("n={}", p.int("n").unwrap()));
        let mut middle = Router::named("middle").with_prefix("/b");
        middle.mount(leaf);
        let mut root = Router::new().with_prefix("/a");
        root.mount(middle);

        assert_eq!(body_of(&root, get("/a/b/c/5")).await, "n=5");
        assert!(root.route(&get("/b/c/5")).is_none());
    }

    #[tokio::test]
    async fn guards_and_fall_through() {
        let mut api = Router::named("api");
        api.get("/", |_: &Request, _: &Params| "api host");
        let mut fallback = Router::named("fallback");
        fallback.get("/", |_: &Request, _: &Params| "fallback");

        let mut router = Router::new();
        router
            .mount_with(Arc::new(HostMatcher::new("api.example.com")), api)
            .mount_with(Arc::new(|req: &Request| req.path() == "/nothing-here/"), Router::named("empty"))
            .mount(fallback);

        let api_req = request("GET / HTTP/1.1\r\nHost: API.example.com\r\n\r\n");
        assert_eq!(body_of(&router, api_req).await, "api host");
        assert_eq!(body_of(&router, get("/")).await, "fallback");
    }

    #[tokio::test]
    async fn routes_win_over_mounts_and_static() {
        let mut sub = Router::named("sub");
        sub.get("/static/x", |_: &Request, _: &Params| "sub");
        let mut router = Router::new();
        router.mount(sub);
        router.get("/static/x", |_: &Request, _: &Params| "root");

        assert_eq!(body_of(&router, get("/static/x")).await, "root");
        assert_eq!(body_of(&Router::new(), get("/static/x")).await, "404 Not Found");
    }

    #[test]
    fn static_fallback_binds_relative_path() {
        let router = Router::new().with_static("public", "/assets");
        let found = router.route(&get("/assets/img/logo.png")).unwrap();
        assert_eq!(found.params.str("path"), Some("img/logo.png"));
        assert!(router.route(&get("/static/img/logo.png")).is_none());

        let sub = Router::named("blog").with_prefix("/blog");
        let mut root = Router::new().without_static();
        root.mount(sub);
        let found = root.route(&get("/blog/static/a.css")).unwrap();
        assert_eq!(found.params.str("path"), Some("a.css"));
    }

    #[test]
    fn proxies_match_their_mount_path() {
        let proxy = ProxyRouter::new("PR1", "/proxy", "http://127.0.0.1:9/todos/").unwrap();
        let mut router = Router::new();
        router.add_proxy(proxy);

        let found = router.route(&get("/proxy/1")).unwrap();
        assert!(found.params.is_empty());
        assert!(found.request_middleware.is_empty());
        assert!(router.route(&get("/elsewhere")).is_none());
    }

    #[tokio::test]
    async fn custom_types_come_from_the_root_registry() {
        let mut sub = Router::named("sub").with_prefix("/s");
        sub.get("/<hex:v>", |_: &Request, p: &Params| format!("{}", p.int("v").unwrap()));
        let mut router = Router::new();
        router.register_type("hex", |s| {
            i64::from_str_radix(s, 16)
                .map(ParamValue::Int)
                .map_err(|_| ParamError::new("hex", s))
        });
        router.mount(sub);

        assert_eq!(body_of(&router, get("/s/ff")).await, "255");
        assert!(router.route(&get("/s/zz")).is_none());
    }

    #[tokio::test]
    async fn json_replies() {
        let mut router = Router::new();
        router.get("/data", |_: &Request, _: &Params| (json!({"ok": true}), 200u16));
        assert_eq!(body_of(&router, get("/data")).await, r#"{"ok":true}"#);
    }
}
