//! Request router
//!
//! The router owns one route tree per method plus an any-method tree,
//! an optional CORS policy, a not-found handler and a middleware list.
//! [`Router::into_handler`] freezes it into the composite handler the
//! server dispatches through; routes cannot change once serving starts.
//!
//! Dispatch order: CORS preflight, the method's own tree, HEAD→GET
//! emulation, the any-method tree, 405 when some other method's tree
//! matches, and finally the not-found handler.

mod cors;
mod trie;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::handler::{ArcHandler, Handler, Middleware};
use crate::protocol::{Method, Request, StatusCode};
use crate::response::Response;

pub use cors::{AllowOriginFn, CorsOptions};
pub use trie::PathParams;

use cors::CorsHandler;
use trie::TrieNode;

/// A prefix-tree HTTP router.
pub struct Router {
    trees: HashMap<Method, TrieNode>,
    any_tree: TrieNode,
    not_found: ArcHandler,
    middlewares: Vec<Middleware>,
    cors: Option<CorsHandler>,
}

impl Router {
    pub fn new() -> Self {
        let mut trees = HashMap::new();
        for method in Method::ALL {
            trees.insert(method, TrieNode::new());
        }

        Self {
            trees,
            any_tree: TrieNode::new(),
            not_found: Arc::new(DefaultNotFound),
            middlewares: Vec::new(),
            cors: None,
        }
    }

    /// Enables CORS handling with the given policy.
    pub fn with_cors(mut self, options: CorsOptions) -> Self {
        self.cors = Some(CorsHandler::new(options));
        self
    }

    /// Registers a route for one method.
    pub fn route(&mut self, method: Method, path: &str, handler: impl Handler + 'static) {
        self.route_arc(method, path, Arc::new(handler));
    }

    fn route_arc(&mut self, method: Method, path: &str, handler: ArcHandler) {
        if let Some(tree) = self.trees.get_mut(&method) {
            tree.add_route(path, handler);
        }
    }

    pub fn get(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::Get, path, handler);
    }

    pub fn head(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::Head, path, handler);
    }

    pub fn post(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::Post, path, handler);
    }

    pub fn put(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::Put, path, handler);
    }

    pub fn patch(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::Patch, path, handler);
    }

    pub fn delete(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::Delete, path, handler);
    }

    pub fn options(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::Options, path, handler);
    }

    pub fn trace(&mut self, path: &str, handler: impl Handler + 'static) {
        self.route(Method::Trace, path, handler);
    }

    /// Registers a route matching every method.
    pub fn handle(&mut self, path: &str, handler: impl Handler + 'static) {
        self.any_tree.add_route(path, Arc::new(handler));
    }

    /// Replaces the not-found handler (default: 404 with a text body).
    pub fn not_found(&mut self, handler: impl Handler + 'static) {
        self.not_found = Arc::new(handler);
    }

    /// Appends a middleware. The first registered middleware runs
    /// outermost: first on the way in, last on the way out.
    pub fn use_middleware(&mut self, middleware: Middleware) {
        self.middlewares.push(middleware);
    }

    /// Freezes the router into the composite dispatch handler.
    pub fn into_handler(self) -> ArcHandler {
        let Router { trees, any_tree, not_found, middlewares, cors } = self;
        let mut handler: ArcHandler =
            Arc::new(RoutingHandler { core: Arc::new(RouterCore { trees, any_tree, not_found, cors }) });
        for middleware in middlewares.iter().rev() {
            handler = middleware(handler);
        }
        handler
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

struct DefaultNotFound;

#[async_trait]
impl Handler for DefaultNotFound {
    async fn call(&self, _req: &mut Request) -> Response {
        Response::text(StatusCode::NOT_FOUND.reason()).with_status(StatusCode::NOT_FOUND)
    }
}

struct RouterCore {
    trees: HashMap<Method, TrieNode>,
    any_tree: TrieNode,
    not_found: ArcHandler,
    cors: Option<CorsHandler>,
}

struct RoutingHandler {
    core: Arc<RouterCore>,
}

impl RoutingHandler {
    fn lookup(&self, method: Method, path: &str) -> Option<(ArcHandler, PathParams)> {
        self.core.trees.get(&method).and_then(|tree| tree.matches(path))
    }

    fn merge_cors_actual(&self, req: &Request, response: &mut Response) {
        if let Some(cors) = &self.core.cors {
            for (name, value) in cors.handle_actual_request(req).iter() {
                response.headers_mut().add(name, value);
            }
        }
    }
}

#[async_trait]
impl Handler for RoutingHandler {
    async fn call(&self, req: &mut Request) -> Response {
        let method = req.method();
        let path = req.path().to_string();

        // CORS preflight
        if let Some(cors) = &self.core.cors {
            if method == Method::Options
                && !req.headers().get("origin").is_empty()
                && !req.headers().get("access-control-request-method").is_empty()
            {
                let cors_headers = cors.handle_preflight(req);

                let mut response = Response::new();
                if cors.options_passthrough {
                    if let Some((handler, params)) = self.lookup(Method::Options, &path) {
                        req.set_path_params(params);
                        response = handler.call(req).await;
                    } else if let Some((handler, params)) = self.core.any_tree.matches(&path) {
                        req.set_path_params(params);
                        response = handler.call(req).await;
                    } else {
                        response = response.with_status(StatusCode::NO_CONTENT);
                    }
                } else {
                    response = response.with_status(StatusCode::NO_CONTENT);
                }

                for (name, value) in cors_headers.iter() {
                    response.headers_mut().set(name, value);
                }
                return response;
            }
        }

        // exact method match
        if let Some((handler, params)) = self.lookup(method, &path) {
            req.set_path_params(params);
            let mut response = handler.call(req).await;
            self.merge_cors_actual(req, &mut response);
            return response;
        }

        // HEAD falls back to GET with the body stripped
        if method == Method::Head {
            if let Some((handler, params)) = self.lookup(Method::Get, &path) {
                req.set_path_params(params);
                let mut response = handler.call(req).await;
                self.merge_cors_actual(req, &mut response);
                return response.without_body();
            }
        }

        // any-method routes
        if let Some((handler, params)) = self.core.any_tree.matches(&path) {
            req.set_path_params(params);
            let mut response = handler.call(req).await;
            self.merge_cors_actual(req, &mut response);
            return response;
        }

        // the path exists under a different method
        for (other, tree) in &self.core.trees {
            if *other == method {
                continue;
            }
            if tree.would_match(&path) {
                return Response::text(StatusCode::METHOD_NOT_ALLOWED.reason())
                    .with_status(StatusCode::METHOD_NOT_ALLOWED);
            }
        }

        self.core.not_found.call(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::BodySource;

    struct Text(&'static str);

    #[async_trait]
    impl Handler for Text {
        async fn call(&self, _req: &mut Request) -> Response {
            Response::text(self.0)
        }
    }

    struct EchoParam(&'static str);

    #[async_trait]
    impl Handler for EchoParam {
        async fn call(&self, req: &mut Request) -> Response {
            Response::text(req.param(self.0).unwrap_or("<unbound>"))
        }
    }

    fn body_text(response: &Response) -> &str {
        match response.body() {
            BodySource::Full(bytes) => std::str::from_utf8(bytes).unwrap(),
            other => panic!("expected full body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatches_by_method_and_path() {
        let mut router = Router::new();
        router.get("/home", Text("get home"));
        router.post("/home", Text("post home"));
        let handler = router.into_handler();

        let mut req = Request::synthetic(Method::Get, "/home");
        let response = handler.call(&mut req).await;
        assert_eq!(body_text(&response), "get home");

        let mut req = Request::synthetic(Method::Post, "/home");
        let response = handler.call(&mut req).await;
        assert_eq!(body_text(&response), "post home");
    }

    #[tokio::test]
    async fn binds_path_params() {
        let mut router = Router::new();
        router.get("/users/:id", EchoParam("id"));
        let handler = router.into_handler();

        let mut req = Request::synthetic(Method::Get, "/users/42");
        let response = handler.call(&mut req).await;
        assert_eq!(body_text(&response), "42");
    }

    #[tokio::test]
    async fn matches_path_without_query() {
        let mut router = Router::new();
        router.get("/search", Text("found"));
        let handler = router.into_handler();

        let mut req = Request::synthetic(Method::Get, "/search?q=tea");
        let response = handler.call(&mut req).await;
        assert_eq!(body_text(&response), "found");
    }

    #[tokio::test]
    async fn method_not_allowed_when_other_tree_matches() {
        let mut router = Router::new();
        router.get("/home", Text("home"));
        let handler = router.into_handler();

        let mut req = Request::synthetic(Method::Post, "/home");
        let response = handler.call(&mut req).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body_text(&response), "Method Not Allowed");
    }

    #[tokio::test]
    async fn not_found_by_default() {
        let mut router = Router::new();
        router.get("/home", Text("home"));
        let handler = router.into_handler();

        let mut req = Request::synthetic(Method::Get, "/missing");
        let response = handler.call(&mut req).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(&response), "Not Found");
    }

    #[tokio::test]
    async fn custom_not_found_handler() {
        let mut router = Router::new();
        router.not_found(Text("nothing here"));
        let handler = router.into_handler();

        let mut req = Request::synthetic(Method::Get, "/missing");
        let response = handler.call(&mut req).await;
        assert_eq!(body_text(&response), "nothing here");
    }

    #[tokio::test]
    async fn head_emulates_get_with_empty_body() {
        let mut router = Router::new();
        router.get("/page", Text("page body"));
        let handler = router.into_handler();

        let mut req = Request::synthetic(Method::Head, "/page");
        let response = handler.call(&mut req).await;
        assert_eq!(response.status(), StatusCode::OK);
        // same headers as GET, no body
        assert_eq!(response.headers().get("content-length"), "9");
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn any_route_catches_all_methods() {
        let mut router = Router::new();
        router.handle("/anything", Text("any"));
        let handler = router.into_handler();

        for method in [Method::Get, Method::Put, Method::Delete] {
            let mut req = Request::synthetic(method, "/anything");
            let response = handler.call(&mut req).await;
            assert_eq!(body_text(&response), "any");
        }
    }

    #[tokio::test]
    async fn middleware_runs_in_registration_order() {
        struct Tag {
            next: ArcHandler,
            tag: &'static str,
        }

        #[async_trait]
        impl Handler for Tag {
            async fn call(&self, req: &mut Request) -> Response {
                let response = self.next.call(req).await;
                response.with_header("x-trace", self.tag)
            }
        }

        let mut router = Router::new();
        router.get("/", Text("ok"));
        router.use_middleware(Box::new(|next| Arc::new(Tag { next, tag: "first" })));
        router.use_middleware(Box::new(|next| Arc::new(Tag { next, tag: "second" })));
        let handler = router.into_handler();

        let mut req = Request::synthetic(Method::Get, "/");
        let response = handler.call(&mut req).await;
        // first registered runs outermost, so it appends last on the way out
        assert_eq!(response.headers().get("x-trace"), "second, first");
    }

    #[tokio::test]
    async fn preflight_returns_no_content_with_cors_headers() {
        let mut router = Router::new().with_cors(CorsOptions::default());
        router.get("/resource", Text("data"));
        let handler = router.into_handler();

        let mut req = Request::synthetic(Method::Options, "/resource");
        req.headers_mut().add("Origin", "http://example.com");
        req.headers_mut().add("Access-Control-Request-Method", "GET");

        let response = handler.call(&mut req).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers().get("access-control-allow-origin"), "*");
        assert_eq!(response.headers().get("access-control-allow-methods"), "GET");
    }

    #[tokio::test]
    async fn preflight_passthrough_runs_options_route() {
        let mut router = Router::new().with_cors(CorsOptions {
            options_passthrough: true,
            ..Default::default()
        });
        router.options("/resource", Text("custom options"));
        let handler = router.into_handler();

        let mut req = Request::synthetic(Method::Options, "/resource");
        req.headers_mut().add("Origin", "http://example.com");
        req.headers_mut().add("Access-Control-Request-Method", "GET");

        let response = handler.call(&mut req).await;
        assert_eq!(body_text(&response), "custom options");
        assert_eq!(response.headers().get("access-control-allow-origin"), "*");
    }

    #[tokio::test]
    async fn actual_request_gets_cors_headers_merged() {
        let mut router = Router::new().with_cors(CorsOptions::default());
        router.get("/resource", Text("data"));
        let handler = router.into_handler();

        let mut req = Request::synthetic(Method::Get, "/resource");
        req.headers_mut().add("Origin", "http://example.com");

        let response = handler.call(&mut req).await;
        assert_eq!(body_text(&response), "data");
        assert_eq!(response.headers().get("access-control-allow-origin"), "*");
        assert_eq!(response.headers().get("vary"), "Origin");
    }

    #[tokio::test]
    async fn options_without_preflight_headers_is_routed_normally() {
        let mut router = Router::new().with_cors(CorsOptions::default());
        router.options("/resource", Text("plain options"));
        let handler = router.into_handler();

        // no Access-Control-Request-Method: not a preflight
        let mut req = Request::synthetic(Method::Options, "/resource");
        req.headers_mut().add("Origin", "http://example.com");

        let response = handler.call(&mut req).await;
        assert_eq!(body_text(&response), "plain options");
    }
}
