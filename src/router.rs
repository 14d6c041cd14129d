use crate::auth::User;
use crate::error::{Error, Result};
use crate::orm::Db;
/// backbone HTTP router module
///
/// This module provides the routing and HTTP infrastructure the API views
/// are served through. It allows for:
///
/// - Path and parameter-based routing, optionally restricted to one method
/// - Global and route-specific middleware (pre and post)
/// - Named routes, reversible into paths for `Location` headers
/// - Serving everything over axum, or driving `handle` directly in tests
///
use crate::settings::Settings;
use axum::Router as AxumRouter;
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Query};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
pub use axum::http::Method;
pub use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub settings: Settings,
    /// Filled in by the router from its named routes.
    pub urls: Arc<UrlConf>,
}

impl AppState {
    pub fn new(db: Arc<Db>, settings: Settings) -> Self {
        AppState {
            db,
            settings,
            urls: Arc::new(UrlConf::default()),
        }
    }
}

/// Represents the outcome of an HTTP handler.
/// Supports text, JSON, and custom status/headers.
#[derive(Debug, Clone)]
pub struct Response {
    pub status_code: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl Response {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Response {
            status_code,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// Construct a new HTTP 200 response with a text body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    /// Construct a new HTTP 400 response with a text body.
    pub fn bad_request(body: impl Into<String>) -> Self {
        Self::new(400, body)
    }

    /// Construct a new HTTP 403 response with text body.
    pub fn forbidden(body: impl Into<String>) -> Self {
        Self::new(403, body)
    }

    /// Construct a new HTTP 404 "not found" response.
    pub fn not_found() -> Self {
        Self::new(404, "404 Not Found")
    }

    /// Construct an empty HTTP 204 response.
    pub fn no_content() -> Self {
        Self::new(204, "")
    }

    /// Construct a 405 response listing the allowed methods.
    pub fn method_not_allowed(allowed: &[&str]) -> Self {
        Self::new(405, "").with_header("Allow", allowed.join(", "))
    }

    pub fn server_error() -> Self {
        Self::new(500, "500 Internal Server Error")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Construct a new HTTP JSON response.
    /// Accepts any serde-serializable payload, status, and custom headers.
    pub fn json<T: Serialize>(
        data: T,
        status_code: u16,
        mut headers: HashMap<String, String>,
    ) -> Self {
        headers.insert(
            "Content-Type".to_string(),
            "application/json; charset=utf-8".to_string(),
        );
        match serde_json::to_string(&data) {
            Ok(body) => Response {
                status_code,
                body,
                headers,
            },
            Err(e) => {
                log::error!("Response serialization failed: {}", e);
                Response {
                    status_code: 500,
                    body: "{\"error\": \"Serialization failed\"}".to_string(),
                    headers,
                }
            }
        }
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut builder = axum::http::Response::builder().status(status);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        match builder.body(Body::from(self.body)) {
            Ok(response) => response,
            Err(e) => {
                log::error!("Invalid response header: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Holds the current HTTP request and its extracted path parameters.
/// Middleware and handlers can modify/read this context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub params: HashMap<String, String>,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub user: Arc<User>,
    pub start_time: Option<Instant>,
}

impl RequestContext {
    /// Build a context for `method` on `target`, a path with an optional query string.
    pub fn new(method: Method, target: &str) -> Self {
        let uri: Uri = target.parse().unwrap_or_else(|_| Uri::from_static("/"));
        Self::from_uri(method, &uri)
    }

    fn from_uri(method: Method, uri: &Uri) -> Self {
        let query = Query::<HashMap<String, String>>::try_from_uri(uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        RequestContext {
            method,
            path: uri.path().to_string(),
            query,
            params: HashMap::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            user: Arc::new(User::anonymous()),
            start_time: None,
        }
    }

    pub fn from_parts(method: Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> Self {
        let mut ctx = Self::from_uri(method, uri);
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                ctx.headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        ctx.body = body.to_vec();
        ctx
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = Arc::new(user);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Type alias for async handler functions for HTTP routes.
/// Accepts the request context and app state, and returns a Response.
pub type Handler = Arc<
    dyn Fn(RequestContext, AppState) -> Pin<Box<dyn Future<Output = Response> + Send>>
        + Send
        + Sync,
>;

/// Type alias for synchronous, pre-processing middleware executed before the handler.
/// If a middleware returns Some(Response), request handling stops and this response is sent.
pub type Middleware = Arc<dyn Fn(&mut RequestContext) -> Option<Response> + Send + Sync>;

/// Type alias for post-processing middleware executed after the handler.
/// Post-middleware can inspect/modify the response before it is sent.
pub type PostMiddleware = Arc<dyn Fn(&RequestContext, Response) -> Response + Send + Sync>;

/// Represents a registered HTTP route and its associated handler + middleware.
#[derive(Clone)]
pub struct Route {
    pub path_pattern: String,
    /// `None` accepts every method.
    pub method: Option<Method>,
    pub handler: Handler,
    pub middlewares: Vec<Middleware>,
}

/// Route names and their path patterns, for reversing names into paths.
#[derive(Debug, Clone, Default)]
pub struct UrlConf {
    patterns: BTreeMap<String, String>,
}

impl UrlConf {
    pub fn add(&mut self, name: impl Into<String>, pattern: impl Into<String>) {
        self.patterns.insert(name.into(), pattern.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.patterns.contains_key(name)
    }

    /// Fill the pattern's `:param` segments with `args`, in order.
    pub fn reverse(&self, name: &str, args: &[&str]) -> Result<String> {
        let pattern = self
            .patterns
            .get(name)
            .ok_or_else(|| Error::NoReverseMatch(name.to_string()))?;
        let mut args = args.iter();
        let mut segments = Vec::new();
        for segment in pattern.split('/') {
            if segment.starts_with(':') {
                let arg = args
                    .next()
                    .ok_or_else(|| Error::NoReverseMatch(name.to_string()))?;
                segments.push(arg.to_string());
            } else {
                segments.push(segment.to_string());
            }
        }
        if args.next().is_some() {
            return Err(Error::NoReverseMatch(name.to_string()));
        }
        Ok(segments.join("/"))
    }
}

/// The main application router.
/// Manages all HTTP routes and global middleware.
#[derive(Clone)]
pub struct Router {
    pub routes: Vec<Route>,
    pub middlewares: Vec<Middleware>,
    pub post_middlewares: Vec<PostMiddleware>,
    pub app_state: Option<AppState>,
    urls: Arc<UrlConf>,
}

/// Maps status codes to HTTP status text.
pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a new, empty application router.
    pub fn new() -> Self {
        Router {
            routes: Vec::new(),
            middlewares: Vec::new(),
            post_middlewares: Vec::new(),
            app_state: None,
            urls: Arc::new(UrlConf::default()),
        }
    }

    /// Register an HTTP route with path pattern, handler, and any route-specific middleware.
    pub fn add_route(
        &mut self,
        path_pattern: &str,
        handler: Handler,
        middlewares: Vec<Middleware>,
    ) {
        self.routes.push(Route {
            path_pattern: path_pattern.to_string(),
            method: None,
            handler,
            middlewares,
        });
    }

    /// Register a route that only answers `method`.
    pub fn add_method_route(
        &mut self,
        method: Method,
        path_pattern: &str,
        handler: Handler,
        middlewares: Vec<Middleware>,
    ) {
        self.routes.push(Route {
            path_pattern: path_pattern.to_string(),
            method: Some(method),
            handler,
            middlewares,
        });
    }

    /// Register a route under `name` so it can be reversed.
    pub fn add_named_route(
        &mut self,
        name: &str,
        path_pattern: &str,
        handler: Handler,
        middlewares: Vec<Middleware>,
    ) {
        Arc::make_mut(&mut self.urls).add(name, path_pattern);
        self.add_route(path_pattern, handler, middlewares);
    }

    /// Add a global pre-middleware to be run before all HTTP handlers.
    pub fn add_middleware(&mut self, middleware: Middleware) {
        self.middlewares.push(middleware);
    }

    /// Add a post-middleware to be run after each HTTP handler.
    pub fn add_post_middleware(&mut self, middleware: PostMiddleware) {
        self.post_middlewares.push(middleware);
    }

    pub fn set_app_state(&mut self, state: AppState) {
        self.app_state = Some(state);
    }

    pub fn urls(&self) -> &UrlConf {
        self.urls.as_ref()
    }

    /// Run one request through the middleware chain and the matching route.
    pub async fn handle(&self, mut ctx: RequestContext) -> Response {
        let start = Instant::now();
        ctx.start_time = Some(start);

        let Some(mut state) = self.app_state.clone() else {
            log::error!("App state not set in Router");
            return Response::server_error();
        };
        state.urls = self.urls.clone();

        let mut response = self.route(&mut ctx, state).await;

        for post_middleware in &self.post_middlewares {
            response = (post_middleware)(&ctx, response);
        }

        log::info!(
            "{} {} -> {} {} ({} ms)",
            ctx.method,
            ctx.path,
            response.status_code,
            status_text(response.status_code),
            start.elapsed().as_millis()
        );
        response
    }

    async fn route(&self, ctx: &mut RequestContext, state: AppState) -> Response {
        for middleware in &self.middlewares {
            if let Some(response) = (middleware)(ctx) {
                return response;
            }
        }

        let mut allowed: Vec<&str> = Vec::new();
        for route in &self.routes {
            let Some(params) = match_path(&route.path_pattern, &ctx.path) else {
                continue;
            };
            if let Some(method) = &route.method {
                if *method != ctx.method {
                    allowed.push(method.as_str());
                    continue;
                }
            }
            ctx.params = params;
            for middleware in &route.middlewares {
                if let Some(response) = (middleware)(ctx) {
                    return response;
                }
            }
            return (route.handler)(ctx.clone(), state).await;
        }

        if allowed.is_empty() {
            Response::not_found()
        } else {
            Response::method_not_allowed(&allowed)
        }
    }

    /// Wrap the router in an axum application; every request goes through `handle`.
    pub fn into_axum(self) -> AxumRouter {
        let body_limit = self
            .app_state
            .as_ref()
            .map(|state| state.settings.max_body_bytes)
            .unwrap_or_else(|| Settings::default().max_body_bytes);
        let router = Arc::new(self);
        AxumRouter::new()
            .fallback(
                move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
                    let router = router.clone();
                    async move {
                        router
                            .handle(RequestContext::from_parts(method, &uri, &headers, body))
                            .await
                    }
                },
            )
            .layer(DefaultBodyLimit::max(body_limit))
    }

    /// Serve the router over HTTP on the host and port from `settings`.
    pub async fn run(&self, settings: &Settings) -> Result<()> {
        let addr = settings.addr();
        let listener = TcpListener::bind(&addr).await?;
        log::info!("HTTP Server running on http://{}", addr);
        axum::serve(listener, self.clone().into_axum()).await?;
        Ok(())
    }
}

/// Register method-restricted routes:
/// `route!(router, GET "/health" => { health })`.
#[macro_export]
macro_rules! route {
    ($router:expr, $( $method:ident $path:expr => { $handler:expr $(, $middleware:expr )* } ),* $(,)?) => {
        $(
            $router.add_method_route(
                $crate::router::Method::$method,
                $path,
                ::std::sync::Arc::new(
                    move |ctx: $crate::router::RequestContext,
                          state: $crate::router::AppState|
                          -> $crate::router::BoxFuture<'static, $crate::router::Response> {
                        Box::pin($handler(ctx, state))
                    },
                ),
                vec![$($middleware),*]
            );
        )*
    };
}

/// Matches a path pattern (e.g. `/foo/:id`) against a real path,
/// extracting parameters into a HashMap if matched, or None if not.
pub fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_parts: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_parts: Vec<&str> = path.trim_matches('/').split('/').collect();

    if pattern_parts.len() != path_parts.len() {
        return None;
    }

    let mut params = HashMap::new();

    for (p, a) in pattern_parts.iter().zip(path_parts.iter()) {
        if let Some(name) = p.strip_prefix(':') {
            params.insert(name.to_string(), a.to_string());
        } else if p != a {
            return None;
        }
    }

    Some(params)
}
