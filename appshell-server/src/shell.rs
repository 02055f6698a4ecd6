//! Application shell: configuration, route installation and lifecycle
//!
//! ```text
//! Uninitialized --initialize--> Initializing --> Running --serve--> Stopped
//!                                    ^              |
//!                                    +--initialize--+
//! ```
//!
//! Every initialization rebuilds the whole application from the owned
//! configuration: site data, template layers, static file map, user
//! controller, page routes, the real-time hub and a fresh shutdown token.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    handler::Handler,
    http::{HeaderValue, Method},
    middleware,
    routing::{MethodFilter, MethodRouter, get, on},
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use appshell_core::config::{AuthConfig, AuthMode, Config, PageConfig};
use appshell_core::pages::{HEALTHZ, SHUTDOWN_SERVER, WEB_HOME};
use appshell_core::radius::RadiusUserController;
use appshell_core::secret;
use appshell_core::users::StubUserController;
use appshell_core::{
    MenuItem, PageRegistry, SessionKeys, SiteData, StaticFileMap, TemplateEngine, UserController,
};

use crate::error::ShellError;
use crate::handlers;
use crate::realtime::{self, RealtimeHandler, RealtimeHub};
use crate::request_log::{RequestLog, request_logging};
use crate::session;
use crate::state::AppState;

const REALTIME_ROUTE: &str = "/ws/{namespace}";

/// Builds the method router for a page given its allowed methods
pub type PageHandler = Arc<dyn Fn(MethodFilter) -> MethodRouter<AppState> + Send + Sync>;

/// Lifecycle phase of the shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Uninitialized,
    Initializing,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Default)]
enum ConfigSource {
    /// Platform config file if present, defaults otherwise
    #[default]
    Default,
    /// Explicit file that must exist and parse
    File(PathBuf),
    Owned(Config),
}

#[derive(Debug, Clone)]
enum MenuOp {
    Add {
        name: String,
        items: Vec<MenuItem>,
        replace: bool,
    },
    Remove(String),
}

/// Collects handlers and defaults before the first initialization
pub struct AppShellBuilder {
    source: ConfigSource,
    handlers: BTreeMap<String, PageHandler>,
    web_defaults: BTreeMap<String, PageConfig>,
    api_defaults: BTreeMap<String, PageConfig>,
    realtime: BTreeMap<String, RealtimeHandler>,
    menus: Vec<MenuOp>,
}

impl Default for AppShellBuilder {
    fn default() -> Self {
        Self {
            source: ConfigSource::Default,
            handlers: BTreeMap::new(),
            web_defaults: BTreeMap::new(),
            api_defaults: BTreeMap::new(),
            realtime: BTreeMap::new(),
            menus: Vec::new(),
        }
        .page(WEB_HOME, handlers::web_home)
        .page(HEALTHZ, handlers::healthz)
    }
}

impl AppShellBuilder {
    /// Read the configuration from `path` on every initialization
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = ConfigSource::File(path.into());
        self
    }

    /// Use an in-memory configuration
    pub fn config(mut self, config: Config) -> Self {
        self.source = ConfigSource::Owned(config);
        self
    }

    /// Register the handler serving page `name`
    pub fn page<H, T>(mut self, name: &str, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        let make = move |filter: MethodFilter| -> MethodRouter<AppState> { on(filter, handler.clone()) };
        self.handlers.insert(name.to_string(), Arc::new(make));
        self
    }

    /// Add a web page to the page table; configuration may still
    /// replace the entry
    pub fn web_page<H, T>(mut self, name: &str, page: PageConfig, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.web_defaults.insert(name.to_string(), page);
        self.page(name, handler)
    }

    /// Add an api page to the page table
    pub fn api_page<H, T>(mut self, name: &str, page: PageConfig, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.api_defaults.insert(name.to_string(), page);
        self.page(name, handler)
    }

    /// Register a background handler that `[[realtime]]` entries can
    /// refer to by name
    pub fn realtime(mut self, name: &str, handler: RealtimeHandler) -> Self {
        self.realtime.insert(name.to_string(), handler);
        self
    }

    /// Add or merge a dropdown menu after the configured ones
    pub fn dropdown(mut self, name: &str, items: Vec<MenuItem>, replace: bool) -> Self {
        self.menus.push(MenuOp::Add {
            name: name.to_string(),
            items,
            replace,
        });
        self
    }

    pub fn remove_dropdown(mut self, name: &str) -> Self {
        self.menus.push(MenuOp::Remove(name.to_string()));
        self
    }

    /// Construct the shell and initialize it
    pub fn build(self) -> Result<AppShell, ShellError> {
        let mut shell = AppShell {
            builder: self,
            phase: ShellState::Uninitialized,
            state: None,
            router: None,
        };
        shell.initialize()?;
        Ok(shell)
    }
}

/// The application shell
pub struct AppShell {
    builder: AppShellBuilder,
    phase: ShellState,
    state: Option<AppState>,
    router: Option<Router>,
}

impl AppShell {
    pub fn builder() -> AppShellBuilder {
        AppShellBuilder::default()
    }

    pub fn phase(&self) -> ShellState {
        self.phase
    }

    pub fn state(&self) -> Option<&AppState> {
        self.state.as_ref()
    }

    /// Token the shutdown endpoint currently accepts
    pub fn shutdown_token(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.shutdown_token.as_ref())
    }

    /// Tear down and rebuild everything from the configuration
    pub fn initialize(&mut self) -> Result<(), ShellError> {
        self.stop();
        self.phase = ShellState::Initializing;
        self.state = None;
        self.router = None;

        let built = self
            .build_state()
            .and_then(|state| self.build_router(&state).map(|router| (state, router)));
        match built {
            Ok((state, router)) => {
                tracing::info!("{}: initialized", state.info_str());
                self.state = Some(state);
                self.router = Some(router);
                self.phase = ShellState::Running;
                Ok(())
            }
            Err(e) => {
                self.phase = ShellState::Uninitialized;
                Err(e)
            }
        }
    }

    fn load_config(&self) -> Result<Config, ShellError> {
        Ok(match &self.builder.source {
            ConfigSource::Default => Config::load()?,
            ConfigSource::File(path) => {
                tracing::info!("Loading configuration from {}", path.display());
                Config::load_from(path)?
            }
            ConfigSource::Owned(config) => config.clone(),
        })
    }

    fn build_state(&self) -> Result<AppState, ShellError> {
        let config = self.load_config()?;

        let mut site = SiteData::from_config(&config);
        for op in &self.builder.menus {
            match op {
                MenuOp::Add {
                    name,
                    items,
                    replace,
                } => site.add_dropdown(name, items.clone(), *replace),
                MenuOp::Remove(name) => site.remove_dropdown(name),
            }
        }

        let templates = TemplateEngine::new(site.template_layers(), config.server.debug)?;
        let static_files = StaticFileMap::scan(&site.static_roots(&config.server.static_dir));
        tracing::info!("Registered {} static files", static_files.len());

        let secret = secret::load_or_generate(&config.server.secret_key_file)?;
        let sessions = SessionKeys::new(&secret, config.auth.session_ttl);
        let users = user_controller(&config.auth)?;
        tracing::info!("User controller: {}", users.describe());

        let pages = PageRegistry::with_defaults(&self.builder.web_defaults, &self.builder.api_defaults, &config);
        let hub = RealtimeHub::new(&config.realtime, &self.builder.realtime);

        let shutdown_token: Arc<str> = uuid::Uuid::new_v4().to_string().into();
        tracing::debug!(
            "Shutdown endpoint UUID: {}. Shutdown server with POST to /shutdown_server with form encoded 'UUID' parameter and value.",
            shutdown_token
        );

        Ok(AppState {
            config: Arc::new(config),
            site: Arc::new(site),
            pages: Arc::new(pages),
            templates,
            static_files: Arc::new(static_files),
            users,
            sessions: Arc::new(sessions),
            shutdown_token,
            hub,
        })
    }

    fn build_router(&self, state: &AppState) -> Result<Router, ShellError> {
        let config = &state.config;
        let auth_enabled = config.auth.mode != AuthMode::None;
        let mut seen = HashSet::new();
        claim_route(&mut seen, "realtime", REALTIME_ROUTE)?;
        let mut router: Router<AppState> = Router::new();

        for (name, entry) in state.pages.iter() {
            let make = if name == SHUTDOWN_SERVER {
                shutdown_handler()
            } else {
                self.builder
                    .handlers
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ShellError::MissingHandler(name.to_string()))?
            };

            let mut method_router = make(method_filter(name, &entry.methods)?);
            if entry.login_required && auth_enabled {
                method_router =
                    method_router.route_layer(middleware::from_fn_with_state(state.clone(), session::require_login));
            }
            for route in &entry.routes {
                claim_route(&mut seen, name, route)?;
                tracing::debug!("Adding route {} -> {}", route, name);
                router = router.route(route, method_router.clone());
            }
        }

        if auth_enabled {
            claim_route(&mut seen, "login", &config.auth.login_page)?;
            claim_route(&mut seen, "logout", &config.auth.logout_page)?;
            router = router
                .route(
                    &config.auth.login_page,
                    get(session::login_page).post(session::login_submit),
                )
                .route(&config.auth.logout_page, get(session::logout).post(session::logout));
        }

        let request_log = RequestLog::new(&config.server.web_log_filter, config.server.behind_proxy);
        Ok(router
            .route(REALTIME_ROUTE, get(realtime::ws_handler))
            .fallback(handlers::static_file)
            .layer(middleware::from_fn_with_state(request_log, request_logging))
            .layer(cors_layer(&config.server.cors_allowed_origins))
            .layer(TraceLayer::new_for_http())
            .with_state(state.clone()))
    }

    /// The router of the current initialization
    pub fn router(&self) -> Result<Router, ShellError> {
        self.router.clone().ok_or(ShellError::NotInitialized)
    }

    /// Serve on `listener` until Ctrl-C or a remote shutdown
    pub async fn serve(&mut self, listener: TcpListener) -> Result<(), ShellError> {
        let router = self.router()?;
        let state = self.state.clone().ok_or(ShellError::NotInitialized)?;
        tracing::info!("{} listening on {}", state.info_str(), listener.local_addr()?);

        let hub = state.hub.clone();
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("CTRL+C Caught. Closing...");
                        hub.stop();
                    }
                    _ = hub.stopped() => {}
                }
            })
            .await?;

        self.stop();
        Ok(())
    }

    /// Bind the configured address and serve
    pub async fn start(&mut self) -> Result<(), ShellError> {
        let server = &self
            .state
            .as_ref()
            .ok_or(ShellError::NotInitialized)?
            .config
            .server;
        let listener = TcpListener::bind((server.address.as_str(), server.port)).await?;
        self.serve(listener).await
    }

    /// Stop the real-time channel. Safe to call in any phase.
    pub fn stop(&mut self) {
        if let Some(state) = &self.state {
            state.hub.stop();
            self.phase = ShellState::Stopped;
        }
    }
}

impl Drop for AppShell {
    fn drop(&mut self) {
        self.stop();
    }
}

fn shutdown_handler() -> PageHandler {
    Arc::new(|filter: MethodFilter| -> MethodRouter<AppState> { on(filter, handlers::shutdown_server) })
}

fn user_controller(auth: &AuthConfig) -> Result<Arc<dyn UserController>, ShellError> {
    match auth.mode {
        AuthMode::Radius => {
            let radius = auth.radius.as_ref().ok_or(ShellError::MissingRadiusConfig)?;
            Ok(Arc::new(RadiusUserController::new(radius)))
        }
        AuthMode::None | AuthMode::Stub => Ok(Arc::new(StubUserController)),
    }
}

fn method_filter(page: &str, methods: &[String]) -> Result<MethodFilter, ShellError> {
    let invalid = |method: &str| ShellError::InvalidMethod {
        page: page.to_string(),
        method: method.to_string(),
    };

    let mut filter: Option<MethodFilter> = None;
    for name in methods {
        let method = Method::from_bytes(name.as_bytes()).map_err(|_| invalid(name))?;
        let single = MethodFilter::try_from(method).map_err(|_| invalid(name))?;
        filter = Some(match filter {
            Some(f) => f.or(single),
            None => single,
        });
    }
    Ok(filter.unwrap_or(MethodFilter::GET))
}

/// Route shape as the router matches it: every `{capture}` becomes `{}`,
/// so routes differing only in capture names compare equal
fn route_shape(route: &str) -> String {
    let mut shape = String::with_capacity(route.len());
    let mut in_capture = false;
    for c in route.chars() {
        match c {
            '{' if !in_capture => {
                in_capture = true;
                shape.push('{');
            }
            '}' if in_capture => {
                in_capture = false;
                shape.push('}');
            }
            _ if in_capture => {}
            _ => shape.push(c),
        }
    }
    shape
}

/// Reject routes the router cannot take and routes already in use
fn claim_route(seen: &mut HashSet<String>, page: &str, route: &str) -> Result<(), ShellError> {
    let invalid = |reason| ShellError::InvalidRoute {
        page: page.to_string(),
        route: route.to_string(),
        reason,
    };
    if !route.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if route
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*') || segment.starts_with("{*"))
    {
        return Err(invalid("use {param} captures"));
    }
    if !seen.insert(route_shape(route)) {
        return Err(ShellError::DuplicateRoute {
            page: page.to_string(),
            route: route.to_string(),
        });
    }
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_shape_ignores_capture_names() {
        assert_eq!(route_shape("/item/{id}"), route_shape("/item/{name}"));
        assert_eq!(route_shape("/ws/{ns}"), REALTIME_ROUTE.replace("namespace", ""));
        assert_ne!(route_shape("/item/{id}"), route_shape("/item/id"));
    }

    #[test]
    fn test_claim_route_conflicts() {
        let mut seen = HashSet::new();
        claim_route(&mut seen, "realtime", REALTIME_ROUTE).unwrap();
        claim_route(&mut seen, "item", "/item/{id}").unwrap();

        assert!(matches!(
            claim_route(&mut seen, "other", "/item/{name}"),
            Err(ShellError::DuplicateRoute { .. })
        ));
        assert!(matches!(
            claim_route(&mut seen, "live", "/ws/{channel}"),
            Err(ShellError::DuplicateRoute { .. })
        ));
        assert!(matches!(
            claim_route(&mut seen, "files", "/files/{*path}"),
            Err(ShellError::InvalidRoute { .. })
        ));
        claim_route(&mut seen, "live", "/ws/live").unwrap();
    }
}
