//! Configuration management for appshell
//!
//! The config file is TOML. Every field has a default, so a missing file
//! produces a working configuration. The default location is platform
//! specific:
//! - Linux: ~/.config/appshell/config.toml
//! - macOS: ~/Library/Application Support/appshell/config.toml
//! - Windows: %APPDATA%\appshell\config.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Config directory not found")]
    NoDirFound,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Login and user controller selection
    #[serde(default)]
    pub auth: AuthConfig,

    /// Site-wide template context and template roots
    #[serde(default)]
    pub site: SiteConfig,

    /// HTML pages, merged over the built-in page table
    #[serde(default)]
    pub web_pages: BTreeMap<String, PageConfig>,

    /// Data pages, merged over the built-in api table
    #[serde(default)]
    pub api_pages: BTreeMap<String, PageConfig>,

    /// Dropdown menus applied at startup
    #[serde(default)]
    pub dropdowns: Vec<DropdownConfig>,

    /// Real-time background handlers
    #[serde(default)]
    pub realtime: Vec<RealtimeHandlerConfig>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_address")]
    pub address: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Debug mode (templates are reloaded on every render)
    #[serde(default)]
    pub debug: bool,

    /// Trust X-Forwarded-For for the logged client address
    #[serde(default)]
    pub behind_proxy: bool,

    /// Allowed CORS origins, "*" allows everything
    #[serde(default = "default_cors_origins")]
    pub cors_allowed_origins: Vec<String>,

    /// Project static directory, relative to the working directory
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// File holding the persisted session secret
    #[serde(default = "default_secret_key_file")]
    pub secret_key_file: PathBuf,

    /// Request log lines containing any of these substrings are dropped
    #[serde(default = "default_web_log_filter")]
    pub web_log_filter: Vec<String>,
}

/// Which user controller backs the login pages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    None,
    Stub,
    Radius,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::None => "none",
            AuthMode::Stub => "stub",
            AuthMode::Radius => "radius",
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,

    #[serde(default = "default_login_page")]
    pub login_page: String,

    #[serde(default = "default_logout_page")]
    pub logout_page: String,

    /// Session cookie lifetime in seconds
    #[serde(default = "default_session_ttl")]
    pub session_ttl: u64,

    /// Required when `mode = "radius"`
    pub radius: Option<RadiusConfig>,
}

/// RADIUS backend parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiusConfig {
    pub host: String,

    pub shared_secret: String,

    #[serde(default = "default_radius_port")]
    pub port: u16,

    /// Usernames allowed to log in; empty allows everyone
    #[serde(default)]
    pub user_table: Vec<String>,

    #[serde(default = "default_radius_retries")]
    pub retries: u32,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_radius_timeout")]
    pub timeout: u64,
}

/// Site configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_title")]
    pub title: String,

    /// Local templates root
    #[serde(default = "default_templates_path")]
    pub templates_path: PathBuf,

    /// Directory holding the bundled base templates
    #[serde(default = "default_base_templates_path")]
    pub base_templates_path: PathBuf,

    /// Name of the base template to overlay, if any
    pub base_template: Option<String>,

    /// Template the pages extend when the local root has no `base.html.j2`
    #[serde(default = "default_site_template")]
    pub site_template: String,

    /// External application directory with its own `templates` and `static`
    pub app_path: Option<PathBuf>,

    /// Extra values exposed under `site` in every template
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// One page-table entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConfig {
    pub routes: Vec<String>,

    #[serde(default = "default_methods")]
    pub methods: Vec<String>,

    #[serde(default)]
    pub login_required: bool,

    /// Page context exposed as `page` when the page renders a template
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Dropdown menu definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropdownConfig {
    #[serde(default = "default_menu_name")]
    pub name: String,

    #[serde(default)]
    pub items: Vec<crate::menus::MenuItem>,
}

/// Direction of a real-time handler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Out,
    In,
}

/// Binds a namespace to a named background handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeHandlerConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub handler: String,

    #[serde(default)]
    pub direction: Direction,
}

// Default value functions
fn default_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    crate::DEFAULT_PORT
}
fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_static_dir() -> PathBuf {
    PathBuf::from(crate::DEFAULT_STATIC_DIR)
}
fn default_secret_key_file() -> PathBuf {
    PathBuf::from(".appshell_secret")
}
fn default_web_log_filter() -> Vec<String> {
    vec!["HEAD /healthz".to_string()]
}
fn default_login_page() -> String {
    "/login.html".to_string()
}
fn default_logout_page() -> String {
    "/logout.html".to_string()
}
fn default_session_ttl() -> u64 {
    43200 // 12 hours
}
fn default_radius_port() -> u16 {
    crate::DEFAULT_RADIUS_PORT
}
fn default_radius_retries() -> u32 {
    3
}
fn default_radius_timeout() -> u64 {
    5
}
fn default_title() -> String {
    "appshell".to_string()
}
fn default_templates_path() -> PathBuf {
    PathBuf::from("templates")
}
fn default_base_templates_path() -> PathBuf {
    PathBuf::from("base_templates")
}
fn default_site_template() -> String {
    "base.html.j2".to_string()
}
fn default_methods() -> Vec<String> {
    vec!["GET".to_string()]
}
fn default_menu_name() -> String {
    "Menu".to_string()
}
fn default_namespace() -> String {
    "default".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            debug: false,
            behind_proxy: false,
            cors_allowed_origins: default_cors_origins(),
            static_dir: default_static_dir(),
            secret_key_file: default_secret_key_file(),
            web_log_filter: default_web_log_filter(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            login_page: default_login_page(),
            logout_page: default_logout_page(),
            session_ttl: default_session_ttl(),
            radius: None,
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            templates_path: default_templates_path(),
            base_templates_path: default_base_templates_path(),
            base_template: None,
            site_template: default_site_template(),
            app_path: None,
            data: serde_json::Map::new(),
        }
    }
}

impl PageConfig {
    pub fn new<I, S>(routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            routes: routes.into_iter().map(Into::into).collect(),
            methods: default_methods(),
            login_required: false,
            data: serde_json::Map::new(),
        }
    }
}

impl Config {
    /// Get config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join("appshell"))
            .ok_or(ConfigError::NoDirFound)
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load config from specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse config from a TOML document
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
