//! appshell-core: Shared library for the appshell web application shell
//!
//! This crate provides:
//! - TOML configuration with defaults for every field
//! - Site data, page registry and dropdown menus
//! - Layered template resolution (local, app, base template)
//! - Static file discovery
//! - User controllers (stub and RADIUS) and JWT session tokens
//! - WebSocket protocol types for the real-time channel

pub mod auth;
pub mod config;
pub mod files;
pub mod menus;
pub mod pages;
pub mod protocol;
pub mod radius;
pub mod safe;
pub mod secret;
pub mod site;
pub mod static_files;
pub mod templates;
pub mod users;

pub use auth::{SessionClaims, SessionKeys};
pub use config::Config;
pub use menus::{DropdownMenu, DropdownMenus, MenuItem};
pub use pages::{PageEntry, PageKind, PageRegistry};
pub use protocol::{ClientMessage, ServerMessage};
pub use safe::{is_safe, is_safe_url};
pub use site::SiteData;
pub use static_files::{StaticFileMap, StaticRoot};
pub use templates::{TemplateEngine, TemplateLayers};
pub use users::{Identity, UserController};

/// Default HTTP port for appshell-server
pub const DEFAULT_PORT: u16 = 8080;

/// Length in bytes of the persisted session secret
pub const SECRET_KEY_LENGTH: usize = 128;

/// Default static directory, relative to the working directory
pub const DEFAULT_STATIC_DIR: &str = "static";

/// Default RADIUS authentication port
pub const DEFAULT_RADIUS_PORT: u16 = 1812;
