//! Shared server state

use std::sync::Arc;

use serde_json::Value;
use tera::Context;

use appshell_core::config::Config;
use appshell_core::{PageRegistry, SessionKeys, SiteData, StaticFileMap, TemplateEngine, UserController};

use crate::error::ShellError;
use crate::realtime::RealtimeHub;

/// Shared application state, rebuilt on every initialization
#[derive(Clone)]
pub struct AppState {
    /// The configuration this state was built from
    pub config: Arc<Config>,

    /// Site-wide template context
    pub site: Arc<SiteData>,

    /// Web and api page tables
    pub pages: Arc<PageRegistry>,

    /// Layered template engine
    pub templates: TemplateEngine,

    /// Discovered static files
    pub static_files: Arc<StaticFileMap>,

    /// Backend used by the login pages
    pub users: Arc<dyn UserController>,

    /// Session token signing
    pub sessions: Arc<SessionKeys>,

    /// Token a remote shutdown request must carry
    pub shutdown_token: Arc<str>,

    /// Real-time channel
    pub hub: RealtimeHub,
}

impl AppState {
    /// Render `template` with the page context registered for `page`
    pub fn render(&self, template: &str, page: &str, extra: Context) -> Result<String, ShellError> {
        self.render_with_page(template, self.pages.context(page), extra)
    }

    /// Render `template` with an explicit page context
    pub fn render_with_page(&self, template: &str, page: Value, extra: Context) -> Result<String, ShellError> {
        let mut context = Context::new();
        context.insert("site", self.site.as_ref());
        context.insert("page", &page);
        context.extend(extra);
        Ok(self.templates.render(template, &context)?)
    }

    /// True when any template layer holds `template`
    pub fn has_template(&self, template: &str) -> bool {
        self.templates.layers().resolve(template).is_some()
    }

    /// Name used in log lines
    pub fn info_str(&self) -> String {
        format!(
            "appshell ({}:{}){}",
            self.config.server.address,
            self.config.server.port,
            if self.config.server.debug { ":DEBUG" } else { "" }
        )
    }
}
