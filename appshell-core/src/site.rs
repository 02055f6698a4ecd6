//! Site-wide template context
//!
//! `SiteData` is exposed to every template as `site`. It is built once
//! per initialization from the configuration and then only changed
//! through the dropdown menu registry.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::{AuthMode, Config};
use crate::menus::{DropdownMenus, MenuItem};
use crate::static_files::StaticRoot;
use crate::templates::TemplateLayers;

/// Name of the local template that, when present, replaces the base
/// template's site template.
const LOCAL_SITE_TEMPLATE: &str = "base.html.j2";

#[derive(Debug, Clone, Serialize)]
pub struct SiteData {
    pub title: String,
    pub debug: bool,
    /// Selected base template, `None` when unset or unavailable
    pub base_template: Option<String>,
    /// Template pages are expected to extend
    pub site_template: Option<String>,
    /// Auth mode name, `None` when login is disabled
    pub auth: Option<String>,
    pub login_page: Option<String>,
    pub logout_page: Option<String>,
    pub dropdowns: DropdownMenus,
    pub templates_path: PathBuf,
    pub app_path: Option<PathBuf>,
    #[serde(skip)]
    base_templates_path: PathBuf,
    /// Free-form values from `[site.data]`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SiteData {
    pub fn from_config(config: &Config) -> Self {
        let site = &config.site;
        let available = available_base_templates(&site.base_templates_path);

        let base_template = match &site.base_template {
            Some(name) if available.contains(name) => Some(name.clone()),
            Some(name) => {
                tracing::warn!(
                    "Base template '{}' not found under {} (available: {:?})",
                    name,
                    site.base_templates_path.display(),
                    available
                );
                None
            }
            None => None,
        };

        let templates_path = absolute(&site.templates_path);
        let site_template = if templates_path.join(LOCAL_SITE_TEMPLATE).is_file() {
            Some(LOCAL_SITE_TEMPLATE.to_string())
        } else {
            base_template
                .as_ref()
                .map(|_| format!("_base_template/{}", site.site_template))
        };

        let (auth, login_page, logout_page) = match config.auth.mode {
            AuthMode::None => (None, None, None),
            mode => (
                Some(mode.as_str().to_string()),
                Some(config.auth.login_page.clone()),
                Some(config.auth.logout_page.clone()),
            ),
        };

        let mut data = Self {
            title: site.title.clone(),
            debug: config.server.debug,
            base_template,
            site_template,
            auth,
            login_page,
            logout_page,
            dropdowns: DropdownMenus::new(),
            templates_path,
            app_path: site.app_path.as_deref().map(absolute),
            base_templates_path: absolute(&site.base_templates_path),
            extra: site.data.clone(),
        };
        for menu in &config.dropdowns {
            data.add_dropdown(&menu.name, menu.items.clone(), true);
        }
        data
    }

    pub fn add_dropdown(&mut self, name: &str, items: Vec<MenuItem>, replace: bool) {
        self.dropdowns.add(name, items, replace);
    }

    pub fn remove_dropdown(&mut self, name: &str) {
        self.dropdowns.remove(name);
    }

    /// Directory of the selected base template
    pub fn base_template_dir(&self) -> Option<PathBuf> {
        self.base_template
            .as_ref()
            .map(|name| self.base_templates_path.join(name))
    }

    /// Template layers in priority order: local, app, base template
    pub fn template_layers(&self) -> TemplateLayers {
        TemplateLayers::new(
            self.templates_path.clone(),
            self.app_path.as_ref().map(|p| p.join("templates")),
            self.base_template_dir().map(|p| p.join("templates")),
        )
    }

    /// Static roots in scan order: base template, app, project
    pub fn static_roots(&self, project_static: &Path) -> Vec<StaticRoot> {
        let mut roots = Vec::new();
        if let Some(base) = self.base_template_dir() {
            roots.push(StaticRoot::new("base_template", base.join("static")));
        }
        if let Some(app) = &self.app_path {
            roots.push(StaticRoot::new("app", app.join("static")));
        }
        roots.push(StaticRoot::new("project", absolute(project_static)));
        roots
    }
}

/// Base templates are the directories under `path` that contain a
/// `templates` directory.
pub fn available_base_templates(path: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(path) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().join("templates").is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
