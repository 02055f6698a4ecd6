//! Page registry: logical page names mapped to routes, methods and the
//! context a page renders with.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::{Config, PageConfig};

/// Name of the built-in home page
pub const WEB_HOME: &str = "web_home";
/// Name of the built-in health check
pub const HEALTHZ: &str = "healthz";
/// Name of the built-in remote shutdown endpoint
pub const SHUTDOWN_SERVER: &str = "shutdown_server";

/// Whether a page produces HTML or data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Web,
    Api,
}

/// A registered page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageEntry {
    pub kind: PageKind,
    pub routes: Vec<String>,
    /// Upper-cased HTTP method names
    pub methods: Vec<String>,
    pub login_required: bool,
    /// Render context exposed as `page`
    pub data: Map<String, Value>,
}

impl PageEntry {
    fn from_config(kind: PageKind, config: &PageConfig) -> Self {
        Self {
            kind,
            routes: config.routes.clone(),
            methods: config.methods.iter().map(|m| m.to_ascii_uppercase()).collect(),
            login_required: config.login_required,
            data: config.data.clone(),
        }
    }

    fn builtin(routes: &[&str], methods: &[&str]) -> Self {
        Self {
            kind: PageKind::Web,
            routes: routes.iter().map(|r| r.to_string()).collect(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            login_required: false,
            data: Map::new(),
        }
    }
}

/// Web and api pages, keyed by page name
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageRegistry {
    web: BTreeMap<String, PageEntry>,
    api: BTreeMap<String, PageEntry>,
}

impl PageRegistry {
    /// Built-in pages only
    pub fn builtin() -> Self {
        let mut web = BTreeMap::new();
        web.insert(
            WEB_HOME.to_string(),
            PageEntry::builtin(&["/", "/index.html", "/default.html"], &["GET"]),
        );
        web.insert(HEALTHZ.to_string(), PageEntry::builtin(&["/healthz"], &["GET"]));
        Self {
            web,
            api: BTreeMap::new(),
        }
    }

    /// Built-in pages overlaid with the configured tables. A configured
    /// entry replaces a built-in entry of the same name; the shutdown
    /// endpoint is always present and cannot be overridden.
    pub fn from_config(config: &Config) -> Self {
        Self::with_defaults(&BTreeMap::new(), &BTreeMap::new(), config)
    }

    /// Like [`PageRegistry::from_config`], with application defaults
    /// layered between the built-in pages and the configuration
    pub fn with_defaults(
        web_defaults: &BTreeMap<String, PageConfig>,
        api_defaults: &BTreeMap<String, PageConfig>,
        config: &Config,
    ) -> Self {
        let mut registry = Self::builtin();
        for (name, page) in web_defaults {
            registry.insert(name, PageEntry::from_config(PageKind::Web, page));
        }
        for (name, page) in api_defaults {
            registry.insert(name, PageEntry::from_config(PageKind::Api, page));
        }
        for (name, page) in &config.web_pages {
            registry.insert(name, PageEntry::from_config(PageKind::Web, page));
        }
        for (name, page) in &config.api_pages {
            registry.insert(name, PageEntry::from_config(PageKind::Api, page));
        }
        registry.insert(
            SHUTDOWN_SERVER,
            PageEntry::builtin(&["/shutdown_server"], &["POST"]),
        );
        registry
    }

    /// Insert or replace an entry in the table matching its kind
    pub fn insert(&mut self, name: &str, entry: PageEntry) {
        match entry.kind {
            PageKind::Web => {
                self.api.remove(name);
                self.web.insert(name.to_string(), entry);
            }
            PageKind::Api => {
                self.web.remove(name);
                self.api.insert(name.to_string(), entry);
            }
        }
    }

    /// Look a page up in the web table, then the api table
    pub fn get(&self, name: &str) -> Option<&PageEntry> {
        self.web.get(name).or_else(|| self.api.get(name))
    }

    /// Page context for a page, empty when the page has none or is unknown
    pub fn context(&self, name: &str) -> Value {
        self.get(name)
            .map(|p| Value::Object(p.data.clone()))
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// All pages, web first
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PageEntry)> {
        self.web
            .iter()
            .chain(self.api.iter())
            .map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.web.len() + self.api.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtin_pages() {
        let registry = PageRegistry::from_config(&Config::default());
        assert_eq!(registry.get(WEB_HOME).unwrap().routes.len(), 3);
        assert_eq!(registry.get(HEALTHZ).unwrap().routes, vec!["/healthz"]);
        assert_eq!(registry.get(SHUTDOWN_SERVER).unwrap().methods, vec!["POST"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_config_replaces_builtin_entry() {
        let mut config = Config::default();
        let mut home = PageConfig::new(["/home"]);
        home.data.insert("title".into(), "Welcome".into());
        config.web_pages.insert(WEB_HOME.into(), home);

        let registry = PageRegistry::from_config(&config);
        assert_eq!(registry.get(WEB_HOME).unwrap().routes, vec!["/home"]);
        assert_eq!(registry.context(WEB_HOME)["title"], "Welcome");
    }

    #[test]
    fn test_api_pages_and_methods() {
        let mut config = Config::default();
        let mut status = PageConfig::new(["/api/status"]);
        status.methods = vec!["get".into(), "post".into()];
        config.api_pages.insert("api_status".into(), status);

        let registry = PageRegistry::from_config(&config);
        let entry = registry.get("api_status").unwrap();
        assert_eq!(entry.kind, PageKind::Api);
        assert_eq!(entry.methods, vec!["GET", "POST"]);
    }

    #[test]
    fn test_shutdown_cannot_be_overridden() {
        let mut config = Config::default();
        config
            .web_pages
            .insert(SHUTDOWN_SERVER.into(), PageConfig::new(["/stop"]));

        let registry = PageRegistry::from_config(&config);
        assert_eq!(
            registry.get(SHUTDOWN_SERVER).unwrap().routes,
            vec!["/shutdown_server"]
        );
    }

    #[test]
    fn test_config_overrides_application_defaults() {
        let mut defaults = BTreeMap::new();
        defaults.insert("reports".to_string(), PageConfig::new(["/reports"]));
        let mut api = BTreeMap::new();
        api.insert("api_reports".to_string(), PageConfig::new(["/api/reports"]));

        let mut config = Config::default();
        config
            .web_pages
            .insert("reports".into(), PageConfig::new(["/r", "/reports.html"]));

        let registry = PageRegistry::with_defaults(&defaults, &api, &config);
        assert_eq!(registry.get("reports").unwrap().routes, vec!["/r", "/reports.html"]);
        assert_eq!(registry.get("api_reports").unwrap().kind, PageKind::Api);
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_unknown_page_context_is_empty() {
        let registry = PageRegistry::builtin();
        assert_eq!(registry.context("missing"), Value::Object(Map::new()));
    }
}
