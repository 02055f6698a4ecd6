//! Layered template resolution
//!
//! Three template roots are searched in priority order:
//! 1. the local templates root
//! 2. the external app's `templates` directory
//! 3. the selected base template's `templates` directory
//!
//! Every template is registered in Tera under its layer-qualified name
//! (`_app/...`, `_base_template/...`, or the bare name for the local
//! layer) and under its bare name, with higher layers overwriting lower
//! ones. `{% extends "base.html.j2" %}` therefore picks the same layer
//! `resolve` does, and a local template can still reach a shadowed one
//! through its qualified name. Files that are not UTF-8 or do not parse
//! are skipped with a warning.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tera::{Context, Template, Tera};
use thiserror::Error;

use crate::files::list_files;

const AUTOESCAPE_SUFFIXES: [&str; 4] = [".html", ".htm", ".xml", ".j2"];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found in any layer: {0}")]
    NotFound(String),

    #[error("Template error: {0}")]
    Tera(#[from] tera::Error),
}

/// Which root a template came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Local,
    App,
    Base,
}

impl LayerKind {
    /// Prefix of the qualified template name
    pub fn prefix(&self) -> &'static str {
        match self {
            LayerKind::Local => "",
            LayerKind::App => "_app/",
            LayerKind::Base => "_base_template/",
        }
    }
}

/// A template root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateLayer {
    pub kind: LayerKind,
    pub root: PathBuf,
}

impl TemplateLayer {
    pub fn contains(&self, name: &str) -> bool {
        self.root.join(name).is_file()
    }

    pub fn qualified_name(&self, name: &str) -> String {
        format!("{}{}", self.kind.prefix(), name)
    }
}

/// Template roots in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateLayers {
    layers: Vec<TemplateLayer>,
}

impl TemplateLayers {
    /// Build the layer list. The app layer is skipped when it points at
    /// the local root.
    pub fn new(local: PathBuf, app: Option<PathBuf>, base: Option<PathBuf>) -> Self {
        let mut layers = vec![TemplateLayer {
            kind: LayerKind::Local,
            root: local,
        }];
        if let Some(app) = app.filter(|a| *a != layers[0].root) {
            layers.push(TemplateLayer {
                kind: LayerKind::App,
                root: app,
            });
        }
        if let Some(base) = base {
            layers.push(TemplateLayer {
                kind: LayerKind::Base,
                root: base,
            });
        }
        Self { layers }
    }

    /// First layer holding `name`. Names escaping the root never resolve.
    pub fn resolve(&self, name: &str) -> Option<&TemplateLayer> {
        if !is_relative_name(name) {
            return None;
        }
        self.layers.iter().find(|layer| layer.contains(name))
    }

    pub fn layer(&self, kind: LayerKind) -> Option<&TemplateLayer> {
        self.layers.iter().find(|l| l.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TemplateLayer> {
        self.layers.iter()
    }

    /// Load every layer into a fresh Tera instance
    fn load(&self) -> Result<Tera, TemplateError> {
        let mut sources: Vec<(String, String)> = Vec::new();

        // Lowest priority first so bare names end up bound to the top layer
        for layer in self.layers.iter().rev() {
            let root = std::path::absolute(&layer.root).unwrap_or_else(|_| layer.root.clone());
            for path in list_files(&root) {
                let Some(name) = template_name(&root, &path) else {
                    continue;
                };
                let Some(source) = read_template(&name, &path) else {
                    continue;
                };
                if layer.kind != LayerKind::Local {
                    sources.push((layer.qualified_name(&name), source.clone()));
                }
                sources.push((name, source));
            }
        }

        let mut tera = Tera::default();
        tera.autoescape_on(AUTOESCAPE_SUFFIXES.to_vec());
        tera.add_raw_templates(sources)?;
        Ok(tera)
    }
}

/// Source of a template file, or None when it cannot be a template
fn read_template(name: &str, path: &Path) -> Option<String> {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!("Skipping template {}: {}", path.display(), e);
            return None;
        }
    };
    if let Err(e) = Template::new(name, None, &source) {
        tracing::warn!("Skipping template {} ({}): {}", name, path.display(), e);
        return None;
    }
    Some(source)
}

/// Template name of `path` relative to `root`, always '/'-separated
fn template_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

fn is_relative_name(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// A Tera wrapper over the template layers that can reload in debug mode
#[derive(Clone)]
pub enum TemplateEngine {
    /// Templates loaded once at startup
    Static {
        layers: TemplateLayers,
        tera: Arc<Tera>,
    },
    /// Templates reloaded before each render
    Reloadable {
        layers: TemplateLayers,
        cached: Arc<RwLock<Tera>>,
    },
}

impl TemplateEngine {
    pub fn new(layers: TemplateLayers, reload: bool) -> Result<Self, TemplateError> {
        let tera = layers.load()?;
        if reload {
            tracing::info!("Template hot reload enabled (debug mode)");
            Ok(Self::Reloadable {
                layers,
                cached: Arc::new(RwLock::new(tera)),
            })
        } else {
            tracing::info!("Templates loaded once");
            Ok(Self::Static {
                layers,
                tera: Arc::new(tera),
            })
        }
    }

    pub fn layers(&self) -> &TemplateLayers {
        match self {
            Self::Static { layers, .. } | Self::Reloadable { layers, .. } => layers,
        }
    }

    /// Resolve `name` through the layers and render it
    pub fn render(&self, name: &str, context: &Context) -> Result<String, TemplateError> {
        let layer = self
            .layers()
            .resolve(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
        let qualified = layer.qualified_name(name);
        tracing::debug!("Rendering {} from {:?} layer", name, layer.kind);

        match self {
            Self::Static { tera, .. } => Ok(tera.render(&qualified, context)?),
            Self::Reloadable { layers, cached } => {
                match layers.load() {
                    Ok(fresh) => {
                        if let Ok(mut guard) = cached.write() {
                            *guard = fresh;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to reload templates: {}. Using cached version.", e);
                    }
                }
                let guard = cached.read().unwrap_or_else(|poisoned| poisoned.into_inner());
                Ok(guard.render(&qualified, context)?)
            }
        }
    }
}
