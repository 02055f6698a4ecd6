//! Static file discovery
//!
//! Each static root is scanned with [`list_files`] and every file gets a
//! route equal to its path below the root. Roots are scanned in the
//! order given (base template, app, project); when two roots provide
//! the same route the later root wins, so the project's own static
//! directory overrides the app, which overrides the base template.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::files::list_files;

/// A directory whose files are served as individual routes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRoot {
    pub label: &'static str,
    pub dir: PathBuf,
}

impl StaticRoot {
    pub fn new(label: &'static str, dir: impl Into<PathBuf>) -> Self {
        Self {
            label,
            dir: dir.into(),
        }
    }
}

/// A discovered static file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFile {
    pub path: PathBuf,
    /// Label of the root the file came from
    pub root: &'static str,
}

/// Route path to file mapping
#[derive(Debug, Clone, Default)]
pub struct StaticFileMap {
    files: BTreeMap<String, StaticFile>,
}

impl StaticFileMap {
    /// Scan the roots from scratch
    pub fn scan(roots: &[StaticRoot]) -> Self {
        let mut map = Self::default();
        for root in roots {
            map.add_root(root);
        }
        map
    }

    /// Add every file below `root`, replacing routes already present
    pub fn add_root(&mut self, root: &StaticRoot) {
        let dir = std::path::absolute(&root.dir).unwrap_or_else(|_| root.dir.clone());
        let mut added = 0usize;
        for path in list_files(&dir) {
            let Some(route) = route_for(&dir, &path) else {
                tracing::warn!("Skipping static file with non UTF-8 path: {}", path.display());
                continue;
            };
            if let Some(previous) = self.files.insert(
                route.clone(),
                StaticFile {
                    path,
                    root: root.label,
                },
            ) {
                tracing::debug!(
                    "Static route {} from {} overridden by {}",
                    route,
                    previous.root,
                    root.label
                );
            }
            added += 1;
        }
        tracing::debug!("Registered {} static files from {} ({})", added, root.label, dir.display());
    }

    pub fn get(&self, route: &str) -> Option<&StaticFile> {
        self.files.get(route)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StaticFile)> {
        self.files.iter().map(|(route, file)| (route.as_str(), file))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Route for `path` below `root`: '/'-separated with a leading '/'
fn route_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut route = String::new();
    for component in relative.components() {
        route.push('/');
        route.push_str(component.as_os_str().to_str()?);
    }
    Some(route)
}

/// Final path segment of a route, used as the download file name
pub fn download_name(route: &str) -> &str {
    route.rsplit('/').next().unwrap_or(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_routes_strip_root() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("static/css/site.css"), "body{}");
        write(&dir.path().join("static/favicon.ico"), "ico");

        let map = StaticFileMap::scan(&[StaticRoot::new("project", dir.path().join("static"))]);
        let routes: Vec<_> = map.iter().map(|(r, _)| r).collect();
        assert_eq!(routes, vec!["/css/site.css", "/favicon.ico"]);
        assert_eq!(
            map.get("/css/site.css").unwrap().path,
            dir.path().join("static/css/site.css")
        );
    }

    #[test]
    fn test_later_root_wins_collisions() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("base/js/common.js"), "base");
        write(&dir.path().join("base/js/only-base.js"), "base");
        write(&dir.path().join("app/js/common.js"), "app");
        write(&dir.path().join("project/js/common.js"), "project");

        let map = StaticFileMap::scan(&[
            StaticRoot::new("base_template", dir.path().join("base")),
            StaticRoot::new("app", dir.path().join("app")),
            StaticRoot::new("project", dir.path().join("project")),
        ]);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("/js/common.js").unwrap().root, "project");
        assert_eq!(map.get("/js/only-base.js").unwrap().root, "base_template");
    }

    #[test]
    fn test_rescan_starts_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("static/old.txt"), "x");
        let root = StaticRoot::new("project", dir.path().join("static"));
        assert!(StaticFileMap::scan(std::slice::from_ref(&root)).get("/old.txt").is_some());

        fs::remove_file(dir.path().join("static/old.txt")).unwrap();
        write(&dir.path().join("static/new.txt"), "x");
        let map = StaticFileMap::scan(&[root]);
        assert!(map.get("/old.txt").is_none());
        assert!(map.get("/new.txt").is_some());
    }

    #[test]
    fn test_missing_root_adds_nothing() {
        let map = StaticFileMap::scan(&[StaticRoot::new("app", "/definitely/not/here")]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_download_name() {
        assert_eq!(download_name("/js/vendor/lib.min.js"), "lib.min.js");
        assert_eq!(download_name("/favicon.ico"), "favicon.ico");
    }
}
