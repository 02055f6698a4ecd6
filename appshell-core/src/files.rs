//! Recursive file enumeration

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Every regular file below `root`, as absolute paths sorted for a stable
/// scan order. Symlinked directories are followed; loops and unreadable
/// entries are skipped. A missing root or a root that is not a directory
/// yields an empty list.
pub fn list_files(root: &Path) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }
    let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());

    WalkDir::new(&root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!("Skipping unreadable entry under {}: {}", root.display(), e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_files(&dir.path().join("nope")).is_empty());

        let file = dir.path().join("plain.txt");
        touch(&file);
        assert!(list_files(&file).is_empty());
    }

    #[test]
    fn test_nested_files_without_directories() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.css"));
        touch(&dir.path().join("js/app.js"));
        touch(&dir.path().join("js/vendor/lib.js"));
        fs::create_dir_all(dir.path().join("empty")).unwrap();

        let files = list_files(dir.path());
        let relative: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();

        assert_eq!(
            relative,
            vec![
                PathBuf::from("a.css"),
                PathBuf::from("js/app.js"),
                PathBuf::from("js/vendor/lib.js"),
            ]
        );
        assert!(files.iter().all(|p| p.is_absolute()));
    }

    #[cfg(unix)]
    #[test]
    fn test_follows_symlinked_directories() {
        let outside = tempfile::tempdir().unwrap();
        touch(&outside.path().join("shared/logo.png"));

        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("index.html"));
        std::os::unix::fs::symlink(outside.path().join("shared"), dir.path().join("linked")).unwrap();

        let files = list_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files.contains(&dir.path().join("linked/logo.png")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_terminates() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("sub/file.txt"));
        std::os::unix::fs::symlink(dir.path(), dir.path().join("sub/back")).unwrap();

        let files = list_files(dir.path());
        assert_eq!(files, vec![dir.path().join("sub/file.txt")]);
    }
}
