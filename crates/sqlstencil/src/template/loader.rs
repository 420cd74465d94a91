//! Loading query templates from directories.
//!
//! A [`SearchPath`] is an ordered list of template directories. Names are
//! resolved against each directory in registration order; the first directory
//! holding a match wins.
//!
//! # Template Resolution
//!
//! Within one directory a name matches, in order:
//!
//! 1. the file `name` itself (`"users/by_email.sql"`)
//! 2. `name` plus a recognized extension, by extension priority
//!    (`"users/by_email"` → `users/by_email.sql`)
//!
//! Names are always relative and use `/` as separator. Absolute names and
//! names with `..` components are rejected, so a template can never be read
//! from outside its search directories.
//!
//! # Supported Extensions
//!
//! | Priority | Extension |
//! |----------|-----------|
//! | 1 (highest) | `.sql` |
//! | 2 | `.sql.j2` |
//! | 3 | `.sql.jinja` |
//! | 4 | `.j2` |
//! | 5 (lowest) | `.jinja` |

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Recognized template file extensions in priority order.
pub const TEMPLATE_EXTENSIONS: &[&str] = &[".sql", ".sql.j2", ".sql.jinja", ".j2", ".jinja"];

/// Error loading a template from disk.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// A search directory does not exist or is not a directory.
    #[error("template directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    /// Reading a file or directory failed.
    #[error("failed to read {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    /// The template name could escape the search directories.
    #[error("invalid template name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },
}

/// A template file discovered while walking a search directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFile {
    /// Resolution name without extension (e.g., `"users/by_email"`)
    pub name: String,
    /// Resolution name with extension (e.g., `"users/by_email.sql"`)
    pub name_with_ext: String,
}

/// Longest recognized extension `name` ends with.
fn extension_of(name: &str) -> Option<&'static str> {
    TEMPLATE_EXTENSIONS
        .iter()
        .filter(|ext| name.len() > ext.len() && name.ends_with(*ext))
        .max_by_key(|ext| ext.len())
        .copied()
}

/// Ordered template directories.
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a directory to search.
    ///
    /// # Errors
    ///
    /// [`LoadError::DirectoryNotFound`] if `dir` is not an existing directory.
    pub fn add_dir(&mut self, dir: impl AsRef<Path>) -> Result<(), LoadError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(LoadError::DirectoryNotFound {
                path: dir.to_path_buf(),
            });
        }
        self.dirs.push(dir.to_path_buf());
        Ok(())
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Finds the file a template name refers to.
    pub fn resolve(&self, name: &str) -> Result<Option<PathBuf>, LoadError> {
        validate_name(name)?;

        for dir in &self.dirs {
            let exact = dir.join(name);
            if exact.is_file() {
                return Ok(Some(exact));
            }
            for ext in TEMPLATE_EXTENSIONS {
                let candidate = dir.join(format!("{}{}", name, ext));
                if candidate.is_file() {
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }

    /// Reads the source of a template, or `None` if no directory holds it.
    pub fn load(&self, name: &str) -> Result<Option<String>, LoadError> {
        let Some(path) = self.resolve(name)? else {
            return Ok(None);
        };
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| LoadError::Io {
                path,
                message: e.to_string(),
            })
    }

    /// All template files in all search directories.
    pub fn template_files(&self) -> Result<Vec<TemplateFile>, LoadError> {
        let mut files = Vec::new();
        for dir in &self.dirs {
            walk_dir(dir, dir, &mut files)?;
        }
        Ok(files)
    }

    /// Names that resolve to a template, without extensions, sorted.
    pub fn template_names(&self) -> Result<Vec<String>, LoadError> {
        let names: BTreeSet<String> = self
            .template_files()?
            .into_iter()
            .map(|file| file.name)
            .collect();
        Ok(names.into_iter().collect())
    }
}

fn validate_name(name: &str) -> Result<(), LoadError> {
    let invalid = |reason| {
        Err(LoadError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };
    if name.is_empty() {
        return invalid("name is empty");
    }
    for component in Path::new(name).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return invalid("`..` is not allowed"),
            Component::RootDir | Component::Prefix(_) => return invalid("name must be relative"),
        }
    }
    Ok(())
}

fn walk_dir(current: &Path, root: &Path, files: &mut Vec<TemplateFile>) -> Result<(), LoadError> {
    let entries = std::fs::read_dir(current).map_err(|e| LoadError::Io {
        path: current.to_path_buf(),
        message: e.to_string(),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| LoadError::Io {
            path: current.to_path_buf(),
            message: e.to_string(),
        })?;
        let path = entry.path();

        if path.is_dir() {
            walk_dir(&path, root, files)?;
        } else if path.is_file() {
            if let Some(file) = template_file(&path, root) {
                files.push(file);
            }
        }
    }
    Ok(())
}

fn template_file(path: &Path, root: &Path) -> Option<TemplateFile> {
    let relative = path.strip_prefix(root).ok()?;
    let name_with_ext = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let ext = extension_of(&name_with_ext)?;
    let name = name_with_ext[..name_with_ext.len() - ext.len()].to_string();

    Some(TemplateFile {
        name,
        name_with_ext,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn dir_with(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_extension_priority() {
        let dir = dir_with(&[("q.jinja", "low"), ("q.sql", "high")]);
        let mut search = SearchPath::new();
        search.add_dir(dir.path()).unwrap();
        assert_eq!(search.load("q").unwrap().as_deref(), Some("high"));
        assert_eq!(search.load("q.jinja").unwrap().as_deref(), Some("low"));
    }

    #[test]
    fn test_first_directory_wins() {
        let first = dir_with(&[("q.j2", "first")]);
        let second = dir_with(&[("q.sql", "second")]);
        let mut search = SearchPath::new();
        search.add_dir(first.path()).unwrap();
        search.add_dir(second.path()).unwrap();
        assert_eq!(search.load("q").unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn test_missing_template() {
        let dir = dir_with(&[]);
        let mut search = SearchPath::new();
        search.add_dir(dir.path()).unwrap();
        assert_eq!(search.load("nope").unwrap(), None);
    }

    #[test]
    fn test_rejects_escaping_names() {
        let search = SearchPath::new();
        assert!(matches!(
            search.resolve("../secret.sql"),
            Err(LoadError::InvalidName { .. })
        ));
        assert!(matches!(
            search.resolve("/etc/passwd"),
            Err(LoadError::InvalidName { .. })
        ));
        assert!(matches!(search.resolve(""), Err(LoadError::InvalidName { .. })));
    }

    #[test]
    fn test_missing_directory() {
        let mut search = SearchPath::new();
        let err = search.add_dir("/definitely/not/here").unwrap_err();
        assert!(matches!(err, LoadError::DirectoryNotFound { .. }));
    }

    #[test]
    fn test_template_names_walks_subdirectories() {
        let dir = dir_with(&[
            ("users/by_email.sql", ""),
            ("users/by_email.j2", ""),
            ("orders.sql.j2", ""),
            ("README.md", ""),
        ]);
        let mut search = SearchPath::new();
        search.add_dir(dir.path()).unwrap();
        assert_eq!(
            search.template_names().unwrap(),
            vec!["orders".to_string(), "users/by_email".to_string()]
        );
    }

    #[test]
    fn test_template_files_keep_extension() {
        let dir = dir_with(&[("users/by_email.sql.j2", "")]);
        let mut search = SearchPath::new();
        search.add_dir(dir.path()).unwrap();
        assert_eq!(
            search.template_files().unwrap(),
            vec![TemplateFile {
                name: "users/by_email".into(),
                name_with_ext: "users/by_email.sql.j2".into(),
            }]
        );
    }
}
