//! Module discovery and selector resolution.
//!
//! Discovery is recomputed on every invocation and the resulting
//! [`Workspace`] value is threaded into every other component; nothing here
//! is cached or global.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("workspace root {root} is not readable: {source}")]
    RootUnreadable { root: String, source: io::Error },
    #[error("failed to traverse workspace: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Debug, Error)]
#[error("module `{0}` is not among the discovered modules")]
pub struct UnknownModuleError(pub String);

/// One discovered module: a directory carrying the manifest marker file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Workspace-relative path with `/` separators; the module's identity.
    pub path: String,
    pub dir: PathBuf,
    pub manifest: PathBuf,
}

/// The discovered module set for one invocation, sorted by relative path.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub modules: Vec<Module>,
}

impl Workspace {
    /// Scan `root` for directories containing `marker`, excluding the root
    /// itself, hidden directories, and any directory named in `prune`.
    ///
    /// The result is sorted lexicographically by relative path, so repeated
    /// calls against an unchanged tree return identical orderings. An empty
    /// workspace is a valid empty result.
    pub fn discover(root: &Path, marker: &str, prune: &[String]) -> Result<Self, DiscoveryError> {
        // Surface an unreadable root as a discovery failure up front;
        // walkdir would otherwise yield it lazily mid-iteration.
        fs::read_dir(root).map_err(|source| DiscoveryError::RootUnreadable {
            root: root.display().to_string(),
            source,
        })?;

        let mut modules = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !(name.starts_with('.') || prune.iter().any(|p| p == name.as_ref()))
            });

        for entry in walker {
            let entry = entry?;
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                continue;
            }
            let manifest = entry.path().join(marker);
            if !manifest.is_file() {
                continue;
            }
            if let Some(path) = relative_path(root, entry.path()) {
                modules.push(Module {
                    path,
                    dir: entry.path().to_path_buf(),
                    manifest,
                });
            }
        }

        modules.sort_by(|a, b| a.path.cmp(&b.path));
        modules.dedup_by(|a, b| a.path == b.path);

        Ok(Self {
            root: root.to_path_buf(),
            modules,
        })
    }

    pub fn find(&self, path: &str) -> Option<&Module> {
        self.modules.iter().find(|module| module.path == path)
    }

    /// Resolve an optional module selector: `None` means every discovered
    /// module, `Some(path)` must name a discovered module.
    pub fn select(&self, selector: Option<&str>) -> Result<Vec<&Module>, UnknownModuleError> {
        match selector {
            None => Ok(self.modules.iter().collect()),
            Some(path) => {
                let module = self
                    .find(path)
                    .ok_or_else(|| UnknownModuleError(path.to_string()))?;
                Ok(vec![module])
            }
        }
    }
}

/// Workspace-relative path with forward slashes, independent of platform.
fn relative_path(root: &Path, dir: &Path) -> Option<String> {
    let relative = dir.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
