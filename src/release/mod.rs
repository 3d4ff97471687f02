//! Release manifest: the single workspace-level file declaring every
//! module's release policy, consumed by the release pipeline driver.

pub mod driver;

use std::{collections::BTreeMap, fs, io, io::Write, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workspace::UnknownModuleError;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("module `{0}` is already registered in the release manifest")]
    DuplicateModule(String),
    #[error(transparent)]
    UnknownModule(#[from] UnknownModuleError),
    #[error("failed to read release manifest {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("failed to write release manifest {path}: {source}")]
    Write { path: String, source: io::Error },
    #[error("release manifest {path} is malformed: {message}")]
    Malformed { path: String, message: String },
    #[error("`{program}` was not found; {hint}")]
    ToolNotFound { program: String, hint: String },
    #[error("`{program}` failed with exit code {code}: {stderr}")]
    Tool {
        program: String,
        code: i32,
        stderr: String,
    },
    #[error("failed to run `{program}`: {source}")]
    Spawn { program: String, source: io::Error },
}

/// Per-module release policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePolicy {
    /// Suppress tag creation for this module.
    #[serde(default)]
    pub skip_tag: bool,
    /// Pre-release label appended to calculated versions; empty means none.
    #[serde(default)]
    pub prerelease: String,
}

/// The workspace release manifest. Entries are keyed by module path; the
/// BTreeMap keeps serialization order deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseManifest {
    #[serde(default)]
    pub modules: BTreeMap<String, ReleasePolicy>,
}

impl ReleaseManifest {
    /// Load the manifest; a missing file is an empty manifest.
    pub fn load(path: &Path) -> Result<Self, ReleaseError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ReleaseError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        toml::from_str(&content).map_err(|err| ReleaseError::Malformed {
            path: path.display().to_string(),
            message: err.to_string(),
        })
    }

    /// Persist atomically (temp file in the same directory, then rename).
    pub fn save(&self, path: &Path) -> Result<(), ReleaseError> {
        let rendered = toml::to_string_pretty(self).map_err(|err| ReleaseError::Malformed {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let write_err = |source: io::Error| ReleaseError::Write {
            path: path.display().to_string(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(rendered.as_bytes()).map_err(write_err)?;
        tmp.persist(path).map_err(|err| ReleaseError::Write {
            path: path.display().to_string(),
            source: err.error,
        })?;
        Ok(())
    }

    /// Append a new entry; re-registering an existing path is a hard error,
    /// never a silent overwrite.
    pub fn register(&mut self, module: &str, policy: ReleasePolicy) -> Result<(), ReleaseError> {
        if self.modules.contains_key(module) {
            return Err(ReleaseError::DuplicateModule(module.to_string()));
        }
        self.modules.insert(module.to_string(), policy);
        Ok(())
    }

    #[must_use]
    pub fn policy(&self, module: &str) -> Option<&ReleasePolicy> {
        self.modules.get(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_reregister_is_a_duplicate_error() {
        let mut manifest = ReleaseManifest::default();
        manifest
            .register("cache/mem", ReleasePolicy::default())
            .expect("first registration");

        let err = manifest
            .register("cache/mem", ReleasePolicy::default())
            .expect_err("duplicate");
        assert!(matches!(err, ReleaseError::DuplicateModule(_)));
        assert_eq!(manifest.modules.len(), 1);
    }

    #[test]
    fn load_of_missing_file_is_an_empty_manifest() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let manifest =
            ReleaseManifest::load(&tmp.path().join("release.toml")).expect("load missing");
        assert!(manifest.modules.is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("release.toml");

        let mut manifest = ReleaseManifest::default();
        manifest
            .register(
                "http/gin",
                ReleasePolicy {
                    skip_tag: true,
                    prerelease: "alpha".to_string(),
                },
            )
            .expect("register");
        manifest
            .register("db/gorm", ReleasePolicy::default())
            .expect("register");
        manifest.save(&path).expect("save");

        let loaded = ReleaseManifest::load(&path).expect("load");
        assert_eq!(loaded.modules.len(), 2);
        let gin = loaded.policy("http/gin").expect("entry");
        assert!(gin.skip_tag);
        assert_eq!(gin.prerelease, "alpha");
        // BTreeMap keys serialize sorted; first section is db/gorm.
        let rendered = std::fs::read_to_string(&path).expect("read");
        assert!(rendered.find("db/gorm").expect("db") < rendered.find("http/gin").expect("http"));
    }

    #[test]
    fn malformed_manifest_is_reported() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("release.toml");
        std::fs::write(&path, "modules = 3\n").expect("write");
        let err = ReleaseManifest::load(&path).expect_err("malformed");
        assert!(matches!(err, ReleaseError::Malformed { .. }));
    }
}
