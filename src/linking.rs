//! Relative-linking toggler.
//!
//! During local development a module may depend on a sibling module through a
//! published version requirement. Enabling relative linking appends a
//! delimited, machine-generated override block to each module manifest that
//! redirects every intra-workspace dependency to its local checkout;
//! disabling removes exactly that block. Outside the markers the manifest is
//! never touched, and `disable(enable(C)) == C` byte-for-byte.
//!
//! The splice itself is a pure transform over a line sequence; filesystem
//! I/O is confined to [`enable_all`] / [`disable_all`].

use std::{collections::BTreeMap, fs, io, io::Write, path::Path};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    tasks::{TaskOutcome, TaskReport, TaskResult},
    workspace::{Module, Workspace},
};

pub const LINK_BEGIN: &str = "# --- cantiere:link begin ---";
pub const LINK_END: &str = "# --- cantiere:link end ---";

#[derive(Debug, Error)]
pub enum ManifestParseError {
    #[error("begin marker without a matching end marker")]
    UnterminatedBlock,
    #[error("end marker without a preceding begin marker")]
    StrayEndMarker,
    #[error("more than one override block")]
    DuplicateBlock,
    #[error("failed to read manifest: {0}")]
    Read(String),
    #[error("manifest is not valid TOML: {0}")]
    Toml(String),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("manifest {path}: {source}")]
    Manifest {
        path: String,
        source: ManifestParseError,
    },
    #[error("failed to rewrite {path}: {source}")]
    Io { path: String, source: io::Error },
}

/// One override directive: a dependency name redirected to a local path
/// relative to the depending module's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideDirective {
    pub name: String,
    pub path: String,
}

/// Split manifest content into lines such that joining with `\n` restores
/// the original bytes, trailing newline included.
#[must_use]
pub fn split_lines(content: &str) -> Vec<String> {
    content.split('\n').map(str::to_string).collect()
}

#[must_use]
pub fn join_lines(lines: &[String]) -> String {
    lines.join("\n")
}

/// Locate the override block, if any, as inclusive line indices.
fn find_block(lines: &[String]) -> Result<Option<(usize, usize)>, ManifestParseError> {
    let mut begin = None;
    let mut block = None;
    for (idx, line) in lines.iter().enumerate() {
        if line.trim() == LINK_BEGIN {
            if begin.is_some() || block.is_some() {
                return Err(ManifestParseError::DuplicateBlock);
            }
            begin = Some(idx);
        } else if line.trim() == LINK_END {
            match begin.take() {
                Some(start) => block = Some((start, idx)),
                None => return Err(ManifestParseError::StrayEndMarker),
            }
        }
    }
    if begin.is_some() {
        return Err(ManifestParseError::UnterminatedBlock);
    }
    Ok(block)
}

fn block_lines(directives: &[OverrideDirective]) -> Vec<String> {
    let mut lines = Vec::with_capacity(directives.len() + 3);
    lines.push(LINK_BEGIN.to_string());
    lines.push("[patch.crates-io]".to_string());
    for directive in directives {
        lines.push(format!(
            "{} = {{ path = \"{}\" }}",
            directive.name, directive.path
        ));
    }
    lines.push(LINK_END.to_string());
    lines
}

/// Insert (or wholesale replace) the override block. Idempotent: enabling an
/// already-enabled manifest never duplicates markers.
pub fn enable_block(
    lines: &[String],
    directives: &[OverrideDirective],
) -> Result<Vec<String>, ManifestParseError> {
    let block = block_lines(directives);
    let mut out = lines.to_vec();
    match find_block(lines)? {
        Some((start, end)) => {
            out.splice(start..=end, block);
        }
        None => {
            // Keep a trailing-newline manifest ending in a newline: the
            // block goes before the final empty segment.
            if out.last().is_some_and(String::is_empty) {
                let at = out.len() - 1;
                out.splice(at..at, block);
            } else {
                out.extend(block);
            }
        }
    }
    Ok(out)
}

/// Remove the override block, markers included. A manifest without markers
/// is returned unchanged.
pub fn disable_block(lines: &[String]) -> Result<Vec<String>, ManifestParseError> {
    match find_block(lines)? {
        Some((start, end)) => {
            let mut out = lines.to_vec();
            out.drain(start..=end);
            Ok(out)
        }
        None => Ok(lines.to_vec()),
    }
}

/// Relative path from the directory at `from` to the directory at `to`,
/// both workspace-relative with `/` separators.
#[must_use]
pub fn relative_between(from: &str, to: &str) -> String {
    let from_parts: Vec<&str> = from.split('/').collect();
    let to_parts: Vec<&str> = to.split('/').collect();
    let common = from_parts
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = Vec::new();
    for _ in common..from_parts.len() {
        parts.push("..");
    }
    parts.extend(&to_parts[common..]);
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Compute the override directives for every module: each dependency whose
/// name matches another module's package name is redirected to that module's
/// local path. Modules with an unparsable manifest get an error entry and
/// contribute no package name.
pub fn plan_directives(
    workspace: &Workspace,
) -> BTreeMap<String, Result<Vec<OverrideDirective>, ManifestParseError>> {
    let mut names: BTreeMap<String, String> = BTreeMap::new();
    let mut parsed: BTreeMap<String, Result<toml::Table, ManifestParseError>> = BTreeMap::new();

    for module in &workspace.modules {
        let table = fs::read_to_string(&module.manifest)
            .map_err(|err| ManifestParseError::Read(err.to_string()))
            .and_then(|content| {
                content
                    .parse::<toml::Table>()
                    .map_err(|err| ManifestParseError::Toml(err.to_string()))
            });
        if let Ok(table) = &table {
            if let Some(name) = package_name(table) {
                names.insert(name, module.path.clone());
            }
        }
        parsed.insert(module.path.clone(), table);
    }

    let mut plan = BTreeMap::new();
    for module in &workspace.modules {
        let entry = match parsed.remove(&module.path) {
            Some(Ok(table)) => {
                let mut directives: Vec<OverrideDirective> = dependency_names(&table)
                    .into_iter()
                    .filter_map(|dep| {
                        let target = names.get(&dep)?;
                        if *target == module.path {
                            return None;
                        }
                        Some(OverrideDirective {
                            name: dep,
                            path: relative_between(&module.path, target),
                        })
                    })
                    .collect();
                directives.sort_by(|a, b| a.name.cmp(&b.name));
                directives.dedup();
                Ok(directives)
            }
            Some(Err(err)) => Err(err),
            None => Ok(Vec::new()),
        };
        plan.insert(module.path.clone(), entry);
    }
    plan
}

fn package_name(table: &toml::Table) -> Option<String> {
    table
        .get("package")?
        .as_table()?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

fn dependency_names(table: &toml::Table) -> Vec<String> {
    let mut names = Vec::new();
    for section in ["dependencies", "dev-dependencies", "build-dependencies"] {
        if let Some(deps) = table.get(section).and_then(|v| v.as_table()) {
            names.extend(deps.keys().cloned());
        }
    }
    names
}

/// Enable relative linking across the whole workspace. Failures are recorded
/// per module; the remaining modules are still processed.
#[must_use]
pub fn enable_all(workspace: &Workspace) -> TaskReport {
    let plan = plan_directives(workspace);
    let mut report = TaskReport::new("link");
    for module in &workspace.modules {
        let outcome = match plan.get(&module.path) {
            Some(Ok(directives)) if directives.is_empty() => {
                info!(
                    target: "linking",
                    module = %module.path,
                    "no intra-workspace dependencies; manifest left untouched"
                );
                TaskOutcome::Success
            }
            Some(Ok(directives)) => {
                apply_transform(module, |lines| enable_block(lines, directives))
            }
            Some(Err(err)) => failure(module, err),
            None => TaskOutcome::Success,
        };
        report.push(TaskResult {
            module: module.path.clone(),
            outcome,
        });
    }
    report
}

/// Disable relative linking across the whole workspace. A manifest without
/// markers is a no-op; a manifest with corrupt markers is reported and left
/// untouched.
#[must_use]
pub fn disable_all(workspace: &Workspace) -> TaskReport {
    let mut report = TaskReport::new("unlink");
    for module in &workspace.modules {
        let outcome = apply_transform(module, disable_block);
        report.push(TaskResult {
            module: module.path.clone(),
            outcome,
        });
    }
    report
}

fn failure(module: &Module, err: &ManifestParseError) -> TaskOutcome {
    warn!(
        target: "linking",
        module = %module.path,
        error = %err,
        "manifest left untouched"
    );
    TaskOutcome::Failed {
        detail: format!("manifest {}: {err}", module.manifest.display()),
    }
}

/// Read, transform, and atomically rewrite one module manifest. Unchanged
/// content is not rewritten.
fn apply_transform<F>(module: &Module, transform: F) -> TaskOutcome
where
    F: FnOnce(&[String]) -> Result<Vec<String>, ManifestParseError>,
{
    match rewrite_manifest(module, transform) {
        Ok(changed) => {
            info!(
                target: "linking",
                module = %module.path,
                changed,
                "manifest processed"
            );
            TaskOutcome::Success
        }
        Err(err) => TaskOutcome::Failed {
            detail: err.to_string(),
        },
    }
}

fn rewrite_manifest<F>(module: &Module, transform: F) -> Result<bool, LinkError>
where
    F: FnOnce(&[String]) -> Result<Vec<String>, ManifestParseError>,
{
    let path = module.manifest.display().to_string();
    let content = fs::read_to_string(&module.manifest).map_err(|source| LinkError::Io {
        path: path.clone(),
        source,
    })?;

    let lines = split_lines(&content);
    let next = transform(&lines).map_err(|source| LinkError::Manifest {
        path: path.clone(),
        source,
    })?;
    let rendered = join_lines(&next);
    if rendered == content {
        return Ok(false);
    }

    let dir = module.manifest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| LinkError::Io {
        path: path.clone(),
        source,
    })?;
    tmp.write_all(rendered.as_bytes())
        .map_err(|source| LinkError::Io {
            path: path.clone(),
            source,
        })?;
    tmp.persist(&module.manifest)
        .map_err(|err| LinkError::Io {
            path,
            source: err.error,
        })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "[package]\nname = \"gin-example\"\nversion = \"0.1.0\"\n\n[dependencies]\nshared-util = \"0.2\"\n";

    fn directives() -> Vec<OverrideDirective> {
        vec![OverrideDirective {
            name: "shared-util".to_string(),
            path: "../../util/shared".to_string(),
        }]
    }

    #[test]
    fn enable_then_disable_round_trips_byte_for_byte() {
        let lines = split_lines(BASE);
        let enabled = enable_block(&lines, &directives()).expect("enable");
        let disabled = disable_block(&enabled).expect("disable");
        assert_eq!(join_lines(&disabled), BASE);
    }

    #[test]
    fn round_trip_without_trailing_newline() {
        let content = BASE.trim_end();
        let lines = split_lines(content);
        let enabled = enable_block(&lines, &directives()).expect("enable");
        let disabled = disable_block(&enabled).expect("disable");
        assert_eq!(join_lines(&disabled), content);
    }

    #[test]
    fn enable_is_idempotent() {
        let lines = split_lines(BASE);
        let once = enable_block(&lines, &directives()).expect("enable");
        let twice = enable_block(&once, &directives()).expect("enable again");
        assert_eq!(once, twice);
        let markers = twice.iter().filter(|l| l.trim() == LINK_BEGIN).count();
        assert_eq!(markers, 1);
    }

    #[test]
    fn enable_replaces_a_stale_block_wholesale() {
        let lines = split_lines(BASE);
        let stale = enable_block(
            &lines,
            &[OverrideDirective {
                name: "old-dep".to_string(),
                path: "../old".to_string(),
            }],
        )
        .expect("enable stale");
        let fresh = enable_block(&stale, &directives()).expect("re-enable");
        let rendered = join_lines(&fresh);
        assert!(!rendered.contains("old-dep"));
        assert!(rendered.contains("shared-util"));
    }

    #[test]
    fn disable_without_markers_is_a_no_op() {
        let lines = split_lines(BASE);
        let out = disable_block(&lines).expect("disable");
        assert_eq!(join_lines(&out), BASE);
    }

    #[test]
    fn enabled_block_content_redirects_dependencies() {
        let lines = split_lines(BASE);
        let enabled = join_lines(&enable_block(&lines, &directives()).expect("enable"));
        assert!(enabled.contains(LINK_BEGIN));
        assert!(enabled.contains("[patch.crates-io]"));
        assert!(enabled.contains("shared-util = { path = \"../../util/shared\" }"));
        assert!(enabled.contains(LINK_END));
    }

    #[test]
    fn unterminated_block_is_rejected() {
        let mut lines = split_lines(BASE);
        lines.push(LINK_BEGIN.to_string());
        let err = disable_block(&lines).expect_err("must fail");
        assert!(matches!(err, ManifestParseError::UnterminatedBlock));
    }

    #[test]
    fn stray_end_marker_is_rejected() {
        let mut lines = split_lines(BASE);
        lines.insert(0, LINK_END.to_string());
        let err = disable_block(&lines).expect_err("must fail");
        assert!(matches!(err, ManifestParseError::StrayEndMarker));
    }

    #[test]
    fn duplicate_blocks_are_rejected() {
        let mut lines = split_lines(BASE);
        lines.extend(block_lines(&directives()));
        lines.extend(block_lines(&directives()));
        let err = disable_block(&lines).expect_err("must fail");
        assert!(matches!(err, ManifestParseError::DuplicateBlock));
    }

    #[test]
    fn relative_paths_between_module_directories() {
        assert_eq!(relative_between("http/gin", "db/gorm"), "../../db/gorm");
        assert_eq!(relative_between("http/gin", "http/chi"), "../chi");
        assert_eq!(relative_between("a", "a/b"), "b");
        assert_eq!(relative_between("a/b", "a"), "..");
    }

    mod workspace_wide {
        use super::*;
        use crate::workspace::Workspace;
        use std::fs;
        use std::path::Path;

        fn seed(root: &Path, path: &str, manifest: &str) {
            let dir = root.join(path);
            fs::create_dir_all(&dir).expect("create module dir");
            fs::write(dir.join("Cargo.toml"), manifest).expect("write manifest");
        }

        #[test]
        fn enable_all_then_disable_all_restores_every_manifest() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let gin = "[package]\nname = \"gin-example\"\nversion = \"0.1.0\"\n\n[dependencies]\ngorm-example = \"0.1\"\n";
            let gorm = "[package]\nname = \"gorm-example\"\nversion = \"0.1.0\"\n";
            seed(tmp.path(), "http/gin", gin);
            seed(tmp.path(), "db/gorm", gorm);

            let ws = Workspace::discover(tmp.path(), "Cargo.toml", &[]).expect("discover");
            let enabled = enable_all(&ws);
            assert!(enabled.all_succeeded());

            let linked =
                fs::read_to_string(tmp.path().join("http/gin/Cargo.toml")).expect("read");
            assert!(linked.contains("gorm-example = { path = \"../../db/gorm\" }"));
            // The dependency-free module is untouched.
            assert_eq!(
                fs::read_to_string(tmp.path().join("db/gorm/Cargo.toml")).expect("read"),
                gorm
            );

            let disabled = disable_all(&ws);
            assert!(disabled.all_succeeded());
            assert_eq!(
                fs::read_to_string(tmp.path().join("http/gin/Cargo.toml")).expect("read"),
                gin
            );
        }

        #[test]
        fn unreadable_manifest_is_reported_as_a_read_failure() {
            let tmp = tempfile::tempdir().expect("tempdir");
            seed(
                tmp.path(),
                "b/good",
                "[package]\nname = \"good\"\nversion = \"0.1.0\"\n",
            );
            let mut ws = Workspace::discover(tmp.path(), "Cargo.toml", &[]).expect("discover");
            // Point one module at a manifest that no longer exists.
            let mut ghost = ws.modules[0].clone();
            ghost.path = "a/ghost".to_string();
            ghost.manifest = tmp.path().join("a/ghost/Cargo.toml");
            ws.modules.insert(0, ghost);

            let plan = plan_directives(&ws);
            let err = plan
                .get("a/ghost")
                .expect("entry")
                .as_ref()
                .expect_err("read failure");
            assert!(matches!(err, ManifestParseError::Read(_)));
            assert!(err.to_string().starts_with("failed to read manifest"));
            assert!(plan.get("b/good").expect("entry").is_ok());
        }

        #[test]
        fn corrupt_manifest_is_reported_and_others_still_processed() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let good = "[package]\nname = \"good\"\nversion = \"0.1.0\"\n";
            let broken = format!("[package]\nname = \"broken\"\n{LINK_BEGIN}\n");
            seed(tmp.path(), "a/broken", &broken);
            seed(tmp.path(), "b/good", good);

            let ws = Workspace::discover(tmp.path(), "Cargo.toml", &[]).expect("discover");
            let report = disable_all(&ws);

            assert!(!report.all_succeeded());
            let failed: Vec<&str> = report.failures().iter().map(|r| r.module.as_str()).collect();
            assert_eq!(failed, ["a/broken"]);
            // The corrupt manifest is left exactly as it was.
            assert_eq!(
                fs::read_to_string(tmp.path().join("a/broken/Cargo.toml")).expect("read"),
                broken
            );
        }
    }
}
