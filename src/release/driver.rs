//! Thin wrappers over the external release-automation binaries.
//!
//! The driver sequences invocations and applies the release manifest's
//! per-module policy; version arithmetic, tag bookkeeping, and changelog
//! rendering all belong to the external tools. Tool output is surfaced
//! verbatim; a missing binary is reported with an install hint.

use std::path::Path;

use tracing::info;

use crate::{
    config::{BumpArg, Settings},
    exec::{ExecError, ExecOutput, Invocation, ToolRunner},
    release::{ReleaseError, ReleaseManifest, ReleasePolicy},
    tasks::{TaskOutcome, TaskReport, TaskResult},
    workspace::Module,
};

/// One tag decision for a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagAction {
    pub module: String,
    pub outcome: TagOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOutcome {
    Created(String),
    /// Dry run: the tag that would have been created.
    Planned(String),
    /// Tagging suppressed by the module's release policy.
    Suppressed,
    Failed { detail: String },
}

/// Calculated version for one module, or the per-module failure detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub module: String,
    pub version: Result<String, String>,
}

pub struct Driver<'a> {
    settings: &'a Settings,
    manifest: &'a ReleaseManifest,
    runner: &'a dyn ToolRunner,
}

impl<'a> Driver<'a> {
    pub fn new(
        settings: &'a Settings,
        manifest: &'a ReleaseManifest,
        runner: &'a dyn ToolRunner,
    ) -> Self {
        Self {
            settings,
            manifest,
            runner,
        }
    }

    fn root(&self) -> &Path {
        &self.settings.workspace.root
    }

    fn policy(&self, module: &Module) -> ReleasePolicy {
        self.manifest.policy(&module.path).cloned().unwrap_or_default()
    }

    fn run_tool(
        &self,
        program: &str,
        args: Vec<String>,
        cwd: &Path,
    ) -> Result<ExecOutput, ReleaseError> {
        let invocation = Invocation::new(program, args, cwd);
        info!(
            target: "release",
            command = %invocation.display(),
            "invoking release tool"
        );
        match self.runner.invoke(&invocation) {
            Ok(output) if output.success() => Ok(output),
            Ok(output) => Err(ReleaseError::Tool {
                program: program.to_string(),
                code: output.code.unwrap_or(-1),
                stderr: if output.stderr.trim().is_empty() {
                    output.stdout
                } else {
                    output.stderr
                },
            }),
            Err(ExecError::NotFound { program }) => Err(ReleaseError::ToolNotFound {
                hint: install_hint(&program),
                program,
            }),
            Err(ExecError::Io { program, source }) => Err(ReleaseError::Spawn { program, source }),
        }
    }

    /// Bump dependency requirements in each selected module; per-module
    /// failures are aggregated, a missing bump tool aborts outright.
    pub fn bump_dependencies(&self, modules: &[&Module]) -> Result<TaskReport, ReleaseError> {
        let mut report = TaskReport::new("bump");
        for module in modules {
            let outcome = match self.run_tool(
                &self.settings.release.bump_tool,
                vec!["upgrade".to_string()],
                &module.dir,
            ) {
                Ok(_) => TaskOutcome::Success,
                Err(err @ ReleaseError::ToolNotFound { .. }) => return Err(err),
                Err(err) => TaskOutcome::Failed {
                    detail: err.to_string(),
                },
            };
            report.push(TaskResult {
                module: module.path.clone(),
                outcome,
            });
        }
        Ok(report)
    }

    /// Calculate the next version for each selected module. The calculated
    /// version is the external tool's answer; the manifest's pre-release
    /// label is appended as-is. Per-module tool failures are recorded and
    /// the remaining modules still attempted; a missing tool aborts.
    pub fn calculate_release(
        &self,
        modules: &[&Module],
        bump: BumpArg,
    ) -> Result<Vec<VersionEntry>, ReleaseError> {
        let mut entries = Vec::with_capacity(modules.len());
        for module in modules {
            let version = match self.calculated_version(module, bump) {
                Ok(version) => Ok(version),
                Err(err @ ReleaseError::ToolNotFound { .. }) => return Err(err),
                Err(err) => Err(err.to_string()),
            };
            entries.push(VersionEntry {
                module: module.path.clone(),
                version,
            });
        }
        Ok(entries)
    }

    fn calculated_version(&self, module: &Module, bump: BumpArg) -> Result<String, ReleaseError> {
        let mut args = vec!["--bumped-version".to_string()];
        if bump != BumpArg::Auto {
            args.push("--bump".to_string());
            args.push(bump.as_str().to_string());
        }
        args.push("--include-path".to_string());
        args.push(format!("{}/**", module.path));

        let output = self.run_tool(&self.settings.release.changelog_tool, args, self.root())?;
        let version = output.stdout.trim().trim_start_matches('v').to_string();

        let policy = self.policy(module);
        if policy.prerelease.is_empty() {
            Ok(version)
        } else {
            Ok(format!("{version}-{}", policy.prerelease))
        }
    }

    /// Create (or, in dry-run mode, report) one release tag per selected
    /// module; modules whose policy suppresses tagging are skipped.
    /// Per-module tool failures are recorded and the remaining modules
    /// still attempted; a missing tool aborts.
    pub fn tag_release(
        &self,
        modules: &[&Module],
        bump: BumpArg,
        dry_run: bool,
    ) -> Result<Vec<TagAction>, ReleaseError> {
        let mut actions = Vec::with_capacity(modules.len());
        for module in modules {
            let outcome = self.tag_module(module, bump, dry_run)?;
            actions.push(TagAction {
                module: module.path.clone(),
                outcome,
            });
        }
        Ok(actions)
    }

    fn tag_module(
        &self,
        module: &Module,
        bump: BumpArg,
        dry_run: bool,
    ) -> Result<TagOutcome, ReleaseError> {
        let policy = self.policy(module);
        if policy.skip_tag {
            info!(
                target: "release",
                module = %module.path,
                "tagging suppressed by release policy"
            );
            return Ok(TagOutcome::Suppressed);
        }

        let version = match self.calculated_version(module, bump) {
            Ok(version) => version,
            Err(err @ ReleaseError::ToolNotFound { .. }) => return Err(err),
            Err(err) => {
                return Ok(TagOutcome::Failed {
                    detail: err.to_string(),
                });
            }
        };
        let tag = format!("{}-v{version}", module.path.replace('/', "-"));
        if dry_run {
            return Ok(TagOutcome::Planned(tag));
        }
        match self.run_tool(
            &self.settings.release.tag_tool,
            vec!["tag".to_string(), tag.clone()],
            self.root(),
        ) {
            Ok(_) => Ok(TagOutcome::Created(tag)),
            Err(err @ ReleaseError::ToolNotFound { .. }) => Err(err),
            Err(err) => Ok(TagOutcome::Failed {
                detail: err.to_string(),
            }),
        }
    }

    /// Generate the changelog file, workspace-wide or scoped to one module.
    pub fn generate_changelog(&self, module: Option<&Module>) -> Result<(), ReleaseError> {
        let args = match module {
            Some(module) => vec![
                "--include-path".to_string(),
                format!("{}/**", module.path),
                "--output".to_string(),
                format!("{}/CHANGELOG.md", module.path),
            ],
            None => vec!["--output".to_string(), "CHANGELOG.md".to_string()],
        };
        self.run_tool(&self.settings.release.changelog_tool, args, self.root())?;
        Ok(())
    }

    /// Render the unreleased changelog section and return it verbatim.
    pub fn render_changelog(&self, module: Option<&Module>) -> Result<String, ReleaseError> {
        let mut args = vec!["--unreleased".to_string()];
        if let Some(module) = module {
            args.push("--include-path".to_string());
            args.push(format!("{}/**", module.path));
        }
        let output = self.run_tool(&self.settings.release.changelog_tool, args, self.root())?;
        Ok(output.stdout)
    }
}

fn install_hint(program: &str) -> String {
    match program {
        "git-cliff" => "install it with `cargo install git-cliff`".to_string(),
        "git" => "install git via your system package manager".to_string(),
        "cargo" => "install the Rust toolchain via rustup".to_string(),
        other => format!("install `{other}` and ensure it is on PATH"),
    }
}
