//! Per-module task sequencing and result aggregation.
//!
//! The runner owns nothing task-specific: it resolves a task kind to a
//! command, scopes the working directory to each module, and aggregates the
//! per-module outcomes. Every selected module is attempted even when an
//! earlier one fails; the overall run fails iff any module failed.

use std::{fmt, fs, io, path::PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::Settings,
    exec::{ExecError, Invocation, ToolRunner},
    workspace::{Module, UnknownModuleError, Workspace},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Sync,
    Verify,
    Build,
    Test,
    Coverage,
    Lint,
    Fmt,
}

impl TaskKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Verify => "verify",
            Self::Build => "build",
            Self::Test => "test",
            Self::Coverage => "coverage",
            Self::Lint => "lint",
            Self::Fmt => "fmt",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    UnknownModule(#[from] UnknownModuleError),
    #[error("failed to prepare coverage directory {path}: {source}")]
    CoverageDir { path: String, source: io::Error },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub module: String,
    pub outcome: TaskOutcome,
}

impl TaskResult {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Success)
    }
}

/// Aggregate outcome of one task run across the selected modules, in
/// selection (discovery) order.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: &'static str,
    pub results: Vec<TaskResult>,
}

impl TaskReport {
    #[must_use]
    pub fn new(task: &'static str) -> Self {
        Self {
            task,
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, result: TaskResult) {
        self.results.push(result);
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&TaskResult> {
        self.results.iter().filter(|r| !r.succeeded()).collect()
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(TaskResult::succeeded)
    }

    /// One-line summary distinguishing "all succeeded" from "N of M failed".
    #[must_use]
    pub fn summary(&self) -> String {
        let total = self.results.len();
        let failures = self.failures();
        if failures.is_empty() {
            format!("{}: all {total} modules succeeded", self.task)
        } else {
            let names: Vec<&str> = failures.iter().map(|r| r.module.as_str()).collect();
            format!(
                "{}: {} of {total} modules failed: {}",
                self.task,
                failures.len(),
                names.join(", ")
            )
        }
    }
}

/// Coverage artifact file name for a module: slashes become underscores so
/// all modules can share one output directory without collisions.
#[must_use]
pub fn coverage_file_name(module_path: &str) -> String {
    format!("{}.lcov", module_path.replace('/', "_"))
}

/// Run one task against the selected modules, in discovery order, without
/// fail-fast.
pub fn run(
    kind: TaskKind,
    selector: Option<&str>,
    workspace: &Workspace,
    settings: &Settings,
    runner: &dyn ToolRunner,
) -> Result<TaskReport, TaskError> {
    let selected = workspace.select(selector)?;

    if kind == TaskKind::Coverage {
        let dir = settings.coverage_dir();
        fs::create_dir_all(&dir).map_err(|source| TaskError::CoverageDir {
            path: dir.display().to_string(),
            source,
        })?;
    }
    if kind == TaskKind::Lint {
        ensure_lint_tool(settings, runner);
    }

    let mut report = TaskReport::new(kind.name());
    for module in selected {
        let invocation = invocation_for(kind, module, settings);
        info!(
            target: "tasks",
            task = kind.name(),
            module = %module.path,
            command = %invocation.display(),
            "running module task"
        );
        let outcome = outcome_from(runner.invoke(&invocation));
        if let TaskOutcome::Failed { .. } = &outcome {
            warn!(
                target: "tasks",
                task = kind.name(),
                module = %module.path,
                "module task failed"
            );
        }
        report.push(TaskResult {
            module: module.path.clone(),
            outcome,
        });
    }
    Ok(report)
}

fn outcome_from(result: Result<crate::exec::ExecOutput, ExecError>) -> TaskOutcome {
    match result {
        Ok(output) if output.success() => TaskOutcome::Success,
        Ok(output) => TaskOutcome::Failed {
            detail: render_output(&output),
        },
        Err(err) => TaskOutcome::Failed {
            detail: err.to_string(),
        },
    }
}

fn render_output(output: &crate::exec::ExecOutput) -> String {
    let mut detail = format!(
        "exit code {}",
        output.code.map_or_else(|| "none".to_string(), |c| c.to_string())
    );
    if !output.stdout.trim().is_empty() {
        detail.push('\n');
        detail.push_str(output.stdout.trim_end());
    }
    if !output.stderr.trim().is_empty() {
        detail.push('\n');
        detail.push_str(output.stderr.trim_end());
    }
    detail
}

/// Resolve a task kind to the concrete command run inside a module directory.
fn invocation_for(kind: TaskKind, module: &Module, settings: &Settings) -> Invocation {
    let args: Vec<String> = match kind {
        TaskKind::Sync => vec!["update".into()],
        TaskKind::Verify => vec!["check".into(), "--all-targets".into()],
        TaskKind::Build => vec!["build".into()],
        TaskKind::Test => vec!["test".into()],
        TaskKind::Coverage => {
            let artifact: PathBuf = settings.coverage_dir().join(coverage_file_name(&module.path));
            vec![
                "llvm-cov".into(),
                "--lcov".into(),
                "--output-path".into(),
                artifact.display().to_string(),
            ]
        }
        TaskKind::Lint => vec![
            "clippy".into(),
            "--all-targets".into(),
            "--".into(),
            "-D".into(),
            "warnings".into(),
        ],
        TaskKind::Fmt => vec!["fmt".into()],
    };
    Invocation::new("cargo", args, &module.dir)
}

/// Probe for the lint tool and attempt its one-time install when missing.
/// The probe is separate from the lint run itself so an install never masks
/// a genuine lint failure.
fn ensure_lint_tool(settings: &Settings, runner: &dyn ToolRunner) {
    let probe = Invocation::new(
        "cargo",
        ["clippy", "--version"],
        &settings.workspace.root,
    );
    let present = match runner.invoke(&probe) {
        Ok(output) => output.success(),
        Err(_) => false,
    };
    if present {
        return;
    }

    let Some((program, args)) = settings.lint.install.split_first() else {
        return;
    };
    let install = Invocation::new(program.clone(), args.to_vec(), &settings.workspace.root);
    info!(
        target: "tasks",
        command = %install.display(),
        "lint tool missing; attempting one-time install"
    );
    match runner.invoke(&install) {
        Ok(output) if output.success() => {}
        Ok(output) => warn!(
            target: "tasks",
            exit_code = output.code.map(i64::from).unwrap_or(-1),
            "lint tool install failed; lint will be attempted anyway"
        ),
        Err(err) => warn!(
            target: "tasks",
            error = %err,
            "lint tool install could not be run; lint will be attempted anyway"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        cell::{Cell, RefCell},
        path::{Path, PathBuf},
    };

    use tracing::level_filters::LevelFilter;

    use crate::config::{
        CoverageSettings, LintSettings, LogFormat, LoggingSettings, ReleaseSettings,
        WorkspaceSettings,
    };
    use crate::exec::ExecOutput;

    fn test_settings(root: &Path) -> Settings {
        Settings {
            workspace: WorkspaceSettings {
                root: root.to_path_buf(),
                marker: "Cargo.toml".to_string(),
            },
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            coverage: CoverageSettings {
                directory: PathBuf::from("coverage"),
            },
            lint: LintSettings {
                install: ["rustup", "component", "add", "clippy"]
                    .iter()
                    .map(|s| (*s).to_string())
                    .collect(),
            },
            release: ReleaseSettings {
                manifest: PathBuf::from("release.toml"),
                changelog_tool: "git-cliff".to_string(),
                bump_tool: "cargo".to_string(),
                tag_tool: "git".to_string(),
            },
        }
    }

    fn fake_workspace(root: &Path, paths: &[&str]) -> Workspace {
        let modules = paths
            .iter()
            .map(|path| Module {
                path: (*path).to_string(),
                dir: root.join(path),
                manifest: root.join(path).join("Cargo.toml"),
            })
            .collect();
        Workspace {
            root: root.to_path_buf(),
            modules,
        }
    }

    #[derive(Default)]
    struct FakeRunner {
        calls: RefCell<Vec<Invocation>>,
        clippy_missing: Cell<bool>,
        fail_cwd_suffix: Option<String>,
    }

    fn output(code: i32, stderr: &str) -> ExecOutput {
        ExecOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    impl ToolRunner for FakeRunner {
        fn invoke(&self, invocation: &Invocation) -> Result<ExecOutput, ExecError> {
            self.calls.borrow_mut().push(invocation.clone());
            if invocation.program == "rustup" {
                self.clippy_missing.set(false);
                return Ok(output(0, ""));
            }
            if invocation.args.first().map(String::as_str) == Some("clippy")
                && self.clippy_missing.get()
            {
                return Ok(output(1, "error: no such command: `clippy`"));
            }
            if let Some(suffix) = &self.fail_cwd_suffix {
                if invocation.cwd.ends_with(suffix) {
                    return Ok(output(101, "compile error: boom"));
                }
            }
            Ok(output(0, ""))
        }
    }

    #[test]
    fn failing_module_does_not_stop_the_rest() {
        let root = PathBuf::from("/ws");
        let ws = fake_workspace(&root, &["aa", "bb", "cc"]);
        let settings = test_settings(&root);
        let runner = FakeRunner {
            fail_cwd_suffix: Some("bb".to_string()),
            ..FakeRunner::default()
        };

        let report = run(TaskKind::Build, None, &ws, &settings, &runner).expect("report");

        assert_eq!(runner.calls.borrow().len(), 3);
        assert!(!report.all_succeeded());
        let failed: Vec<&str> = report.failures().iter().map(|r| r.module.as_str()).collect();
        assert_eq!(failed, ["bb"]);
        assert!(report.summary().contains("1 of 3 modules failed"));
    }

    #[test]
    fn all_success_summary() {
        let root = PathBuf::from("/ws");
        let ws = fake_workspace(&root, &["aa", "bb"]);
        let settings = test_settings(&root);
        let runner = FakeRunner::default();

        let report = run(TaskKind::Test, None, &ws, &settings, &runner).expect("report");
        assert!(report.all_succeeded());
        assert_eq!(report.summary(), "test: all 2 modules succeeded");
    }

    #[test]
    fn explicit_selector_touches_only_that_module() {
        let root = PathBuf::from("/ws");
        let ws = fake_workspace(
            &root,
            &["db/gorm", "grpc/client", "grpc/server", "http/chi", "http/gin"],
        );
        let settings = test_settings(&root);
        let runner = FakeRunner::default();

        let report =
            run(TaskKind::Test, Some("http/gin"), &ws, &settings, &runner).expect("report");

        assert!(report.all_succeeded());
        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].cwd, root.join("http/gin"));
    }

    #[test]
    fn unknown_selector_fails() {
        let root = PathBuf::from("/ws");
        let ws = fake_workspace(&root, &["aa"]);
        let settings = test_settings(&root);
        let runner = FakeRunner::default();

        let err = run(TaskKind::Test, Some("nope"), &ws, &settings, &runner)
            .expect_err("unknown module");
        assert!(matches!(err, TaskError::UnknownModule(_)));
    }

    #[test]
    fn coverage_artifacts_get_distinct_names() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let ws = fake_workspace(tmp.path(), &["grpc/client", "http/gin"]);
        let settings = test_settings(tmp.path());
        let runner = FakeRunner::default();

        run(TaskKind::Coverage, None, &ws, &settings, &runner).expect("report");

        let calls = runner.calls.borrow();
        let artifacts: Vec<String> = calls
            .iter()
            .map(|c| c.args.last().expect("output path").clone())
            .collect();
        assert!(artifacts[0].ends_with("grpc_client.lcov"));
        assert!(artifacts[1].ends_with("http_gin.lcov"));
        assert!(settings.coverage_dir().is_dir());
    }

    #[test]
    fn coverage_file_names_replace_slashes() {
        assert_eq!(coverage_file_name("grpc/client"), "grpc_client.lcov");
        assert_eq!(coverage_file_name("flat"), "flat.lcov");
    }

    #[test]
    fn missing_lint_tool_is_installed_once_then_lint_runs() {
        let root = PathBuf::from("/ws");
        let ws = fake_workspace(&root, &["aa", "bb"]);
        let settings = test_settings(&root);
        let runner = FakeRunner {
            clippy_missing: Cell::new(true),
            ..FakeRunner::default()
        };

        let report = run(TaskKind::Lint, None, &ws, &settings, &runner).expect("report");

        assert!(report.all_succeeded());
        let calls = runner.calls.borrow();
        let installs = calls.iter().filter(|c| c.program == "rustup").count();
        assert_eq!(installs, 1);
        // probe + install + one lint per module
        assert_eq!(calls.len(), 4);
    }

    #[test]
    fn install_fallback_does_not_mask_a_genuine_lint_failure() {
        let root = PathBuf::from("/ws");
        let ws = fake_workspace(&root, &["aa"]);
        let settings = test_settings(&root);
        let runner = FakeRunner {
            fail_cwd_suffix: Some("aa".to_string()),
            ..FakeRunner::default()
        };

        let report = run(TaskKind::Lint, None, &ws, &settings, &runner).expect("report");

        assert!(!report.all_succeeded());
        match &report.failures()[0].outcome {
            TaskOutcome::Failed { detail } => assert!(detail.contains("compile error")),
            TaskOutcome::Success => panic!("expected failure"),
        }
    }
}
