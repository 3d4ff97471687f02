//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{fmt, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueEnum, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const LOCAL_CONFIG_BASENAME: &str = "cantiere";
const DEFAULT_MARKER: &str = "Cargo.toml";
const DEFAULT_COVERAGE_DIR: &str = "coverage";
const DEFAULT_RELEASE_MANIFEST: &str = "release.toml";
const DEFAULT_CHANGELOG_TOOL: &str = "git-cliff";
const DEFAULT_BUMP_TOOL: &str = "cargo";
const DEFAULT_TAG_TOOL: &str = "git";
const DEFAULT_LINT_INSTALL: &[&str] = &["rustup", "component", "add", "clippy"];

/// Command-line arguments for the cantiere binary.
#[derive(Debug, Parser)]
#[command(name = "cantiere", version, about = "Workspace module orchestrator")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CANTIERE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Override the workspace root directory.
    #[arg(
        long = "workspace-root",
        env = "CANTIERE_WORKSPACE_ROOT",
        value_name = "PATH"
    )]
    pub workspace_root: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// List discovered modules.
    List {
        /// Emit the module list as JSON.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,
    },
    /// Synchronize dependency requirements in each module.
    Sync(TaskArgs),
    /// Type-check each module without producing artifacts.
    Verify(TaskArgs),
    /// Build each module.
    Build(TaskArgs),
    /// Run each module's tests.
    Test(TaskArgs),
    /// Run tests with a per-module coverage artifact.
    Coverage(TaskArgs),
    /// Lint each module; installs the lint tool on first use if missing.
    Lint(TaskArgs),
    /// Format each module's sources.
    Fmt(TaskArgs),
    /// Insert relative-linking override blocks into every module manifest.
    Link,
    /// Remove relative-linking override blocks from every module manifest.
    Unlink,
    /// Register a module in the release manifest.
    Register {
        /// Workspace-relative module path.
        #[arg(value_name = "MODULE")]
        module: String,
        /// Suppress tag creation for this module.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        skip_tag: bool,
        /// Pre-release label applied to calculated versions.
        #[arg(long, value_name = "LABEL")]
        prerelease: Option<String>,
    },
    /// Bump dependency requirements via the external bump tool.
    Bump(TaskArgs),
    /// Calculate the next release version.
    Version {
        /// Bump strength hint passed to the version calculator.
        #[arg(long, value_enum, default_value_t = BumpArg::Auto)]
        bump: BumpArg,
        #[arg(value_name = "MODULE")]
        module: Option<String>,
    },
    /// Create release tags for registered modules.
    Tag {
        /// Report the tags that would be created without creating them.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        dry_run: bool,
        #[arg(value_name = "MODULE")]
        module: Option<String>,
    },
    /// Generate the changelog file.
    Changelog {
        #[arg(value_name = "MODULE")]
        module: Option<String>,
    },
    /// Render the unreleased changelog section to stdout.
    RenderChangelog {
        #[arg(value_name = "MODULE")]
        module: Option<String>,
    },
}

#[derive(Debug, Args, Default, Clone)]
pub struct TaskArgs {
    /// Module path to scope to; omit to run against all discovered modules.
    #[arg(value_name = "MODULE")]
    pub module: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum BumpArg {
    Auto,
    Major,
    Minor,
    Patch,
}

impl BumpArg {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Patch => "patch",
        }
    }
}

impl fmt::Display for BumpArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub workspace: WorkspaceSettings,
    pub logging: LoggingSettings,
    pub coverage: CoverageSettings,
    pub lint: LintSettings,
    pub release: ReleaseSettings,
}

#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    pub root: PathBuf,
    pub marker: String,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CoverageSettings {
    /// Shared output directory for coverage artifacts, relative to the
    /// workspace root unless absolute.
    pub directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LintSettings {
    /// One-time install command run when the lint tool is missing.
    pub install: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReleaseSettings {
    /// Release manifest path, relative to the workspace root unless absolute.
    pub manifest: PathBuf,
    pub changelog_tool: String,
    pub bump_tool: String,
    pub tag_tool: String,
}

impl Settings {
    /// Directory names discovery must never descend into.
    #[must_use]
    pub fn prune_names(&self) -> Vec<String> {
        let mut names = vec!["target".to_string()];
        if let Some(name) = self.coverage.directory.file_name() {
            names.push(name.to_string_lossy().into_owned());
        }
        names
    }

    #[must_use]
    pub fn release_manifest_path(&self) -> PathBuf {
        if self.release.manifest.is_absolute() {
            self.release.manifest.clone()
        } else {
            self.workspace.root.join(&self.release.manifest)
        }
    }

    #[must_use]
    pub fn coverage_dir(&self) -> PathBuf {
        if self.coverage.directory.is_absolute() {
            self.coverage.directory.clone()
        } else {
            self.workspace.root.join(&self.coverage.directory)
        }
    }

    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let workspace = build_workspace_settings(raw.workspace)?;
        let logging = build_logging_settings(raw.logging)?;
        let coverage = build_coverage_settings(raw.coverage)?;
        let lint = build_lint_settings(raw.lint)?;
        let release = build_release_settings(raw.release)?;
        Ok(Self {
            workspace,
            logging,
            coverage,
            lint,
            release,
        })
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("CANTIERE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_cli_overrides(cli);

    Settings::from_raw(raw)
}

/// Parse the command line, then load settings with its overrides applied.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    workspace: RawWorkspaceSettings,
    logging: RawLoggingSettings,
    coverage: RawCoverageSettings,
    lint: RawLintSettings,
    release: RawReleaseSettings,
}

impl RawSettings {
    fn apply_cli_overrides(&mut self, cli: &CliArgs) {
        if let Some(root) = cli.workspace_root.as_ref() {
            self.workspace.root = Some(root.clone());
        }
        if let Some(level) = cli.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = cli.log_json {
            self.logging.json = Some(json);
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkspaceSettings {
    root: Option<PathBuf>,
    marker: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCoverageSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLintSettings {
    install: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawReleaseSettings {
    manifest: Option<PathBuf>,
    changelog_tool: Option<String>,
    bump_tool: Option<String>,
    tag_tool: Option<String>,
}

fn build_workspace_settings(
    workspace: RawWorkspaceSettings,
) -> Result<WorkspaceSettings, LoadError> {
    let root = workspace.root.unwrap_or_else(|| PathBuf::from("."));
    let marker = workspace
        .marker
        .unwrap_or_else(|| DEFAULT_MARKER.to_string());
    if marker.trim().is_empty() {
        return Err(LoadError::invalid("workspace.marker", "must not be empty"));
    }
    if marker.contains('/') || marker.contains('\\') {
        return Err(LoadError::invalid(
            "workspace.marker",
            "must be a bare file name",
        ));
    }
    Ok(WorkspaceSettings { root, marker })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_coverage_settings(coverage: RawCoverageSettings) -> Result<CoverageSettings, LoadError> {
    let directory = coverage
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_COVERAGE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "coverage.directory",
            "path must not be empty",
        ));
    }
    Ok(CoverageSettings { directory })
}

fn build_lint_settings(lint: RawLintSettings) -> Result<LintSettings, LoadError> {
    let install = lint.install.unwrap_or_else(|| {
        DEFAULT_LINT_INSTALL
            .iter()
            .map(|part| (*part).to_string())
            .collect()
    });
    if install.is_empty() {
        return Err(LoadError::invalid(
            "lint.install",
            "install command must name a program",
        ));
    }
    Ok(LintSettings { install })
}

fn build_release_settings(release: RawReleaseSettings) -> Result<ReleaseSettings, LoadError> {
    let manifest = release
        .manifest
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RELEASE_MANIFEST));
    if manifest.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "release.manifest",
            "path must not be empty",
        ));
    }

    let changelog_tool = non_empty_tool(
        release.changelog_tool,
        DEFAULT_CHANGELOG_TOOL,
        "release.changelog_tool",
    )?;
    let bump_tool = non_empty_tool(release.bump_tool, DEFAULT_BUMP_TOOL, "release.bump_tool")?;
    let tag_tool = non_empty_tool(release.tag_tool, DEFAULT_TAG_TOOL, "release.tag_tool")?;

    Ok(ReleaseSettings {
        manifest,
        changelog_tool,
        bump_tool,
        tag_tool,
    })
}

fn non_empty_tool(
    value: Option<String>,
    default: &str,
    key: &'static str,
) -> Result<String, LoadError> {
    let tool = value.unwrap_or_else(|| default.to_string());
    if tool.trim().is_empty() {
        return Err(LoadError::invalid(key, "tool name must not be empty"));
    }
    Ok(tool)
}
