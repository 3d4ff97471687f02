use std::process;

use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

use cantiere::{
    config::{self, Command, Settings, TaskArgs},
    error::{AppError, source_chain},
    exec::{SystemRunner, ToolRunner},
    linking,
    release::{
        ReleaseManifest, ReleasePolicy,
        driver::{Driver, TagOutcome},
    },
    tasks::{self, TaskKind, TaskOutcome, TaskReport},
    telemetry,
    workspace::{Module, UnknownModuleError, Workspace},
};

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let rendered = source_chain(error).join(": ");
    if dispatcher::has_been_set() {
        error!(error = %rendered, "command failed");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %rendered, "command failed");
    });
}

fn run() -> Result<(), AppError> {
    let (cli, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let workspace = Workspace::discover(
        &settings.workspace.root,
        &settings.workspace.marker,
        &settings.prune_names(),
    )?;
    info!(
        target: "cantiere",
        root = %settings.workspace.root.display(),
        modules = workspace.modules.len(),
        "workspace discovered"
    );

    let runner = SystemRunner;

    match cli.command {
        Command::List { json } => list_modules(&workspace, json),
        Command::Sync(args) => run_task(TaskKind::Sync, &args, &workspace, &settings, &runner),
        Command::Verify(args) => run_task(TaskKind::Verify, &args, &workspace, &settings, &runner),
        Command::Build(args) => run_task(TaskKind::Build, &args, &workspace, &settings, &runner),
        Command::Test(args) => run_task(TaskKind::Test, &args, &workspace, &settings, &runner),
        Command::Coverage(args) => {
            run_task(TaskKind::Coverage, &args, &workspace, &settings, &runner)
        }
        Command::Lint(args) => run_task(TaskKind::Lint, &args, &workspace, &settings, &runner),
        Command::Fmt(args) => run_task(TaskKind::Fmt, &args, &workspace, &settings, &runner),
        Command::Link => finish_report(&linking::enable_all(&workspace)),
        Command::Unlink => finish_report(&linking::disable_all(&workspace)),
        Command::Register {
            module,
            skip_tag,
            prerelease,
        } => register_module(&workspace, &settings, &module, skip_tag, prerelease),
        Command::Bump(args) => {
            let modules = workspace.select(args.module.as_deref())?;
            let manifest = ReleaseManifest::load(&settings.release_manifest_path())?;
            let driver = Driver::new(&settings, &manifest, &runner);
            finish_report(&driver.bump_dependencies(&modules)?)
        }
        Command::Version { bump, module } => {
            let modules = workspace.select(module.as_deref())?;
            let manifest = ReleaseManifest::load(&settings.release_manifest_path())?;
            let driver = Driver::new(&settings, &manifest, &runner);
            let entries = driver.calculate_release(&modules, bump)?;
            let total = entries.len();
            let mut failed = 0;
            for entry in &entries {
                match &entry.version {
                    Ok(version) => println!("{}: {version}", entry.module),
                    Err(detail) => {
                        failed += 1;
                        print_failure(&entry.module, detail);
                    }
                }
            }
            exit_status(failed, total)
        }
        Command::Tag { dry_run, module } => {
            let modules = workspace.select(module.as_deref())?;
            let manifest = ReleaseManifest::load(&settings.release_manifest_path())?;
            let driver = Driver::new(&settings, &manifest, &runner);
            let actions = driver.tag_release(&modules, config::BumpArg::Auto, dry_run)?;
            let total = actions.len();
            let mut failed = 0;
            for action in &actions {
                match &action.outcome {
                    TagOutcome::Created(tag) => println!("created {tag}"),
                    TagOutcome::Planned(tag) => println!("would create {tag}"),
                    TagOutcome::Suppressed => {
                        println!("skipped {} (tagging suppressed)", action.module);
                    }
                    TagOutcome::Failed { detail } => {
                        failed += 1;
                        print_failure(&action.module, detail);
                    }
                }
            }
            exit_status(failed, total)
        }
        Command::Changelog { module } => {
            let manifest = ReleaseManifest::load(&settings.release_manifest_path())?;
            let driver = Driver::new(&settings, &manifest, &runner);
            driver.generate_changelog(optional_module(&workspace, module.as_deref())?)?;
            Ok(())
        }
        Command::RenderChangelog { module } => {
            let manifest = ReleaseManifest::load(&settings.release_manifest_path())?;
            let driver = Driver::new(&settings, &manifest, &runner);
            let rendered = driver.render_changelog(optional_module(&workspace, module.as_deref())?)?;
            print!("{rendered}");
            Ok(())
        }
    }
}

fn list_modules(workspace: &Workspace, json: bool) -> Result<(), AppError> {
    let paths: Vec<&str> = workspace.modules.iter().map(|m| m.path.as_str()).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&paths)?);
    } else {
        for path in paths {
            println!("{path}");
        }
    }
    Ok(())
}

fn run_task(
    kind: TaskKind,
    args: &TaskArgs,
    workspace: &Workspace,
    settings: &Settings,
    runner: &dyn ToolRunner,
) -> Result<(), AppError> {
    let report = tasks::run(kind, args.module.as_deref(), workspace, settings, runner)?;
    finish_report(&report)
}

/// Print per-module results and the summary line; translate a report with
/// failures into a non-zero exit.
fn finish_report(report: &TaskReport) -> Result<(), AppError> {
    for result in &report.results {
        match &result.outcome {
            TaskOutcome::Success => println!("ok    {}", result.module),
            TaskOutcome::Failed { detail } => print_failure(&result.module, detail),
        }
    }
    println!("{}", report.summary());
    exit_status(report.failures().len(), report.results.len())
}

fn print_failure(module: &str, detail: &str) {
    println!("FAIL  {module}");
    for line in detail.lines() {
        println!("      {line}");
    }
}

fn exit_status(failed: usize, total: usize) -> Result<(), AppError> {
    if failed == 0 {
        Ok(())
    } else {
        Err(AppError::ModulesFailed { failed, total })
    }
}

fn register_module(
    workspace: &Workspace,
    settings: &Settings,
    module: &str,
    skip_tag: bool,
    prerelease: Option<String>,
) -> Result<(), AppError> {
    if workspace.find(module).is_none() {
        return Err(UnknownModuleError(module.to_string()).into());
    }

    let path = settings.release_manifest_path();
    let mut manifest = ReleaseManifest::load(&path)?;
    manifest.register(
        module,
        ReleasePolicy {
            skip_tag,
            prerelease: prerelease.unwrap_or_default(),
        },
    )?;
    manifest.save(&path)?;
    println!("registered {module} in {}", path.display());
    Ok(())
}

fn optional_module<'w>(
    workspace: &'w Workspace,
    module: Option<&str>,
) -> Result<Option<&'w Module>, AppError> {
    match module {
        None => Ok(None),
        Some(path) => {
            let module = workspace
                .find(path)
                .ok_or_else(|| UnknownModuleError(path.to_string()))?;
            Ok(Some(module))
        }
    }
}
