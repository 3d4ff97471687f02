//! Narrow seam over external process invocation.
//!
//! Every task and release step goes through [`ToolRunner`] so the sequencing
//! logic can be exercised against a fake runner without spawning anything.

use std::{
    io::{self, ErrorKind},
    path::PathBuf,
    process::{Command, Stdio},
    time::Instant,
};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("`{program}` was not found on PATH")]
    NotFound { program: String },
    #[error("failed to run `{program}`: {source}")]
    Io { program: String, source: io::Error },
}

/// One external command: program, arguments, and the working directory the
/// command is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: cwd.into(),
        }
    }

    /// Render as a shell-like string for reports and dry-run output.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            if arg.contains(' ') {
                out.push('"');
                out.push_str(arg);
                out.push('"');
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

/// Captured result of an external command; the tool's own output is kept
/// verbatim so callers can surface it unmodified.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub trait ToolRunner {
    fn invoke(&self, invocation: &Invocation) -> Result<ExecOutput, ExecError>;
}

/// Production runner: spawns the command with piped output and waits.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn invoke(&self, invocation: &Invocation) -> Result<ExecOutput, ExecError> {
        let started_at = Instant::now();
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| {
                warn!(
                    target: "exec",
                    program = %invocation.program,
                    cwd = %invocation.cwd.display(),
                    error = %err,
                    "failed to spawn external command"
                );
                if err.kind() == ErrorKind::NotFound {
                    ExecError::NotFound {
                        program: invocation.program.clone(),
                    }
                } else {
                    ExecError::Io {
                        program: invocation.program.clone(),
                        source: err,
                    }
                }
            })?;

        let result = ExecOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            target: "exec",
            program = %invocation.program,
            cwd = %invocation.cwd.display(),
            exit_code = result.code.map(i64::from).unwrap_or(-1),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "external command finished"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let invocation = Invocation::new("git", ["tag", "-m", "release notes"], "/tmp");
        assert_eq!(invocation.display(), "git tag -m \"release notes\"");
    }

    #[test]
    fn missing_program_maps_to_not_found() {
        let invocation = Invocation::new("cantiere-no-such-binary", Vec::<String>::new(), ".");
        let err = SystemRunner.invoke(&invocation).expect_err("must fail");
        assert!(matches!(err, ExecError::NotFound { .. }));
    }
}
