//! Top-level application error and exit reporting helpers.

use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    config::LoadError,
    exec::ExecError,
    linking::LinkError,
    release::ReleaseError,
    tasks::TaskError,
    telemetry::TelemetryError,
    workspace::{DiscoveryError, UnknownModuleError},
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    UnknownModule(#[from] UnknownModuleError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Release(#[from] ReleaseError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("failed to render output: {0}")]
    Render(#[from] serde_json::Error),
    #[error("{failed} of {total} modules failed")]
    ModulesFailed { failed: usize, total: usize },
}

/// Walk an error's source chain into a list of messages, outermost first.
pub fn source_chain(error: &dyn StdError) -> Vec<String> {
    let mut messages = vec![error.to_string()];
    let mut current = error.source();
    while let Some(inner) = current {
        messages.push(inner.to_string());
        current = inner.source();
    }
    messages
}
