//! Orchestration core for a workspace of independently versioned modules.
//!
//! A module is a directory under the workspace root that carries a manifest
//! marker file. The library discovers modules, sequences per-module tasks,
//! toggles relative-linking override blocks inside module manifests, and
//! drives external release-automation binaries from a central release
//! manifest. What happens inside a module is delegated to the module's own
//! build tooling; this crate only sequences, scopes working directories, and
//! aggregates results.

pub mod config;
pub mod error;
pub mod exec;
pub mod linking;
pub mod release;
pub mod tasks;
pub mod telemetry;
pub mod workspace;
