//! Running the per-package `setup` executable (spec.md §4.7.1, §6).
//!
//! The setup script itself is an opaque external collaborator; this module
//! only knows its invocation contract (`<setup> {install|uninstall}
//! deferReboot`) and how to read back its exit code.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use fn_error_context::context;

/// Which direction to run the setup script in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `<setup> install deferReboot`
    Install,
    /// `<setup> uninstall deferReboot`
    Uninstall,
}

impl Direction {
    fn as_arg(self) -> &'static str {
        match self {
            Direction::Install => "install",
            Direction::Uninstall => "uninstall",
        }
    }
}

/// Run `<setup_path> {install|uninstall} deferReboot` to completion and
/// return its exit code. A process that died to a signal (no exit code)
/// is reported as a generic error code (-1), since spec.md's exit-code
/// table has no slot for that case and it isn't expected in practice.
#[context("Running setup script {setup_path:?}")]
pub fn run(setup_path: &Path, direction: Direction) -> Result<i32> {
    tracing::debug!(setup_path = %setup_path.display(), direction = ?direction, "exec setup");
    let status = Command::new(setup_path)
        .arg(direction.as_arg())
        .arg("deferReboot")
        .status()
        .with_context(|| format!("spawning {}", setup_path.display()))?;
    Ok(status.code().unwrap_or(-1))
}
