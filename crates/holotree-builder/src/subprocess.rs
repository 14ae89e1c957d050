//! Subprocess invocation shared by every build stage.
//!
//! Mirrors `rattler_shell::run::run_in_environment`'s approach: build a
//! `std::process::Command`, run it to completion, and hand the caller back
//! the full captured output rather than streaming it — builds are
//! batch operations, not interactive ones, so there is no benefit to
//! line-by-line forwarding here.

use crate::error::BuilderError;
use std::path::Path;
use std::process::{Command, Output};

/// Runs `command` to completion in `working_dir`, inheriting no file
/// descriptors from the caller beyond what `std::process::Command`
/// defaults to, and returns the captured output regardless of exit status
/// (the caller decides what counts as failure).
pub fn run_captured(
    mut command: Command,
    working_dir: &Path,
) -> Result<Output, BuilderError> {
    command.current_dir(working_dir);
    let program = command.get_program().to_owned();
    command
        .output()
        .map_err(|e| BuilderError::io(Path::new(&program), e))
}

/// Renders a command's program and arguments as a single line, for the
/// build plan.
pub fn command_line(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(command.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Renders an [`Output`]'s combined stdout/stderr as readable text for the
/// build plan.
pub fn output_text(output: &Output) -> String {
    format!(
        "exit status: {}\n--- stdout ---\n{}\n--- stderr ---\n{}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    )
}
