//! Runs a descriptor's post-install command lines inside the staged
//! environment, in order. Unlike conda/pip requirements these are never
//! deduplicated: repeating a command in the merged descriptor runs it
//! twice, since a command may have a side effect the author relies on
//! (e.g. touching a marker file) rather than being idempotent.

use crate::error::BuilderError;
use crate::plan::BuildPlan;
use crate::reporter::{BuildReporter, BuildStage};
use crate::subprocess::{output_text, run_captured};
use std::path::Path;
use std::process::Command;

/// Runs each line of `commands` through the platform shell, in
/// `target_dir`, stopping at the first failure.
pub fn run_post_install(
    commands: &[String],
    target_dir: &Path,
    plan: &mut BuildPlan,
    reporter: &dyn BuildReporter,
) -> Result<(), BuilderError> {
    for (index, command_line) in commands.iter().enumerate() {
        let handle = reporter.on_stage_start(BuildStage::PostInstall { index });
        let output = run_captured(shell_command(command_line), target_dir)?;
        plan.append_section(
            &format!("post-install[{index}]"),
            &format!("$ {command_line}\n{}", output_text(&output)),
        )?;
        if !output.status.success() {
            return Err(BuilderError::PostInstallFailed {
                command: command_line.clone(),
                status: output.status.code().unwrap_or(-1),
            });
        }
        reporter.on_stage_complete(handle);
    }
    Ok(())
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NoopReporter;

    #[test]
    fn empty_command_list_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = BuildPlan::open(&dir.path().join("stage")).unwrap();
        run_post_install(&[], dir.path(), &mut plan, &NoopReporter).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn stops_at_first_failing_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = BuildPlan::open(&dir.path().join("stage")).unwrap();
        let commands = vec!["true".to_string(), "false".to_string(), "touch never.txt".to_string()];
        let err = run_post_install(&commands, dir.path(), &mut plan, &NoopReporter).unwrap_err();
        assert!(matches!(err, BuilderError::PostInstallFailed { command, .. } if command == "false"));
        assert!(!dir.path().join("never.txt").exists());
    }
}
