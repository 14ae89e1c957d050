//! Invokes the external conda-compatible solver/installer to materialize a
//! descriptor's conda requirements into a staging directory.

use crate::corruption::CorruptionScanner;
use crate::error::BuilderError;
use crate::plan::BuildPlan;
use crate::subprocess::{command_line, output_text, run_captured};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Configuration for one solver invocation. `repodata_ttl` and
/// `forced_debug` are the two knobs the retry envelope flips on a second
/// attempt; everything else stays constant across attempts.
#[derive(Debug, Clone)]
pub struct SolverInvocation {
    /// Path to the conda-compatible solver binary (`micromamba`, `conda`,
    /// or a vendored equivalent).
    pub binary: PathBuf,
    /// Channel alias override, passed through from the caller's
    /// configuration surface.
    pub channel_alias: Option<String>,
    /// Whether TLS certificate verification is enabled for package
    /// downloads.
    pub verify_ssl: bool,
    /// How long cached repodata is considered fresh, in seconds. `0`
    /// forces a full refetch; used on the forced-debug retry.
    pub repodata_ttl: u64,
    /// Whether to request debug-level solver output. Forced to `true` on
    /// the retry so a second failure leaves a readable trail.
    pub forced_debug: bool,
}

impl SolverInvocation {
    /// Returns a copy of this invocation configured for the one-shot
    /// forced-debug retry: maximum verbosity and no repodata cache.
    pub fn forced_retry(&self) -> Self {
        SolverInvocation {
            repodata_ttl: 0,
            forced_debug: true,
            ..self.clone()
        }
    }

    /// Runs the solver against `descriptor_path`, materializing packages
    /// into `target_dir`. On success `target_dir` holds a fully solved
    /// conda environment. If the solver's output trips the three-signal
    /// corruption detector, `target_dir` is deleted and
    /// [`BuilderError::SolverUnsafe`] is returned instead of a plain exit
    /// status failure, since that case is not worth retrying against the
    /// same package cache.
    pub fn run(
        &self,
        descriptor_path: &Path,
        target_dir: &Path,
        plan: &mut BuildPlan,
    ) -> Result<(), BuilderError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("create")
            .arg("--always-copy")
            .arg("--no-rc")
            .arg("--safety-checks")
            .arg("enabled")
            .arg("--extra-safety-checks")
            .arg("--retry-clean-cache")
            .arg("--strict-channel-priority")
            .arg("--repodata-ttl")
            .arg(self.repodata_ttl.to_string())
            .arg("-y")
            .arg("-f")
            .arg(descriptor_path)
            .arg("-p")
            .arg(target_dir);

        if self.forced_debug {
            cmd.arg("--verbosity").arg("debug");
        }
        if let Some(alias) = &self.channel_alias {
            cmd.arg("--channel-alias").arg(alias);
        }
        if !self.verify_ssl {
            cmd.arg("--insecure");
        }

        // Per the subprocess contract: the solver gets its own root prefix
        // and the caller's temp directory, not whatever the parent process
        // happened to inherit.
        let temp_dir = std::env::temp_dir();
        cmd.env("MAMBA_ROOT_PREFIX", target_dir)
            .env("TEMP", &temp_dir)
            .env("TMP", &temp_dir);

        let line = command_line(&cmd);
        let output = run_captured(cmd, descriptor_path.parent().unwrap_or(Path::new(".")))?;
        plan.append_section("solve", &format!("$ {line}\n{}", output_text(&output)))?;

        let mut scanner = CorruptionScanner::new();
        scanner.feed(&String::from_utf8_lossy(&output.stdout));
        scanner.feed(&String::from_utf8_lossy(&output.stderr));

        if scanner.is_corrupted() {
            holotree_fs::rename_and_remove(target_dir)?;
            return Err(BuilderError::SolverUnsafe);
        }
        if !output.status.success() {
            return Err(BuilderError::SolverFailed(output.status.code().unwrap_or(-1)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SolverInvocation {
        SolverInvocation {
            binary: PathBuf::from("micromamba"),
            channel_alias: None,
            verify_ssl: true,
            repodata_ttl: 900,
            forced_debug: false,
        }
    }

    #[test]
    fn forced_retry_resets_ttl_and_verbosity_only() {
        let base = sample();
        let retry = base.forced_retry();
        assert_eq!(retry.repodata_ttl, 0);
        assert!(retry.forced_debug);
        assert_eq!(retry.binary, base.binary);
        assert_eq!(retry.verify_ssl, base.verify_ssl);
    }
}
