//! Invokes `pip` inside an already-solved environment to install the
//! descriptor's `pip:` requirements, which the conda solver never sees.

use crate::error::BuilderError;
use crate::plan::BuildPlan;
use crate::subprocess::{command_line, output_text, run_captured};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Configuration for the pip install stage. `None` fields fall back to
/// pip's own defaults (PyPI, system trust store).
#[derive(Debug, Clone)]
pub struct PipInvocation {
    /// Path to the staged environment's `pip` (or `python -m pip`) entry
    /// point.
    pub binary: PathBuf,
    /// Package index URL override.
    pub index_url: Option<String>,
    /// Host to trust even without valid TLS, matching pip's
    /// `--trusted-host`.
    pub trusted_host: Option<String>,
    /// Whether TLS certificate verification is enabled. Carried through
    /// from the configuration surface; unlike the solver (which has a
    /// single `--insecure` switch), pip has no one flag that disables TLS
    /// verification outright — trust is granted per host via
    /// `trusted_host` instead, so this field does not by itself translate
    /// into an argument.
    pub verify_ssl: bool,
    /// Shared package cache directory, matching pip's `--cache-dir`.
    pub cache_dir: Option<PathBuf>,
    /// Additional local directory or URL to search for packages besides
    /// the index, matching pip's `--find-links`.
    pub find_links: Option<String>,
}

impl PipInvocation {
    /// Installs every line in `requirements` (already merged and
    /// deduplicated by the descriptor layer) into the environment rooted
    /// at `target_dir`. A no-op, successful immediately, if `requirements`
    /// is empty — most environments have no `pip:` section at all.
    pub fn run(
        &self,
        requirements: &[String],
        target_dir: &Path,
        plan: &mut BuildPlan,
    ) -> Result<(), BuilderError> {
        if requirements.is_empty() {
            return Ok(());
        }

        let requirements_path = sibling_requirements_path(target_dir);
        let body = requirements.join("\n") + "\n";
        fs_err::write(&requirements_path, body).map_err(|e| BuilderError::io(&requirements_path, e))?;

        let mut cmd = self.build_command(&requirements_path, target_dir);

        let line = command_line(&cmd);
        let output = run_captured(cmd, target_dir)?;
        plan.append_section("pip", &format!("$ {line}\n{}", output_text(&output)))?;

        if !output.status.success() {
            return Err(BuilderError::InstallerFailed(output.status.code().unwrap_or(-1)));
        }
        Ok(())
    }

    /// Builds the `pip install` command per the subprocess contract's
    /// mandated flag set, split out from [`Self::run`] so the argument list
    /// is testable without actually spawning `pip`.
    fn build_command(&self, requirements_path: &Path, target_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("install")
            .arg("--isolated")
            .arg("--no-color")
            .arg("--prefer-binary")
            .arg("--requirement")
            .arg(requirements_path);
        if let Some(cache_dir) = &self.cache_dir {
            cmd.arg("--cache-dir").arg(cache_dir);
        }
        if let Some(find_links) = &self.find_links {
            cmd.arg("--find-links").arg(find_links);
        }
        if let Some(index_url) = &self.index_url {
            cmd.arg("--index-url").arg(index_url);
        }
        if let Some(host) = &self.trusted_host {
            cmd.arg("--trusted-host").arg(host);
        }

        // Per the subprocess contract: the installer runs with the staged
        // environment's own bin directory ahead of everything else on
        // PATH, so it resolves `python`/`pip` from the environment it is
        // installing into rather than whatever is on the caller's PATH.
        cmd.env("PATH", prepend_env_bin(target_dir));
        cmd
    }
}

pub(crate) fn sibling_requirements_path(target_dir: &Path) -> PathBuf {
    let mut name = target_dir.as_os_str().to_owned();
    name.push(".requirements.txt");
    PathBuf::from(name)
}

#[cfg(unix)]
fn env_bin_dir(target_dir: &Path) -> PathBuf {
    target_dir.join("bin")
}

#[cfg(windows)]
fn env_bin_dir(target_dir: &Path) -> PathBuf {
    target_dir.join("Scripts")
}

fn prepend_env_bin(target_dir: &Path) -> std::ffi::OsString {
    let bin_dir = env_bin_dir(target_dir);
    match std::env::var_os("PATH") {
        Some(existing) => {
            let mut paths = vec![bin_dir.clone()];
            paths.extend(std::env::split_paths(&existing));
            std::env::join_paths(paths).unwrap_or_else(|_| bin_dir.into_os_string())
        }
        None => bin_dir.into_os_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_requirements_skip_invoking_pip() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("stage");
        fs_err::create_dir_all(&target).unwrap();
        let mut plan = BuildPlan::open(&target).unwrap();

        let pip = PipInvocation {
            binary: PathBuf::from("/does/not/exist/pip"),
            index_url: None,
            trusted_host: None,
            verify_ssl: true,
            cache_dir: None,
            find_links: None,
        };
        pip.run(&[], &target, &mut plan).unwrap();
    }

    #[test]
    fn build_command_includes_every_mandated_flag() {
        let pip = PipInvocation {
            binary: PathBuf::from("pip"),
            index_url: Some("https://pypi.example/simple".to_string()),
            trusted_host: Some("pypi.example".to_string()),
            verify_ssl: true,
            cache_dir: Some(PathBuf::from("/cache/pip")),
            find_links: Some("/opt/wheels".to_string()),
        };
        let target = PathBuf::from("/stage/demo");
        let requirements_path = PathBuf::from("/stage/demo.requirements.txt");
        let cmd = pip.build_command(&requirements_path, &target);
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();

        for expected in [
            "install",
            "--isolated",
            "--no-color",
            "--prefer-binary",
            "--requirement",
            "--cache-dir",
            "--find-links",
            "--index-url",
            "--trusted-host",
        ] {
            assert!(args.contains(&expected.to_string()), "missing {expected} in {args:?}");
        }
        assert!(!args.iter().any(|a| a == "--no-verify-ssl"));
    }

    #[test]
    fn prepend_env_bin_puts_staged_bin_dir_first() {
        let target = PathBuf::from("/stage/demo");
        let path = prepend_env_bin(&target);
        let first = std::env::split_paths(&path).next().unwrap();
        assert_eq!(first, env_bin_dir(&target));
    }
}
