//! Captures the activation environment of a freshly built environment:
//! the set of environment variables a shell would have after running the
//! environment's activation script. Recorded as `rcc_activate.json` inside
//! the staged tree so it becomes part of the published catalog like any
//! other file, letting a space restore come with a ready-to-source
//! environment snapshot instead of the caller having to re-derive it.

use crate::error::BuilderError;
use crate::plan::BuildPlan;
use crate::subprocess::{command_line, output_text, run_captured};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Configuration for the activation capture stage.
#[derive(Debug, Clone)]
pub struct ActivateInvocation {
    /// Path to the staged environment's activation entry point (a script
    /// or interpreter that, when run, prints its resulting environment as
    /// a flat JSON object of strings on stdout).
    pub binary: PathBuf,
}

/// Filename the captured activation environment is written under, inside
/// the staged tree.
pub const ACTIVATE_FILE_NAME: &str = "rcc_activate.json";

impl ActivateInvocation {
    /// Runs the activation entry point and writes its captured environment
    /// as `target_dir/rcc_activate.json`.
    pub fn run(&self, target_dir: &Path, plan: &mut BuildPlan) -> Result<(), BuilderError> {
        let mut cmd = Command::new(&self.binary);
        let line = command_line(&cmd);
        let output = run_captured(cmd, target_dir)?;
        plan.append_section("activate", &format!("$ {line}\n{}", output_text(&output)))?;

        if !output.status.success() {
            return Err(BuilderError::ActivationFailed(output.status.code().unwrap_or(-1)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let env: BTreeMap<String, String> = parse_activation_json(&stdout)?;
        let bytes = serde_json::to_vec_pretty(&env).expect("a BTreeMap<String, String> always serializes");
        let path = target_dir.join(ACTIVATE_FILE_NAME);
        fs_err::write(&path, bytes).map_err(|e| BuilderError::io(&path, e))?;
        Ok(())
    }
}

fn parse_activation_json(stdout: &str) -> Result<BTreeMap<String, String>, BuilderError> {
    use serde::de::Error as _;
    let value: Value = serde_json::from_str(stdout.trim())?;
    let object = value
        .as_object()
        .ok_or_else(|| serde_json::Error::custom("activation output was not a JSON object"))?;
    let mut env = BTreeMap::new();
    for (key, v) in object {
        if let Some(s) = v.as_str() {
            env.insert(key.clone(), s.to_string());
        }
    }
    Ok(env)
}
