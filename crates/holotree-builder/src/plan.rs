//! The build plan: a plain-text diagnostic log of every command the
//! builder ran for one attempt, written as it happens so a build that
//! hangs or crashes still leaves a readable trail.

use crate::error::BuilderError;
use fs_err as fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// An open, append-only record of one build attempt. Lives beside the
/// staging directory (`<target>.plan`) for the lifetime of the attempt;
/// [`BuildPlan::promote`] moves it next to the published template on
/// success, leaving it in place under the staging root on failure so an
/// operator can inspect what ran.
pub struct BuildPlan {
    path: PathBuf,
    file: fs::File,
}

impl BuildPlan {
    /// Opens a new plan file at `<target>.plan`, truncating any previous
    /// attempt's plan for the same staging target.
    pub fn open(target: &Path) -> Result<Self, BuilderError> {
        let path = sibling_plan_path(target);
        let file = fs::File::create(&path).map_err(|e| BuilderError::io(&path, e))?;
        Ok(BuildPlan { path, file })
    }

    /// The plan file's current on-disk path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a titled section to the plan, e.g. the solver command line
    /// and its captured output.
    pub fn append_section(&mut self, title: &str, body: &str) -> Result<(), BuilderError> {
        writeln!(self.file, "=== {title} ===\n{body}\n").map_err(|e| BuilderError::io(&self.path, e))?;
        self.file.flush().map_err(|e| BuilderError::io(&self.path, e))
    }

    /// Moves the plan file to `dest`, consuming this handle. Used once a
    /// build attempt succeeds and its staged tree is promoted.
    pub fn promote(self, dest: &Path) -> Result<(), BuilderError> {
        drop(self.file);
        if let Some(parent) = dest.parent() {
            holotree_fs::ensure_dir(parent, 0o777)?;
        }
        fs::rename(&self.path, dest).map_err(|e| BuilderError::io(dest, e))?;
        Ok(())
    }
}

fn sibling_plan_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".plan");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_sections_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("stage");
        let mut plan = BuildPlan::open(&target).unwrap();
        plan.append_section("solve", "conda create -f env.yaml").unwrap();
        plan.append_section("pip", "pip install -r requirements.txt").unwrap();

        let contents = fs::read_to_string(plan.path()).unwrap();
        assert!(contents.contains("=== solve ==="));
        assert!(contents.contains("=== pip ==="));
        assert!(contents.find("solve").unwrap() < contents.find("pip").unwrap());
    }

    #[test]
    fn promote_moves_plan_file_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("stage");
        let mut plan = BuildPlan::open(&target).unwrap();
        plan.append_section("solve", "ok").unwrap();

        let dest = dir.path().join("templates").join("deadbeef.plan");
        plan.promote(&dest).unwrap();
        assert!(dest.is_file());
        assert!(!sibling_plan_path(&target).exists());
    }
}
