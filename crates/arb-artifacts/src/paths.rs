// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run-directory layout.

use std::io;
use std::path::{Path, PathBuf};

/// The canonical layout of one run directory.
#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
}

impl RunPaths {
    /// Layout rooted at `<runs_dir>/<run_id>`.
    #[must_use]
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        Self {
            root: runs_dir.join(run_id),
        }
    }

    /// Create the run directory tree.
    ///
    /// # Errors
    ///
    /// Filesystem failure creating any directory.
    pub fn create(&self, debug: bool, clustering: bool) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        if debug {
            std::fs::create_dir_all(self.root.join("debug"))?;
        }
        if clustering {
            std::fs::create_dir_all(self.root.join("groups"))?;
        }
        Ok(())
    }

    /// The run directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `config.resolved.json`
    #[must_use]
    pub fn config(&self) -> PathBuf {
        self.root.join("config.resolved.json")
    }

    /// `manifest.json`
    #[must_use]
    pub fn manifest(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    /// `trial_plan.jsonl`
    #[must_use]
    pub fn trial_plan(&self) -> PathBuf {
        self.root.join("trial_plan.jsonl")
    }

    /// `trials.jsonl`
    #[must_use]
    pub fn trials(&self) -> PathBuf {
        self.root.join("trials.jsonl")
    }

    /// `parsed.jsonl`
    #[must_use]
    pub fn parsed(&self) -> PathBuf {
        self.root.join("parsed.jsonl")
    }

    /// `convergence_trace.jsonl`
    #[must_use]
    pub fn convergence_trace(&self) -> PathBuf {
        self.root.join("convergence_trace.jsonl")
    }

    /// `monitoring.jsonl`
    #[must_use]
    pub fn monitoring(&self) -> PathBuf {
        self.root.join("monitoring.jsonl")
    }

    /// `debug/embeddings.jsonl`
    #[must_use]
    pub fn debug_embeddings(&self) -> PathBuf {
        self.root.join("debug").join("embeddings.jsonl")
    }

    /// `groups/assignments.jsonl`
    #[must_use]
    pub fn group_assignments(&self) -> PathBuf {
        self.root.join("groups").join("assignments.jsonl")
    }

    /// `groups/state.json`
    #[must_use]
    pub fn group_state(&self) -> PathBuf {
        self.root.join("groups").join("state.json")
    }

    /// `embeddings.arrow`
    #[must_use]
    pub fn embeddings_arrow(&self) -> PathBuf {
        self.root.join("embeddings.arrow")
    }

    /// `embeddings.provenance.json`
    #[must_use]
    pub fn provenance(&self) -> PathBuf {
        self.root.join("embeddings.provenance.json")
    }

    /// `aggregates.json`
    #[must_use]
    pub fn aggregates(&self) -> PathBuf {
        self.root.join("aggregates.json")
    }

    /// `receipt.txt`
    #[must_use]
    pub fn receipt(&self) -> PathBuf {
        self.root.join("receipt.txt")
    }

    /// A path relative to the run directory, for the artifact index.
    #[must_use]
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_contract() {
        let paths = RunPaths::new(Path::new("/runs"), "20260801T000000Z_ab12cd");
        assert!(paths.manifest().ends_with("20260801T000000Z_ab12cd/manifest.json"));
        assert!(paths.debug_embeddings().ends_with("debug/embeddings.jsonl"));
        assert!(paths.group_assignments().ends_with("groups/assignments.jsonl"));
    }

    #[test]
    fn create_makes_optional_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RunPaths::new(dir.path(), "r1");
        paths.create(true, true).unwrap();
        assert!(paths.root().join("debug").is_dir());
        assert!(paths.root().join("groups").is_dir());

        let bare = RunPaths::new(dir.path(), "r2");
        bare.create(false, false).unwrap();
        assert!(!bare.root().join("debug").exists());
        assert!(!bare.root().join("groups").exists());
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let paths = RunPaths::new(Path::new("/runs"), "r");
        assert_eq!(paths.relative(&paths.debug_embeddings()), "debug/embeddings.jsonl");
        assert_eq!(paths.relative(&paths.manifest()), "manifest.json");
    }
}
