// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

#[derive(Debug, thiserror::Error)]
pub enum ScratchError {
    #[error("could not prepare {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "{} contains {}, which board-runner did not create; refusing to clear it",
        dir.display(),
        entry.display()
    )]
    Foreign { dir: PathBuf, entry: PathBuf },
}

/// Working directory for one run's generated images.
///
/// A temporary directory is private to the invocation and goes away when
/// this is dropped, so concurrent runs never see each other's files. A
/// persistent one is cleared up front and left behind afterwards.
#[derive(Debug)]
pub enum Scratch {
    Temporary(TempDir),
    Persistent(PathBuf),
}

impl Scratch {
    pub fn prepare(persistent: Option<&Path>) -> Result<Self, ScratchError> {
        match persistent {
            Some(dir) => Self::persistent(dir),
            None => Self::temporary(),
        }
    }

    pub fn temporary() -> Result<Self, ScratchError> {
        tempfile::Builder::new()
            .prefix("board-runner-")
            .tempdir()
            .map(Scratch::Temporary)
            .map_err(|source| ScratchError::Io {
                path: std::env::temp_dir(),
                source,
            })
    }

    /// Empties `dir` of images from a previous run, creating it if needed.
    ///
    /// Only files that look like ours are removed. Anything else means the
    /// directory is being used for something other than scratch space.
    pub fn persistent(dir: &Path) -> Result<Self, ScratchError> {
        let io = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ScratchError::Io { path, source }
        };

        if dir.exists() {
            let mut stale = Vec::new();
            for entry in std::fs::read_dir(dir).map_err(io(dir))? {
                let entry = entry.map_err(io(dir))?;
                let path = entry.path();
                let is_file = entry.file_type().map_err(io(&path))?.is_file();
                if !(is_file && is_artifact(&path)) {
                    return Err(ScratchError::Foreign {
                        dir: dir.to_path_buf(),
                        entry: path,
                    });
                }
                stale.push(path);
            }
            for path in stale {
                log::debug!("removing {}", path.display());
                std::fs::remove_file(&path).map_err(io(&path))?;
            }
        } else {
            std::fs::create_dir_all(dir).map_err(io(dir))?;
        }
        Ok(Scratch::Persistent(dir.to_path_buf()))
    }

    pub fn path(&self) -> &Path {
        match self {
            Scratch::Temporary(dir) => dir.path(),
            Scratch::Persistent(dir) => dir,
        }
    }
}

fn is_artifact(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("bin" | "vmem")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_dirs_are_distinct_and_cleaned_up() {
        let a = Scratch::temporary().unwrap();
        let b = Scratch::temporary().unwrap();
        assert_ne!(a.path(), b.path());
        let path = a.path().to_path_buf();
        assert!(path.is_dir());
        drop(a);
        assert!(!path.exists());
    }

    #[test]
    fn persistent_dir_is_created() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("verilator_build");
        let scratch = Scratch::persistent(&dir).unwrap();
        assert_eq!(scratch.path(), dir);
        assert!(dir.is_dir());
    }

    #[test]
    fn persistent_dir_is_cleared() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("kernel.bin"), b"old").unwrap();
        std::fs::write(root.path().join("kernel.64.vmem"), b"old").unwrap();
        let scratch = Scratch::persistent(root.path()).unwrap();
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn refuses_to_clear_foreign_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("kernel.bin"), b"old").unwrap();
        std::fs::write(root.path().join("notes.txt"), b"mine").unwrap();
        let err = Scratch::persistent(root.path()).unwrap_err();
        assert!(matches!(err, ScratchError::Foreign { .. }));
        // Nothing was removed
        assert!(root.path().join("kernel.bin").exists());
    }
}
