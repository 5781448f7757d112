// ============================================================
// Layer 6: Workplace
// ============================================================
// Every non-restoring pipeline gets its own timestamped working
// directory under the configured root (default `_logs`):
//
//   _logs/2026-03-01_12-30-05-123456/
//     configs.json      ← written before any training starts
//     __data__.json     ← data shape summary
//     metrics.txt       ← appended by the metrics callback
//     checkpoints/      ← snapshots taken during training
//
// An existing directory is never reused: on a name clash the
// timestamp is simply drawn again.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::constants::{CHECKPOINTS_FOLDER, CONFIGS_FILE, TIME_FORMAT};
use crate::error::{Error, IoContext, Result};

const MAX_ATTEMPTS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workplace {
    root: PathBuf,
}

impl Workplace {
    /// Allocate a fresh, empty directory under `base`.
    pub fn allocate(base: &Path) -> Result<Self> {
        fs::create_dir_all(base).at(base)?;
        for _ in 0..MAX_ATTEMPTS {
            let name = Local::now().format(TIME_FORMAT).to_string();
            let root = base.join(name);
            // create_dir (not _all) fails if it exists, which is exactly the check we need
            match fs::create_dir(&root) {
                Ok(()) => {
                    tracing::info!("Workplace: '{}'", root.display());
                    return Ok(Self { root });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    std::thread::sleep(std::time::Duration::from_micros(50));
                }
                Err(e) => return Err(Error::io(&root, e)),
            }
        }
        Err(Error::config("workplace", format!("could not allocate a fresh folder under '{}'", base.display())))
    }

    /// Wrap an existing directory (used by `pack`).
    pub fn existing(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::missing("workplace", root));
        }
        Ok(Self { root: root.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn configs_path(&self) -> PathBuf {
        self.root.join(CONFIGS_FILE)
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join(CHECKPOINTS_FOLDER)
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_allocations_never_collide() {
        let tmp = TempDir::new().unwrap();
        let a   = Workplace::allocate(tmp.path()).unwrap();
        let b   = Workplace::allocate(tmp.path()).unwrap();
        assert_ne!(a, b);
        assert!(a.path().is_dir() && b.path().is_dir());
    }

    #[test]
    fn test_existing_requires_directory() {
        let tmp = TempDir::new().unwrap();
        assert!(Workplace::existing(&tmp.path().join("missing")).is_err());
        assert!(Workplace::existing(tmp.path()).is_ok());
    }
}
