// ============================================================
// Layer 6: Export lock
// ============================================================
// Cooperative mutual exclusion on an export target. The lock is
// a `__lock__` file created with O_EXCL semantics in the target's
// *parent* directory, so every save/load/pack/export touching
// anything in that directory queues behind the current holder.
//
// Lifecycle:
//   acquire → (work) → commit → drop   : lock released, target kept
//   acquire → (work fails)     → drop  : lock released; a writer
//                                        also removes the target
//                                        so nobody reads half a bundle
//
// Only callers that go through ExportLock are protected.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::{LOCK_FILE, WARNING_PREFIX};
use crate::error::{Error, IoContext, Result};
use crate::infra::io::{absolute, remove_path};

#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub timeout: Duration,
    pub poll:    Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(60), poll: Duration::from_millis(20) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Reader,
    Writer,
}

#[derive(Debug)]
pub struct ExportLock {
    lock_path: PathBuf,
    target:    PathBuf,
    mode:      LockMode,
    committed: bool,
}

impl ExportLock {
    pub fn reader(target: &Path) -> Result<Self> {
        Self::acquire(target, LockMode::Reader, LockOptions::default())
    }

    pub fn writer(target: &Path) -> Result<Self> {
        Self::acquire(target, LockMode::Writer, LockOptions::default())
    }

    pub fn acquire(target: &Path, mode: LockMode, options: LockOptions) -> Result<Self> {
        let target = absolute(target)?;
        let parent = target
            .parent()
            .ok_or_else(|| Error::config("export_folder", format!("'{}' has no parent", target.display())))?
            .to_path_buf();
        fs::create_dir_all(&parent).at(&parent)?;

        let lock_path = parent.join(LOCK_FILE);
        let started   = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(mut file) => {
                    // holder pid only helps humans clean up stale locks
                    let _ = writeln!(file, "{}", std::process::id());
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let waited = started.elapsed();
                    if waited >= options.timeout {
                        return Err(Error::Lock { path: lock_path, waited });
                    }
                    thread::sleep(options.poll);
                }
                Err(e) => return Err(Error::io(&lock_path, e)),
            }
        }
        tracing::debug!("Acquired {:?} lock '{}'", mode, lock_path.display());
        Ok(Self { lock_path, target, mode, committed: false })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Mark the guarded work as complete; the target survives the drop.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ExportLock {
    fn drop(&mut self) {
        if self.mode == LockMode::Writer && !self.committed && self.target.exists() {
            tracing::warn!(
                "{WARNING_PREFIX}export to '{}' did not finish, removing partial output",
                self.target.display()
            );
            if let Err(e) = remove_path(&self.target) {
                tracing::warn!("{WARNING_PREFIX}{e}");
            }
        }
        if let Err(e) = fs::remove_file(&self.lock_path) {
            tracing::warn!("{WARNING_PREFIX}failed to release '{}': {e}", self.lock_path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[test]
    fn test_lock_file_lives_in_parent() {
        let tmp    = TempDir::new().unwrap();
        let target = tmp.path().join("out");
        let lock   = ExportLock::reader(&target).unwrap();
        assert!(tmp.path().join(LOCK_FILE).exists());
        drop(lock);
        assert!(!tmp.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_second_acquire_times_out() {
        let tmp    = TempDir::new().unwrap();
        let target = tmp.path().join("out");
        let _held  = ExportLock::reader(&target).unwrap();
        let short  = LockOptions { timeout: Duration::from_millis(50), poll: Duration::from_millis(5) };
        let err    = ExportLock::acquire(&target, LockMode::Reader, short).unwrap_err();
        assert!(matches!(err, Error::Lock { .. }));
    }

    #[test]
    fn test_uncommitted_writer_removes_target() {
        let tmp    = TempDir::new().unwrap();
        let target = tmp.path().join("out");
        {
            let _lock = ExportLock::writer(&target).unwrap();
            fs::create_dir_all(target.join("checkpoints")).unwrap();
        }
        assert!(!target.exists());

        let lock = ExportLock::writer(&target).unwrap();
        fs::create_dir_all(&target).unwrap();
        lock.commit();
        assert!(target.exists());
    }

    #[test]
    fn test_waiters_are_serialised() {
        let tmp    = TempDir::new().unwrap();
        let target = Arc::new(tmp.path().join("out"));
        let trace  = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..2)
            .map(|id| {
                let target = Arc::clone(&target);
                let trace  = Arc::clone(&trace);
                thread::spawn(move || {
                    let lock = ExportLock::reader(&target).unwrap();
                    trace.lock().unwrap().push((id, "enter"));
                    thread::sleep(Duration::from_millis(30));
                    trace.lock().unwrap().push((id, "leave"));
                    drop(lock);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let trace = trace.lock().unwrap();
        assert_eq!(trace.len(), 4);
        // every enter is immediately followed by the same holder's leave
        assert_eq!(trace[0].0, trace[1].0);
        assert_eq!(trace[1].1, "leave");
        assert_eq!(trace[2].0, trace[3].0);
    }
}
