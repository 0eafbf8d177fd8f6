// tb-core/src/lock.rs
//! Per-formula exclusive locks backed by `flock(2)`.
//!
//! `flock` locks belong to an open file description, so a second open of the same lock file
//! conflicts even inside one process. Acquisition never blocks: a held lock fails fast with
//! `OperationInProgress`, naming the holder from the diagnostic written into the file.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tb_common::error::{Result, TbError};
use tracing::{debug, warn};

/// Diagnostic information written to lock files
#[derive(Debug, Serialize, Deserialize)]
struct LockDiagnostic {
    pid: u32,
    name: String,
    acquired_at: DateTime<Utc>,
    reason: String,
}

pub fn lock_path(locks_dir: &Path, name: &str) -> PathBuf {
    locks_dir.join(format!("{name}.formula.lock"))
}

pub struct FormulaLock {
    /// `None` once released.
    file: Option<File>,
    lock_path: PathBuf,
    name: String,
}

impl std::fmt::Debug for FormulaLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormulaLock")
            .field("name", &self.name)
            .field("lock_path", &self.lock_path)
            .field("held", &self.file.is_some())
            .finish()
    }
}

impl FormulaLock {
    pub fn acquire(locks_dir: &Path, name: &str, reason: &str) -> Result<Self> {
        fs::create_dir_all(locks_dir)?;
        let lock_path = lock_path(locks_dir, name);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        let fd = file.as_raw_fd();
        // SAFETY: `fd` is a valid file descriptor owned by `file`.
        let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            let detail = read_holder(&mut file)
                .unwrap_or_else(|| "held by another process".to_string());
            debug!("[{}] Lock busy: {}", name, detail);
            return Err(TbError::OperationInProgress {
                name: name.to_string(),
                detail,
            });
        }

        let diagnostic = LockDiagnostic {
            pid: std::process::id(),
            name: name.to_string(),
            acquired_at: Utc::now(),
            reason: reason.to_string(),
        };
        let json = serde_json::to_string(&diagnostic)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(json.as_bytes())?;
        file.flush()?;

        debug!("[{}] Acquired lock {}", name, lock_path.display());
        Ok(Self {
            file: Some(file),
            lock_path,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Releases the lock. Calling it again is a no-op.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let fd = file.as_raw_fd();
            // SAFETY: `fd` is still owned by `file`, which is closed right after.
            unsafe {
                libc::flock(fd, libc::LOCK_UN);
            }
            debug!("[{}] Released lock", self.name);
        }
    }
}

impl Drop for FormulaLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_holder(file: &mut File) -> Option<String> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    match serde_json::from_str::<LockDiagnostic>(&contents) {
        Ok(d) => Some(format!(
            "locked by PID {} ({}, acquired {})",
            d.pid, d.reason, d.acquired_at
        )),
        Err(e) => {
            warn!("Unreadable lock diagnostic: {}", e);
            None
        }
    }
}

/// The locks held by one install session, released together.
#[derive(Debug, Default)]
pub struct LockSet {
    locks: Vec<FormulaLock>,
}

impl LockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock for `name` unless this set already holds it.
    pub fn acquire(&mut self, locks_dir: &Path, name: &str, reason: &str) -> Result<()> {
        if self.holds(name) {
            return Ok(());
        }
        let lock = FormulaLock::acquire(locks_dir, name, reason)?;
        self.locks.push(lock);
        Ok(())
    }

    pub fn holds(&self, name: &str) -> bool {
        self.locks.iter().any(|l| l.name == name && l.is_held())
    }

    pub fn names(&self) -> Vec<&str> {
        self.locks.iter().map(FormulaLock::name).collect()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn release_all(&mut self) {
        for mut lock in self.locks.drain(..).rev() {
            lock.release();
        }
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let temp_dir = tempdir().unwrap();
        let mut first = FormulaLock::acquire(temp_dir.path(), "wget", "install").unwrap();

        match FormulaLock::acquire(temp_dir.path(), "wget", "install") {
            Err(TbError::OperationInProgress { name, detail }) => {
                assert_eq!(name, "wget");
                assert!(detail.contains(&std::process::id().to_string()));
            }
            other => panic!("expected OperationInProgress, got {other:?}"),
        }

        first.release();
        first.release();
        assert!(!first.is_held());
        FormulaLock::acquire(temp_dir.path(), "wget", "install").unwrap();
    }

    #[test]
    fn drop_releases_lock() {
        let temp_dir = tempdir().unwrap();
        {
            let _lock = FormulaLock::acquire(temp_dir.path(), "curl", "install").unwrap();
        }
        FormulaLock::acquire(temp_dir.path(), "curl", "install").unwrap();
    }

    #[test]
    fn diagnostic_is_written_to_lock_file() {
        let temp_dir = tempdir().unwrap();
        let lock = FormulaLock::acquire(temp_dir.path(), "zlib", "installing zlib").unwrap();
        assert_eq!(lock.lock_path(), temp_dir.path().join("zlib.formula.lock"));
        let contents = fs::read_to_string(lock.lock_path()).unwrap();
        let diagnostic: LockDiagnostic = serde_json::from_str(&contents).unwrap();
        assert_eq!(diagnostic.pid, std::process::id());
        assert_eq!(diagnostic.name, "zlib");
        assert_eq!(diagnostic.reason, "installing zlib");
    }

    #[test]
    fn different_names_do_not_conflict() {
        let temp_dir = tempdir().unwrap();
        let _a = FormulaLock::acquire(temp_dir.path(), "a", "install").unwrap();
        let _b = FormulaLock::acquire(temp_dir.path(), "b", "install").unwrap();
    }

    #[test]
    fn lock_set_is_reentrant_per_name_and_releases_together() {
        let temp_dir = tempdir().unwrap();
        let mut set = LockSet::new();
        set.acquire(temp_dir.path(), "x", "install").unwrap();
        set.acquire(temp_dir.path(), "y", "install").unwrap();
        set.acquire(temp_dir.path(), "x", "install").unwrap();
        assert_eq!(set.names(), ["x", "y"]);
        assert!(FormulaLock::acquire(temp_dir.path(), "y", "other").is_err());

        set.release_all();
        assert!(set.is_empty());
        FormulaLock::acquire(temp_dir.path(), "x", "other").unwrap();
        FormulaLock::acquire(temp_dir.path(), "y", "other").unwrap();
    }
}
