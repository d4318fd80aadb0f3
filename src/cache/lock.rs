//! PID lock file guarding the cache directory.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{LearnError, Result};

/// Held for the duration of a scan; the lock file is removed on drop.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
}

/// State of the process named in an existing lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Running,
    Gone,
}

impl CacheLock {
    /// Take the lock at `path`.
    ///
    /// A lock left behind by a process that no longer exists is replaced.
    pub fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_with(path, owner_state)
    }

    fn acquire_with(path: &Path, owner_state: impl Fn(u32) -> Result<Owner>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LearnError::io(parent, e))?;
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match contents.trim().parse::<u32>() {
                Ok(pid) if pid != std::process::id() => match owner_state(pid)? {
                    Owner::Running => return Err(LearnError::CacheLocked { pid }),
                    Owner::Gone => debug!(pid, "Removing stale cache lock"),
                },
                Ok(_) => debug!("Cache lock already names this process"),
                Err(_) => warn!(path = %path.display(), "Unreadable cache lock, replacing it"),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(LearnError::io(path, e)),
        }

        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(LearnError::io(path, e)),
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| LearnError::io(path, e))?;
        write!(file, "{}", std::process::id()).map_err(|e| LearnError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove cache lock");
        }
    }
}

/// Decide whether `pid` still runs.
///
/// Uses `/proc` where available and `kill -0` elsewhere. For `kill`, "No
/// such process" means the owner is gone; any other failure (for example a
/// process owned by another user) cannot be decided and is an error.
fn owner_state(pid: u32) -> Result<Owner> {
    let proc_root = Path::new("/proc");
    if proc_root.join("self").exists() {
        return Ok(if proc_root.join(pid.to_string()).exists() {
            Owner::Running
        } else {
            Owner::Gone
        });
    }

    let output = Command::new("kill")
        .args(["-0", &pid.to_string()])
        .env("LC_ALL", "C")
        .output()
        .map_err(|e| LearnError::LockCheckFailed {
            pid,
            reason: e.to_string(),
        })?;
    kill_result(pid, output.status.success(), &String::from_utf8_lossy(&output.stderr))
}

/// Interpret the outcome of `kill -0 <pid>`.
fn kill_result(pid: u32, success: bool, stderr: &str) -> Result<Owner> {
    if success {
        return Ok(Owner::Running);
    }
    if stderr.contains("No such process") {
        Ok(Owner::Gone)
    } else {
        Err(LearnError::LockCheckFailed {
            pid,
            reason: stderr.trim().to_string(),
        })
    }
}
