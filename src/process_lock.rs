use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::subprocess::process_alive;

/// How a running instance was launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceMode {
    Daemon,
    Supervised,
}

impl std::fmt::Display for InstanceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceMode::Daemon => f.write_str("daemon"),
            InstanceMode::Supervised => f.write_str("supervised"),
        }
    }
}

/// Single-instance guard: an exclusive advisory lock on a well-known
/// file under the log directory.
pub struct ProcessLock {
    lock_path: PathBuf,
    file: Option<File>,
}

impl ProcessLock {
    pub fn new(lock_path: PathBuf) -> Self {
        ProcessLock {
            lock_path,
            file: None,
        }
    }

    /// Try to take the lock. Returns false when another instance holds
    /// it. The pid is written into the file for inspection.
    pub fn acquire(&mut self) -> bool {
        if let Some(parent) = self.lock_path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return false;
            }
        }

        let Ok(mut file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
        else {
            return false;
        };

        let locked = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0;
        if !locked {
            debug!("Lock {} is held by another process", self.lock_path.display());
            return false;
        }

        let _ = file.set_len(0);
        let _ = write!(file, "{}", std::process::id());
        let _ = file.sync_all();

        self.file = Some(file);
        info!("Acquired instance lock at {}", self.lock_path.display());
        true
    }

    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            unsafe {
                libc::flock(file.as_raw_fd(), libc::LOCK_UN);
            }
            info!("Released instance lock");
        }
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Find another running spindle daemon by its command-line
    /// signature. Shell wrappers and our own process tree are skipped.
    pub async fn find_running() -> Option<(u32, InstanceMode)> {
        let output = Command::new("pgrep")
            .args(["-f", "spindle start", "-a"])
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let own_pid = std::process::id();
        let parent_pid = unsafe { libc::getppid() } as u32;

        for line in stdout.lines() {
            let mut parts = line.splitn(2, ' ');
            let Some(pid) = parts.next().and_then(|p| p.parse::<u32>().ok()) else {
                continue;
            };
            let cmdline = parts.next().unwrap_or("");

            if pid == own_pid || pid == parent_pid {
                continue;
            }
            if cmdline.contains("/sh ")
                || cmdline.contains("/bash")
                || cmdline.contains("/zsh")
                || cmdline.starts_with("sh -")
            {
                continue;
            }

            let mode = if cmdline.contains("--supervised") {
                InstanceMode::Supervised
            } else {
                InstanceMode::Daemon
            };
            return Some((pid, mode));
        }

        None
    }

    /// Stop a process: SIGTERM, wait up to ten seconds, then SIGKILL.
    pub async fn stop_process(pid: u32) -> bool {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }

        for _ in 0..10 {
            if !process_alive(pid) {
                return true;
            }
            sleep(Duration::from_secs(1)).await;
        }

        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        sleep(Duration::from_millis(500)).await;
        !process_alive(pid)
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("spindle.lock");

        let mut lock = ProcessLock::new(lock_path.clone());
        assert!(lock.acquire());
        assert!(lock.is_held());

        let contents = std::fs::read_to_string(&lock_path).unwrap();
        assert_eq!(contents, std::process::id().to_string());

        lock.release();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_second_acquire_in_process_fails_then_succeeds_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("spindle.lock");

        let mut first = ProcessLock::new(lock_path.clone());
        assert!(first.acquire());

        // flock is per open file description; a second descriptor in the
        // same process contends the same way another process would.
        let mut second = ProcessLock::new(lock_path.clone());
        assert!(!second.acquire());

        first.release();
        assert!(second.acquire());
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = ProcessLock::new(dir.path().join("spindle.lock"));
        assert!(lock.acquire());
        lock.release();
        lock.release();
    }
}
