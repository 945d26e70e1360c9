use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Tracks the pid of the external tool currently driven by a stage so a
/// shutdown can reach it. At most one child runs at a time (stages are
/// serialized), so a single slot suffices. Once `terminate` has run, the
/// cancelled flag stays set so multi-part stages stop launching new
/// children.
#[derive(Default)]
pub struct ActiveChild {
    pid: Mutex<Option<u32>>,
    cancelled: AtomicBool,
}

impl ActiveChild {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pid: Option<u32>) {
        *self.pid.lock().unwrap() = pid;
        if let Some(pid) = pid {
            debug!("Registered active child pid {pid}");
        }
    }

    pub fn clear(&self) {
        *self.pid.lock().unwrap() = None;
    }

    pub fn current(&self) -> Option<u32> {
        *self.pid.lock().unwrap()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Ask the in-flight child to exit: SIGTERM first, SIGKILL if it is
    /// still alive after the grace window.
    pub async fn terminate(&self, grace_secs: u64) {
        self.cancelled.store(true, Ordering::SeqCst);
        let Some(pid) = self.current() else {
            return;
        };

        info!("Terminating in-flight child process {pid}");
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }

        for _ in 0..grace_secs {
            sleep(Duration::from_secs(1)).await;
            if !process_alive(pid) {
                self.clear();
                return;
            }
        }

        warn!("Child {pid} ignored SIGTERM, sending SIGKILL");
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        self.clear();
    }
}

pub fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
