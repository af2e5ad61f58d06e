//! Per-thread tool state.
//!
//! Tracks when files were last read by a tool and which background processes
//! a tool started, so both survive a save/load cycle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A process started by a tool that may outlive the turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundProcess {
    pub pid: u32,
    pub command: String,
    pub log_path: PathBuf,
    pub start_time: DateTime<Utc>,
}

/// Answers whether a process id still refers to a running process.
pub trait ProcessMonitor: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Checks liveness with `kill(pid, 0)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalProcessMonitor;

impl ProcessMonitor for SignalProcessMonitor {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // SAFETY: signal 0 performs the permission and existence checks only;
        // no signal is delivered and no memory is shared with the callee.
        let result = unsafe { libc::kill(pid, 0) };
        if result == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct Inner {
    file_last_access: HashMap<String, DateTime<Utc>>,
    background_processes: Vec<BackgroundProcess>,
}

/// Shared, lock-protected tool state owned by one thread.
#[derive(Debug, Default, Clone)]
pub struct ToolState {
    inner: Arc<Mutex<Inner>>,
}

impl ToolState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that a tool read `path` now.
    pub fn touch_file(&self, path: impl Into<String>) {
        self.lock().file_last_access.insert(path.into(), Utc::now());
    }

    pub fn file_last_access(&self) -> HashMap<String, DateTime<Utc>> {
        self.lock().file_last_access.clone()
    }

    pub fn set_file_last_access(&self, access: HashMap<String, DateTime<Utc>>) {
        self.lock().file_last_access = access;
    }

    pub fn add_background_process(&self, process: BackgroundProcess) {
        self.lock().background_processes.push(process);
    }

    pub fn background_processes(&self) -> Vec<BackgroundProcess> {
        self.lock().background_processes.clone()
    }

    /// Replace the process list, keeping only processes that are still alive.
    pub fn restore_background_processes(
        &self,
        processes: Vec<BackgroundProcess>,
        monitor: &dyn ProcessMonitor,
    ) -> usize {
        let alive: Vec<BackgroundProcess> = processes
            .into_iter()
            .filter(|p| {
                let alive = monitor.is_alive(p.pid);
                if !alive {
                    debug!(pid = p.pid, command = %p.command, "Dropping dead background process");
                }
                alive
            })
            .collect();
        let count = alive.len();
        self.lock().background_processes = alive;
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OnlyEven;

    impl ProcessMonitor for OnlyEven {
        fn is_alive(&self, pid: u32) -> bool {
            pid % 2 == 0
        }
    }

    fn process(pid: u32) -> BackgroundProcess {
        BackgroundProcess {
            pid,
            command: format!("sleep {pid}"),
            log_path: PathBuf::from(format!("/tmp/{pid}.log")),
            start_time: Utc::now(),
        }
    }

    #[test]
    fn test_restore_drops_dead_processes() {
        let state = ToolState::new();
        let kept = state.restore_background_processes(vec![process(1), process(2), process(4)], &OnlyEven);
        assert_eq!(kept, 2);
        let pids: Vec<u32> = state.background_processes().iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![2, 4]);
    }

    #[test]
    fn test_touch_file() {
        let state = ToolState::new();
        state.touch_file("src/main.rs");
        assert!(state.file_last_access().contains_key("src/main.rs"));
    }

    #[test]
    fn test_clones_share_state() {
        let state = ToolState::new();
        let other = state.clone();
        other.add_background_process(process(8));
        assert_eq!(state.background_processes().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_monitor_sees_current_process() {
        assert!(SignalProcessMonitor.is_alive(std::process::id()));
        assert!(!SignalProcessMonitor.is_alive(0));
    }
}
