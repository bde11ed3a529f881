//! Process discovery and termination via `/proc`.
//!
//! Provides `pgrep`/`pkill` style lookup by reading `/proc/[pid]` directly,
//! plus the graceful SIGTERM-then-SIGKILL escalation used when stopping
//! supervised daemons.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::cmd::poll_until;
use crate::error::{Result, WirelessError};

/// Process information from `/proc`.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    /// Process ID
    pub pid: i32,
    /// Process name (truncated to 15 chars by kernel)
    pub name: String,
    /// Full command line with arguments
    pub cmdline: String,
}

/// Find all processes whose name or command line contains `pattern`.
pub fn find_by_pattern(pattern: &str) -> Result<Vec<ProcessInfo>> {
    if pattern.is_empty() {
        return Err(WirelessError::system("process pattern cannot be empty"));
    }

    let mut matches = Vec::new();
    let entries = fs::read_dir("/proc")
        .map_err(|e| WirelessError::System(format!("Cannot read /proc: {}", e)))?;

    for entry in entries {
        let entry = entry.map_err(|e| WirelessError::System(e.to_string()))?;
        let file_name = entry.file_name();
        if let Ok(pid) = file_name.to_string_lossy().parse::<i32>() {
            if let Some(info) = read_process_info(pid) {
                if info.cmdline.contains(pattern) || info.name.contains(pattern) {
                    matches.push(info);
                }
            }
        }
    }

    Ok(matches)
}

/// Find all processes whose `/proc/[pid]/comm` matches `name` exactly.
pub fn find_by_name(name: &str) -> Result<Vec<ProcessInfo>> {
    Ok(find_by_pattern(name)?
        .into_iter()
        .filter(|p| p.name == name)
        .collect())
}

/// First PID whose comm matches `name` exactly, if any.
///
/// Exact matching keeps a process that merely mentions the name on its
/// command line from being mistaken for the daemon itself.
pub fn pid_of_name(name: &str) -> Option<i32> {
    find_by_name(name).ok()?.first().map(|p| p.pid)
}

/// Check whether a PID refers to a live process.
///
/// Signal 0 performs existence/permission checks without delivering anything.
pub fn pid_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Send a signal to a specific PID.
pub fn signal_pid(pid: i32, signal: i32) -> Result<()> {
    unsafe {
        if libc::kill(pid, signal) == 0 {
            Ok(())
        } else {
            Err(WirelessError::System(format!(
                "Failed to signal PID {}: {}",
                pid,
                io::Error::last_os_error()
            )))
        }
    }
}

/// Signal every process matching a cmdline pattern. Returns count signaled.
pub fn signal_pattern(pattern: &str, signal: i32) -> Result<usize> {
    let mut signaled = 0;
    for proc in find_by_pattern(pattern)? {
        if signal_pid(proc.pid, signal).is_ok() {
            signaled += 1;
            log::debug!("Signaled process {} ({})", proc.pid, proc.name);
        }
    }
    Ok(signaled)
}

/// Terminate a daemon: SIGTERM, bounded wait, SIGKILL, name backstop.
///
/// The backstop catches respawned or mismatched instances the recorded PID
/// no longer covers. Waits at most `grace` for the SIGTERM to take effect,
/// polling in 100 ms steps.
pub fn terminate_daemon(pid: Option<i32>, name: &str, grace: Duration) {
    if let Some(pid) = pid {
        if pid_alive(pid) {
            log::info!("Stopping {} (pid {})", name, pid);
            let _ = signal_pid(pid, libc::SIGTERM);
            let attempts = (grace.as_millis() / 100).max(1) as u32;
            let exited = poll_until(attempts, Duration::from_millis(100), || !pid_alive(pid));
            if !exited {
                log::warn!("{} (pid {}) ignored SIGTERM, sending SIGKILL", name, pid);
                let _ = signal_pid(pid, libc::SIGKILL);
            }
        }
    }

    match signal_name(name, libc::SIGKILL) {
        Ok(0) => {}
        Ok(n) => log::warn!("Backstop killed {} stray {} process(es)", n, name),
        Err(e) => log::debug!("Backstop scan for {} failed: {}", name, e),
    }
}

/// Signal every process whose comm matches `name` exactly.
pub fn signal_name(name: &str, signal: i32) -> Result<usize> {
    let mut signaled = 0;
    for proc in find_by_name(name)? {
        if signal_pid(proc.pid, signal).is_ok() {
            signaled += 1;
        }
    }
    Ok(signaled)
}

fn read_process_info(pid: i32) -> Option<ProcessInfo> {
    let comm_path = format!("/proc/{}/comm", pid);
    if !Path::new(&comm_path).exists() {
        return None;
    }
    let name = fs::read_to_string(&comm_path)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| String::from("unknown"));

    // cmdline uses null bytes as separators
    let cmdline = fs::read_to_string(format!("/proc/{}/cmdline", pid))
        .map(|s| {
            s.split('\0')
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_else(|_| name.clone());

    Some(ProcessInfo { pid, name, cmdline })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_pid_is_alive() {
        let pid = std::process::id() as i32;
        assert!(pid_alive(pid));
    }

    #[test]
    fn bogus_pid_is_dead() {
        // Max pid on Linux is bounded well below this
        assert!(!pid_alive(i32::MAX));
    }

    #[test]
    fn empty_pattern_rejected() {
        assert!(find_by_pattern("").is_err());
    }

    #[test]
    fn finds_self_by_pid_scan() {
        let pid = std::process::id() as i32;
        let info = read_process_info(pid).unwrap();
        assert_eq!(info.pid, pid);
        assert!(!info.name.is_empty());
    }

    #[test]
    fn exact_name_lookup_rejects_prefixes() {
        let comm = fs::read_to_string("/proc/self/comm")
            .unwrap()
            .trim()
            .to_string();
        assert!(comm.len() > 1);
        // a prefix of our own comm matches by pattern but not by name
        let prefix = &comm[..comm.len() - 1];
        let own_pid = std::process::id() as i32;
        assert!(find_by_pattern(prefix)
            .unwrap()
            .iter()
            .any(|p| p.pid == own_pid));
        assert!(find_by_name(prefix)
            .unwrap()
            .iter()
            .all(|p| p.name == prefix));
        assert!(pid_of_name("no-such-daemon-name").is_none());
    }
}
