//! Structured subprocess invocation and bounded-condition polling.
//!
//! Every external tool is executed with an explicit argument vector, never
//! through an interpolated shell string. Waits on external state use
//! `poll_until` with a fixed attempt budget rather than open-ended sleeps.

use std::process::{Command, Stdio};
use std::time::Duration;

use crate::error::{Result, WirelessError};

/// Run a command, failing with the captured stderr if it exits non-zero.
pub fn run(cmd: &str, args: &[&str]) -> Result<()> {
    log::debug!("run: {} {}", cmd, args.join(" "));
    let output = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| WirelessError::Command(format!("Failed to run {} {:?}: {}", cmd, args, e)))?;
    if !output.status.success() {
        return Err(WirelessError::Command(format!(
            "{} {:?} failed: {}",
            cmd,
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Run a command best-effort, returning whether it exited zero.
///
/// Output is discarded. Used for collaborators whose failure is tolerated
/// (network manager reloads, supplicant detach, systemctl).
pub fn run_ok(cmd: &str, args: &[&str]) -> bool {
    log::debug!("run_ok: {} {}", cmd, args.join(" "));
    Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run a command and return its stdout on success.
pub fn output_of(cmd: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| WirelessError::Command(format!("Failed to run {} {:?}: {}", cmd, args, e)))?;
    if !output.status.success() {
        return Err(WirelessError::Command(format!(
            "{} {:?} failed: {}",
            cmd,
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check whether a tool is resolvable on PATH.
pub fn tool_exists(tool: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {tool} >/dev/null 2>&1"))
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Poll a condition with a bounded retry budget.
///
/// Evaluates `cond` up to `attempts` times, sleeping `interval` between
/// tries. Returns `true` as soon as the condition holds.
pub fn poll_until<F>(attempts: u32, interval: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    for attempt in 0..attempts {
        if cond() {
            return true;
        }
        if attempt + 1 < attempts {
            std::thread::sleep(interval);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_until_stops_on_success() {
        let mut calls = 0;
        let ok = poll_until(10, Duration::from_millis(1), || {
            calls += 1;
            calls == 3
        });
        assert!(ok);
        assert_eq!(calls, 3);
    }

    #[test]
    fn poll_until_exhausts_budget() {
        let mut calls = 0;
        let ok = poll_until(4, Duration::from_millis(1), || {
            calls += 1;
            false
        });
        assert!(!ok);
        assert_eq!(calls, 4);
    }
}
