//! Virtual AP interface lifecycle.
//!
//! Creates a second interface in `__ap` mode on top of the client radio,
//! trying a fixed list of candidate names. Stale leftovers from a previous
//! run are force-removed before reuse.

use std::path::Path;
use std::time::Duration;

use crate::cmd::{self, poll_until};
use crate::error::{Result, WirelessError};
use crate::iface::interface_exists;
use crate::netman;

/// Candidate AP interface names, tried in order.
pub const AP_CANDIDATES: [&str; 4] = ["ap0", "uap0", "ap1", "hotspot0"];

/// Create a virtual AP interface on the radio behind `client`.
///
/// For each candidate name: any stale interface is torn down, the network
/// manager override is installed, and `iw dev <client> interface add` is
/// attempted. Returns the first name that appears in sysfs. On total
/// failure the override is removed again.
pub fn create_ap_interface(client: &str, override_path: &Path) -> Result<String> {
    // a soft-blocked radio makes `iw interface add` fail with an opaque
    // error, so lift any rfkill block first
    if cmd::tool_exists("rfkill") {
        let _ = cmd::run_ok("rfkill", &["unblock", "wifi"]);
    }

    let mut last_err: Option<WirelessError> = None;

    for candidate in AP_CANDIDATES {
        if interface_exists(candidate) {
            log::info!("Removing stale AP interface {}", candidate);
            if let Err(e) = remove_stale(candidate) {
                log::warn!("Could not remove stale {}: {}", candidate, e);
                last_err = Some(e);
                continue;
            }
        }

        netman::release_interface(override_path, candidate)?;

        match cmd::run(
            "iw",
            &["dev", client, "interface", "add", candidate, "type", "__ap"],
        ) {
            Ok(()) => {
                let appeared = poll_until(20, Duration::from_millis(100), || {
                    interface_exists(candidate)
                });
                if !appeared {
                    last_err = Some(WirelessError::Timeout(format!(
                        "{} was created but never appeared in sysfs",
                        candidate
                    )));
                    continue;
                }
                netman::set_unmanaged(candidate);
                log::info!("Created AP interface {} on {}", candidate, client);
                return Ok(candidate.to_string());
            }
            Err(e) => {
                log::debug!("Candidate {} rejected: {}", candidate, e);
                last_err = Some(e);
            }
        }
    }

    netman::restore(override_path);

    match last_err {
        Some(e) if e.to_string().to_lowercase().contains("not supported") => {
            Err(WirelessError::Unsupported(format!(
                "driver refused to add an AP interface on {}: {}",
                client, e
            )))
        }
        Some(e) => Err(WirelessError::Interface(format!(
            "all AP interface names exhausted, last error: {}",
            e
        ))),
        None => Err(WirelessError::interface("no AP interface candidates available")),
    }
}

/// Delete the AP interface and hand its name back to the managers.
pub fn delete_ap_interface(name: &str, override_path: &Path) {
    if interface_exists(name) {
        let _ = cmd::run_ok("ip", &["link", "set", name, "down"]);
        if !cmd::run_ok("iw", &["dev", name, "del"]) {
            log::warn!("Could not delete AP interface {}", name);
        }
        poll_until(20, Duration::from_millis(100), || !interface_exists(name));
    }
    netman::restore(override_path);
}

/// Assign the gateway address and bring the interface up.
///
/// `ip addr replace` makes repeated assignment a no-op.
pub fn assign_gateway(interface: &str, gateway: &str) -> Result<()> {
    cmd::run(
        "ip",
        &["addr", "replace", &format!("{}/24", gateway), "dev", interface],
    )?;
    cmd::run("ip", &["link", "set", interface, "up"])?;
    log::info!("Assigned {} to {}", gateway, interface);
    Ok(())
}

// Tear down an interface left behind by a previous run. The supplicant
// detach is scoped to this interface only so the client link stays up.
fn remove_stale(name: &str) -> Result<()> {
    let _ = cmd::run_ok("ip", &["link", "set", name, "down"]);
    let _ = cmd::run_ok("ip", &["addr", "flush", "dev", name]);
    let _ = cmd::run_ok("wpa_cli", &["-i", name, "disconnect"]);
    let _ = cmd::run_ok("wpa_cli", &["-i", name, "terminate"]);
    netman::set_unmanaged(name);
    cmd::run("iw", &["dev", name, "del"])?;

    if !poll_until(30, Duration::from_millis(100), || !interface_exists(name)) {
        return Err(WirelessError::Timeout(format!(
            "stale interface {} still present after deletion",
            name
        )));
    }
    Ok(())
}
