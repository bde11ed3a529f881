//! Network manager coordination.
//!
//! Keeps NetworkManager (and connman, on lightweight distros) away from the
//! AP interface by dropping an unmanaged-devices override into
//! `/etc/NetworkManager/conf.d/` and asking the running daemon to reload.
//! Manager daemons may be absent, so every interaction is best-effort;
//! only writing the override file itself can fail hard.

use std::fs;
use std::path::Path;

use crate::cmd;
use crate::error::{Result, WirelessError};

/// Write the unmanaged override for `interface` and push it to live managers.
pub fn release_interface(override_path: &Path, interface: &str) -> Result<()> {
    if let Some(parent) = override_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| WirelessError::System(format!("mkdir {}: {}", parent.display(), e)))?;
    }
    let contents = format!("[keyfile]\nunmanaged-devices=interface-name:{}\n", interface);
    fs::write(override_path, contents).map_err(|e| {
        WirelessError::System(format!("write {}: {}", override_path.display(), e))
    })?;
    log::debug!(
        "Wrote unmanaged override for {} at {}",
        interface,
        override_path.display()
    );

    reload_managers();
    set_unmanaged(interface);
    Ok(())
}

/// Remove the override file and let the managers reclaim the name.
pub fn restore(override_path: &Path) {
    match fs::remove_file(override_path) {
        Ok(()) => {
            log::debug!("Removed unmanaged override {}", override_path.display());
            reload_managers();
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(
            "Could not remove override {}: {}",
            override_path.display(),
            e
        ),
    }
}

/// Tell a live manager to stop managing the interface right now.
///
/// The override file only takes effect on reload; this covers the window in
/// between.
pub fn set_unmanaged(interface: &str) {
    if !cmd::run_ok("nmcli", &["device", "set", interface, "managed", "no"]) {
        log::debug!("nmcli did not accept managed=no for {} (daemon absent?)", interface);
    }
}

fn reload_managers() {
    if cmd::tool_exists("nmcli") {
        let _ = cmd::run_ok("nmcli", &["general", "reload", "conf"]);
    }
    if cmd::tool_exists("connmanctl") {
        // connman has no conf.d reload; bouncing wifi tethering state is the
        // closest equivalent and harmless when connman is idle
        let _ = cmd::run_ok("systemctl", &["try-restart", "connman"]);
    }
}
