//! Hotspot lifecycle orchestration.
//!
//! Owns the state machine from `start` through `stop`: detects the client
//! interface, creates the virtual AP interface, negotiates a hostapd
//! launch, starts dnsmasq, wires up NAT, and tears everything down in
//! reverse. A status snapshot is persisted as JSON so `stop`, `status` and
//! `clients` work from a fresh process.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};

use hotshare_wireless::dnsmasq::{self, DhcpClient, DhcpPaths, AP_GATEWAY};
use hotshare_wireless::hostapd::{self, ApConfig, HostapdLauncher};
use hotshare_wireless::iface::{self, is_5ghz_channel, RadioInterface};
use hotshare_wireless::nat::NatManager;
use hotshare_wireless::{ap, process};

use crate::config::HotspotConfig;

/// How long a daemon gets to exit after SIGTERM.
const STOP_GRACE: Duration = Duration::from_secs(3);

/// Filesystem locations for everything the orchestrator generates.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Directory for configs, logs, leases, pid and state files
    pub base: PathBuf,
    /// NetworkManager unmanaged-devices override
    pub nm_override: PathBuf,
}

impl Default for RuntimePaths {
    fn default() -> Self {
        Self {
            base: PathBuf::from("/tmp/hotshare"),
            nm_override: PathBuf::from("/etc/NetworkManager/conf.d/90-hotshare-unmanaged.conf"),
        }
    }
}

impl RuntimePaths {
    /// All paths under one directory, for tests.
    pub fn rooted(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            nm_override: base.join("90-hotshare-unmanaged.conf"),
        }
    }

    pub fn hostapd_conf(&self) -> PathBuf {
        self.base.join("hostapd.conf")
    }

    pub fn hostapd_log(&self) -> PathBuf {
        self.base.join("hostapd.log")
    }

    pub fn state_file(&self) -> PathBuf {
        self.base.join("state.json")
    }

    pub fn dhcp(&self) -> DhcpPaths {
        DhcpPaths {
            conf: self.base.join("dnsmasq.conf"),
            leases: self.base.join("dnsmasq.leases"),
            pid: self.base.join("dnsmasq.pid"),
            log: self.base.join("dnsmasq.log"),
        }
    }
}

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HotspotState {
    Stopped,
    Starting,
    Running,
    Degraded,
    Stopping,
    Error,
}

impl std::fmt::Display for HotspotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HotspotState::Stopped => "stopped",
            HotspotState::Starting => "starting",
            HotspotState::Running => "running",
            HotspotState::Degraded => "degraded",
            HotspotState::Stopping => "stopping",
            HotspotState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Persisted runtime status of the hotspot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotspotStatus {
    pub state: HotspotState,
    pub ssid: String,
    /// Channel the user asked for (or the client channel it followed)
    pub channel: u8,
    pub band: String,
    /// The 2.4 GHz fallback replaced a rejected 5 GHz channel
    pub fallback_channel_applied: bool,
    pub ap_interface: String,
    pub client_interface: String,
    /// Last observed status of the client interface
    pub client: Option<RadioInterface>,
    pub gateway: String,
    pub hostapd_pid: Option<i32>,
    pub dnsmasq_pid: Option<i32>,
    /// NAT rules were installed and need removal at stop
    pub nat_applied: bool,
    /// Kernel forwarding flag before we touched it
    pub ip_forward_was_enabled: bool,
    pub started_at: Option<String>,
    pub started_unix: Option<i64>,
    pub uptime: Option<String>,
    /// What went wrong, for the error and degraded states
    pub last_error: Option<String>,
}

impl HotspotStatus {
    fn stopped() -> Self {
        Self {
            state: HotspotState::Stopped,
            ssid: String::new(),
            channel: 0,
            band: String::new(),
            fallback_channel_applied: false,
            ap_interface: String::new(),
            client_interface: String::new(),
            client: None,
            gateway: String::new(),
            hostapd_pid: None,
            dnsmasq_pid: None,
            nat_applied: false,
            ip_forward_was_enabled: false,
            started_at: None,
            started_unix: None,
            uptime: None,
            last_error: None,
        }
    }
}

/// Orchestrates the hotspot lifecycle against a set of runtime paths.
pub struct HotspotController {
    paths: RuntimePaths,
}

impl HotspotController {
    pub fn new(paths: RuntimePaths) -> Self {
        Self { paths }
    }

    /// Bring the hotspot up end to end.
    pub fn start(&self, config: &HotspotConfig) -> Result<HotspotStatus> {
        config.validate()?;

        if let Some(existing) = self.load_snapshot()? {
            let live = existing.hostapd_pid.map(process::pid_alive).unwrap_or(false);
            if existing.state == HotspotState::Running && live {
                bail!(
                    "hotspot '{}' is already running on {}",
                    existing.ssid,
                    existing.ap_interface
                );
            }
        }

        fs::create_dir_all(&self.paths.base)
            .with_context(|| format!("creating {}", self.paths.base.display()))?;

        let client_names: Vec<&str> = ap::AP_CANDIDATES.to_vec();
        let client_name = iface::detect_client_interface(&client_names)
            .context("detecting the client WiFi interface")?;
        let client = iface::inspect(&client_name)
            .with_context(|| format!("inspecting {}", client_name))?;

        for warning in preflight_warnings(&client) {
            log::warn!("{}", warning);
        }

        let channel = effective_channel(config.channel, client.channel);
        log::info!(
            "Starting hotspot '{}' on channel {} ({}), uplink {}",
            config.ssid,
            channel,
            band_label(channel),
            client.name
        );

        let mut status = HotspotStatus {
            state: HotspotState::Starting,
            ssid: config.ssid.clone(),
            channel,
            band: band_label(channel).to_string(),
            client_interface: client.name.clone(),
            client: Some(client.clone()),
            gateway: AP_GATEWAY.to_string(),
            ..HotspotStatus::stopped()
        };
        self.persist(&status)?;

        let ap_name = match ap::create_ap_interface(&client.name, &self.paths.nm_override) {
            Ok(name) => name,
            Err(e) => {
                self.record_failure(&mut status, &format!("creating the AP interface: {}", e));
                return Err(e).context("creating the AP interface");
            }
        };
        status.ap_interface = ap_name.clone();
        self.persist(&status)?;

        if let Err(e) = self.bring_up(config, &mut status, channel) {
            log::error!("Start failed, rolling back: {}", e);
            self.cleanup(&mut status);
            self.record_failure(&mut status, &format!("{:#}", e));
            return Err(e);
        }

        let now = Local::now();
        status.state = HotspotState::Running;
        status.started_at = Some(now.format("%Y-%m-%d %H:%M:%S").to_string());
        status.started_unix = Some(now.timestamp());
        self.persist(&status)?;

        log::info!(
            "Hotspot '{}' running on {} ({})",
            status.ssid,
            status.ap_interface,
            status.gateway
        );
        Ok(status)
    }

    // Everything after the AP interface exists. Failures roll back in
    // `start`.
    fn bring_up(
        &self,
        config: &HotspotConfig,
        status: &mut HotspotStatus,
        channel: u8,
    ) -> Result<()> {
        let ap_config = ApConfig {
            interface: status.ap_interface.clone(),
            ssid: config.ssid.clone(),
            passphrase: config.password.clone(),
            channel,
            hidden: config.hidden,
            country: hostapd::resolve_country(),
        };

        let mut launcher =
            HostapdLauncher::new(self.paths.hostapd_conf(), self.paths.hostapd_log());
        let negotiated =
            hostapd::negotiate(&mut launcher, &ap_config).context("starting hostapd")?;
        status.hostapd_pid = Some(negotiated.pid);
        status.fallback_channel_applied = negotiated.fallback_applied;
        if negotiated.fallback_applied {
            status.band = band_label(negotiated.effective_channel).to_string();
        }

        ap::assign_gateway(&status.ap_interface, AP_GATEWAY)
            .context("assigning the gateway address")?;

        let dhcp = self.paths.dhcp();
        dnsmasq::clear_conflicts(&status.ap_interface, &dhcp.conf);
        fs::write(&dhcp.conf, dnsmasq::render_config(&status.ap_interface, &dhcp))
            .with_context(|| format!("writing {}", dhcp.conf.display()))?;
        status.dnsmasq_pid = Some(dnsmasq::launch(&dhcp).context("starting dnsmasq")?);

        let nat = NatManager::new(&status.ap_interface, &status.client_interface);
        status.ip_forward_was_enabled = nat.apply().context("configuring NAT")?;
        status.nat_applied = true;

        Ok(())
    }

    /// Tear the hotspot down. Idempotent: stopping a stopped hotspot is
    /// a no-op.
    pub fn stop(&self) -> Result<String> {
        let Some(mut status) = self.load_snapshot()? else {
            return Ok("hotspot is not running".to_string());
        };

        status.state = HotspotState::Stopping;
        let _ = self.persist(&status);

        self.cleanup(&mut status);

        fs::remove_file(self.paths.state_file()).ok();
        Ok(format!("hotspot '{}' stopped", status.ssid))
    }

    // Reverse of bring_up. Every step is best-effort so one failure does
    // not strand the rest.
    fn cleanup(&self, status: &mut HotspotStatus) {
        process::terminate_daemon(status.dnsmasq_pid, "dnsmasq", STOP_GRACE);
        status.dnsmasq_pid = None;
        process::terminate_daemon(status.hostapd_pid, "hostapd", STOP_GRACE);
        status.hostapd_pid = None;

        if status.nat_applied {
            let nat = NatManager::new(&status.ap_interface, &status.client_interface);
            nat.remove(status.ip_forward_was_enabled);
            status.nat_applied = false;
        }

        if !status.ap_interface.is_empty() {
            ap::delete_ap_interface(&status.ap_interface, &self.paths.nm_override);
        }

        let dhcp = self.paths.dhcp();
        for path in [
            self.paths.hostapd_conf(),
            self.paths.hostapd_log(),
            dhcp.conf,
            dhcp.leases,
            dhcp.pid,
            dhcp.log,
        ] {
            let _ = fs::remove_file(path);
        }

        status.state = HotspotState::Stopped;
    }

    /// Current status, with daemon liveness re-checked and the client
    /// interface re-inspected.
    pub fn status(&self) -> Result<HotspotStatus> {
        let Some(mut status) = self.load_snapshot()? else {
            return Ok(HotspotStatus::stopped());
        };

        let mut dirty = false;
        if status.state == HotspotState::Running {
            let hostapd_live = status.hostapd_pid.map(process::pid_alive).unwrap_or(false);
            let dnsmasq_live = status.dnsmasq_pid.map(process::pid_alive).unwrap_or(false);
            if !hostapd_live || !dnsmasq_live {
                let diagnosis = format!(
                    "daemon died (hostapd alive: {}, dnsmasq alive: {})",
                    hostapd_live, dnsmasq_live
                );
                log::warn!("{}", diagnosis);
                status.state = HotspotState::Degraded;
                status.last_error = Some(diagnosis);
                dirty = true;
            }
        }

        if matches!(status.state, HotspotState::Running | HotspotState::Degraded)
            && !status.client_interface.is_empty()
        {
            match iface::inspect(&status.client_interface) {
                Ok(fresh) => {
                    if status.client.as_ref() != Some(&fresh) {
                        status.client = Some(fresh);
                        dirty = true;
                    }
                }
                Err(e) => log::debug!(
                    "Could not refresh {}: {}",
                    status.client_interface,
                    e
                ),
            }
        }

        if dirty {
            self.persist(&status)?;
        }

        status.uptime = status
            .started_unix
            .map(|started| format_uptime(Local::now().timestamp() - started));
        Ok(status)
    }

    /// Connected clients from the lease database.
    pub fn clients(&self, max: usize) -> Result<Vec<DhcpClient>> {
        let leases = self.paths.dhcp().leases;
        Ok(dnsmasq::enumerate_clients(&leases, max)?)
    }

    // A failed start leaves an error-state snapshot behind so `status` can
    // report what went wrong; the next start or stop clears it.
    fn record_failure(&self, status: &mut HotspotStatus, message: &str) {
        status.state = HotspotState::Error;
        status.last_error = Some(message.to_string());
        if let Err(e) = self.persist(status) {
            log::warn!("Could not persist failure state: {}", e);
        }
    }

    fn load_snapshot(&self) -> Result<Option<HotspotStatus>> {
        let path = self.paths.state_file();
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let status = serde_json::from_str(&contents)
                    .with_context(|| format!("parsing {}", path.display()))?;
                Ok(Some(status))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn persist(&self, status: &HotspotStatus) -> Result<()> {
        fs::create_dir_all(&self.paths.base)
            .with_context(|| format!("creating {}", self.paths.base.display()))?;
        let data = serde_json::to_string_pretty(status).context("serializing status")?;
        fs::write(self.paths.state_file(), data)
            .with_context(|| format!("writing {}", self.paths.state_file().display()))?;
        Ok(())
    }
}

/// Advisory pre-start checks on the client interface.
///
/// The phy concurrency report is a heuristic; some drivers underreport what
/// they can do, so `iw interface add` stays the arbiter and these only
/// warn.
pub fn preflight_warnings(client: &RadioInterface) -> Vec<String> {
    let mut warnings = Vec::new();
    if !client.supports_ap_sta {
        warnings.push(format!(
            "adapter {} (phy {}) does not advertise simultaneous client and AP operation; \
             attempting anyway",
            client.name, client.phy
        ));
    }
    if !client.connected {
        warnings.push(format!(
            "{} is not associated; the hotspot will have no internet uplink",
            client.name
        ));
    }
    warnings
}

/// Channel to run the AP on: the configured one, or the client's when the
/// config says "follow" (0). A disconnected client defaults to the 2.4 GHz
/// fallback.
pub fn effective_channel(configured: u8, client_channel: Option<u32>) -> u8 {
    if configured != 0 {
        return configured;
    }
    client_channel
        .and_then(|ch| u8::try_from(ch).ok())
        .unwrap_or(hostapd::FALLBACK_CHANNEL)
}

fn band_label(channel: u8) -> &'static str {
    if is_5ghz_channel(channel as u32) {
        "5 GHz"
    } else {
        "2.4 GHz"
    }
}

/// Human uptime string with zero leading units dropped: `45s`, `23m 45s`,
/// `1h 23m 45s`.
pub fn format_uptime(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stop_when_stopped_is_a_noop() {
        let dir = tempdir().unwrap();
        let controller = HotspotController::new(RuntimePaths::rooted(dir.path()));
        let message = controller.stop().unwrap();
        assert_eq!(message, "hotspot is not running");
        assert!(!controller.paths.state_file().exists());
    }

    #[test]
    fn status_without_snapshot_is_stopped() {
        let dir = tempdir().unwrap();
        let controller = HotspotController::new(RuntimePaths::rooted(dir.path()));
        let status = controller.status().unwrap();
        assert_eq!(status.state, HotspotState::Stopped);
        assert!(status.uptime.is_none());
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let controller = HotspotController::new(RuntimePaths::rooted(dir.path()));
        let mut status = HotspotStatus::stopped();
        status.state = HotspotState::Running;
        status.ssid = "TestNet".to_string();
        status.channel = 149;
        status.band = "5 GHz".to_string();
        status.ap_interface = "ap0".to_string();
        status.ip_forward_was_enabled = true;
        controller.persist(&status).unwrap();

        let loaded = controller.load_snapshot().unwrap().unwrap();
        assert_eq!(loaded.state, HotspotState::Running);
        assert_eq!(loaded.ssid, "TestNet");
        assert_eq!(loaded.channel, 149);
        assert!(loaded.ip_forward_was_enabled);
    }

    #[test]
    fn running_snapshot_with_dead_pids_degrades() {
        let dir = tempdir().unwrap();
        let controller = HotspotController::new(RuntimePaths::rooted(dir.path()));
        let mut status = HotspotStatus::stopped();
        status.state = HotspotState::Running;
        status.hostapd_pid = Some(i32::MAX);
        status.dnsmasq_pid = Some(i32::MAX);
        status.started_unix = Some(Local::now().timestamp());
        controller.persist(&status).unwrap();

        let refreshed = controller.status().unwrap();
        assert_eq!(refreshed.state, HotspotState::Degraded);
        assert!(refreshed
            .last_error
            .as_deref()
            .unwrap()
            .contains("daemon died"));
        // degradation is persisted, not just reported
        let reloaded = controller.load_snapshot().unwrap().unwrap();
        assert_eq!(reloaded.state, HotspotState::Degraded);
        assert!(reloaded.last_error.is_some());
    }

    #[test]
    fn failure_leaves_error_snapshot_with_message() {
        let dir = tempdir().unwrap();
        let controller = HotspotController::new(RuntimePaths::rooted(dir.path()));
        let mut status = HotspotStatus::stopped();
        status.state = HotspotState::Starting;
        controller.record_failure(&mut status, "starting hostapd: no beacon");

        let reloaded = controller.load_snapshot().unwrap().unwrap();
        assert_eq!(reloaded.state, HotspotState::Error);
        assert_eq!(
            reloaded.last_error.as_deref(),
            Some("starting hostapd: no beacon")
        );
        // the error snapshot reports, it does not stay forever
        controller.stop().unwrap();
        assert!(!controller.paths.state_file().exists());
    }

    #[test]
    fn snapshot_carries_client_interface_status() {
        let dir = tempdir().unwrap();
        let controller = HotspotController::new(RuntimePaths::rooted(dir.path()));
        let mut status = HotspotStatus::stopped();
        status.state = HotspotState::Running;
        status.client = Some(RadioInterface {
            name: "wlan0".to_string(),
            phy: "phy0".to_string(),
            ssid: Some("HomeNet".to_string()),
            ip: Some("192.168.1.42".to_string()),
            channel: Some(36),
            signal_dbm: Some(-52),
            connected: true,
            supports_ap_sta: true,
            ..RadioInterface::default()
        });
        controller.persist(&status).unwrap();

        let reloaded = controller.load_snapshot().unwrap().unwrap();
        let client = reloaded.client.unwrap();
        assert_eq!(client.ssid.as_deref(), Some("HomeNet"));
        assert_eq!(client.channel, Some(36));
        assert_eq!(client.signal_dbm, Some(-52));
    }

    #[test]
    fn unsupported_concurrency_warns_instead_of_blocking() {
        let client = RadioInterface {
            name: "wlan0".to_string(),
            phy: "phy0".to_string(),
            connected: true,
            supports_ap_sta: false,
            ..RadioInterface::default()
        };
        let warnings = preflight_warnings(&client);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("attempting anyway"));

        let capable = RadioInterface {
            supports_ap_sta: true,
            connected: true,
            ..client
        };
        assert!(preflight_warnings(&capable).is_empty());
    }

    #[test]
    fn channel_follows_client_when_unset() {
        assert_eq!(effective_channel(11, Some(36)), 11);
        assert_eq!(effective_channel(0, Some(36)), 36);
        assert_eq!(effective_channel(0, Some(149)), 149);
        assert_eq!(effective_channel(0, None), hostapd::FALLBACK_CHANNEL);
    }

    #[test]
    fn clients_without_lease_file_is_empty() {
        let dir = tempdir().unwrap();
        let controller = HotspotController::new(RuntimePaths::rooted(dir.path()));
        assert!(controller.clients(10).unwrap().is_empty());
    }

    #[test]
    fn uptime_drops_zero_leading_units() {
        assert_eq!(format_uptime(5025), "1h 23m 45s");
        assert_eq!(format_uptime(1425), "23m 45s");
        assert_eq!(format_uptime(59), "59s");
        assert_eq!(format_uptime(3600), "1h 0m 0s");
        assert_eq!(format_uptime(60), "1m 0s");
        assert_eq!(format_uptime(-5), "0s");
    }
}
