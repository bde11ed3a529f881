//! dnsmasq supervision: config generation, conflict clearing, launch, and
//! lease-file parsing.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cmd::{self, poll_until};
use crate::error::{Result, WirelessError};
use crate::process;

/// Gateway address of the hotspot subnet.
pub const AP_GATEWAY: &str = "192.168.12.1";
/// First address handed out by DHCP.
pub const DHCP_RANGE_START: &str = "192.168.12.10";
/// Last address handed out by DHCP.
pub const DHCP_RANGE_END: &str = "192.168.12.254";
/// Netmask of the hotspot subnet.
pub const NETMASK: &str = "255.255.255.0";
/// DHCP lease duration.
pub const LEASE_TIME: &str = "12h";
/// DNS servers pushed to clients.
pub const DNS_SERVERS: &str = "8.8.8.8,8.8.4.4";

/// Paths the DHCP/DNS daemon writes to.
#[derive(Debug, Clone)]
pub struct DhcpPaths {
    pub conf: PathBuf,
    pub leases: PathBuf,
    pub pid: PathBuf,
    pub log: PathBuf,
}

/// A connected hotspot client, from the lease database.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DhcpClient {
    pub hostname: String,
    pub mac: String,
    pub ip: String,
}

/// Render the dnsmasq configuration for the AP interface.
pub fn render_config(interface: &str, paths: &DhcpPaths) -> String {
    format!(
        "interface={iface}\n\
         bind-interfaces\n\
         listen-address={gw}\n\
         dhcp-range={start},{end},{mask},{lease}\n\
         dhcp-option=3,{gw}\n\
         dhcp-option=6,{dns}\n\
         dhcp-authoritative\n\
         dhcp-leasefile={leases}\n\
         log-facility={log}\n",
        iface = interface,
        gw = AP_GATEWAY,
        start = DHCP_RANGE_START,
        end = DHCP_RANGE_END,
        mask = NETMASK,
        lease = LEASE_TIME,
        dns = DNS_SERVERS,
        leases = paths.leases.display(),
        log = paths.log.display(),
    )
}

/// Stop dnsmasq instances that would collide with ours.
///
/// A distro-managed dnsmasq bound to the wildcard address blocks port 67
/// even with bind-interfaces; instances speaking for the AP interface or
/// our config path are leftovers from a previous run.
pub fn clear_conflicts(interface: &str, conf_path: &Path) {
    if cmd::tool_exists("systemctl") {
        let _ = cmd::run_ok("systemctl", &["stop", "dnsmasq"]);
    }

    let conf = conf_path.to_string_lossy();
    let mut stopped = 0;
    if let Ok(procs) = process::find_by_name("dnsmasq") {
        for proc in procs {
            if proc.cmdline.contains(interface) || proc.cmdline.contains(conf.as_ref()) {
                if process::signal_pid(proc.pid, libc::SIGTERM).is_ok() {
                    stopped += 1;
                }
            }
        }
    }
    if stopped > 0 {
        log::info!("Stopped {} conflicting dnsmasq instance(s)", stopped);
    }
}

/// Launch dnsmasq and wait for its pid file.
pub fn launch(paths: &DhcpPaths) -> Result<i32> {
    // stale pid file would satisfy the poll below
    let _ = fs::remove_file(&paths.pid);

    let conf = paths.conf.to_string_lossy();
    let pid_arg = format!("--pid-file={}", paths.pid.display());
    cmd::run("dnsmasq", &["-C", &conf, &pid_arg])
        .map_err(|e| WirelessError::Daemon(format!("dnsmasq failed to start: {}", e)))?;

    let mut pid = None;
    poll_until(20, Duration::from_millis(100), || {
        pid = read_pid_file(&paths.pid);
        pid.is_some()
    });

    match pid {
        Some(pid) if process::pid_alive(pid) => {
            log::info!("dnsmasq running (pid {})", pid);
            Ok(pid)
        }
        Some(pid) => Err(WirelessError::Daemon(format!(
            "dnsmasq wrote pid {} but the process is gone",
            pid
        ))),
        None => Err(WirelessError::Daemon(
            "dnsmasq started but never wrote its pid file".to_string(),
        )),
    }
}

/// Read connected clients from the lease database.
///
/// A missing lease file means no clients yet, not an error.
pub fn enumerate_clients(lease_path: &Path, max: usize) -> Result<Vec<DhcpClient>> {
    match fs::read_to_string(lease_path) {
        Ok(text) => Ok(parse_leases(&text, max)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(WirelessError::System(format!(
            "read {}: {}",
            lease_path.display(),
            e
        ))),
    }
}

/// Parse lease lines: `timestamp mac ip hostname [clientid]`.
///
/// Keeps file order, skips lines with fewer than four fields, and maps the
/// `*` placeholder hostname to `(unknown)`.
pub fn parse_leases(text: &str, max: usize) -> Vec<DhcpClient> {
    let mut clients = Vec::new();
    for line in text.lines() {
        if clients.len() >= max {
            break;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let hostname = if fields[3] == "*" {
            "(unknown)".to_string()
        } else {
            fields[3].to_string()
        };
        clients.push(DhcpClient {
            hostname,
            mac: fields[1].to_string(),
            ip: fields[2].to_string(),
        });
    }
    clients
}

fn read_pid_file(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}
