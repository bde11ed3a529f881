//! Wireless interface discovery and status inspection.
//!
//! Interface discovery reads `/sys/class/net` directly; live status (SSID,
//! channel, signal, address) is parsed from `iw` and `ip` output. The
//! parsers are pure functions over the captured text so they can be tested
//! against recorded tool output.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cmd;
use crate::error::{Result, WirelessError};

/// A wireless interface with its last observed status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RadioInterface {
    /// Interface name (e.g. wlan0)
    pub name: String,
    /// Underlying phy name (e.g. phy0)
    pub phy: String,
    /// MAC address from sysfs
    pub mac: Option<String>,
    /// SSID of the current association, if any
    pub ssid: Option<String>,
    /// IPv4 address without prefix
    pub ip: Option<String>,
    /// Current channel
    pub channel: Option<u32>,
    /// Signal strength in dBm
    pub signal_dbm: Option<i32>,
    /// Associated to a network
    pub connected: bool,
    /// Radio advertises simultaneous managed + AP operation
    pub supports_ap_sta: bool,
}

/// Channels at or above this number sit in the 5 GHz band.
const FIRST_5GHZ_CHANNEL: u32 = 32;

/// Whether a channel number belongs to the 5 GHz band.
pub fn is_5ghz_channel(channel: u32) -> bool {
    channel >= FIRST_5GHZ_CHANNEL
}

/// Find the first wireless interface that is not one of `skip`.
///
/// Scans `/sys/class/net` for entries carrying a `wireless` subdirectory.
pub fn detect_client_interface(skip: &[&str]) -> Result<String> {
    let entries = fs::read_dir("/sys/class/net")
        .map_err(|e| WirelessError::System(format!("Cannot read /sys/class/net: {}", e)))?;

    let mut names: Vec<String> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| WirelessError::System(e.to_string()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if skip.contains(&name.as_str()) {
            continue;
        }
        if entry.path().join("wireless").exists() {
            names.push(name);
        }
    }
    names.sort();

    names.into_iter().next().ok_or_else(|| {
        WirelessError::interface("no wireless interface found; is a WiFi adapter present?")
    })
}

/// Whether an interface exists in sysfs.
pub fn interface_exists(name: &str) -> bool {
    Path::new("/sys/class/net").join(name).exists()
}

/// Resolve the phy name backing an interface.
pub fn phy_for(interface: &str) -> Result<String> {
    let path = format!("/sys/class/net/{}/phy80211/name", interface);
    fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            WirelessError::Interface(format!("{} has no phy80211 entry: {}", interface, e))
        })
}

/// Inspect a wireless interface and return its current status.
pub fn inspect(interface: &str) -> Result<RadioInterface> {
    if !interface_exists(interface) {
        return Err(WirelessError::Interface(format!(
            "Interface {} not found",
            interface
        )));
    }

    let phy = phy_for(interface)?;
    let mac = fs::read_to_string(format!("/sys/class/net/{}/address", interface))
        .ok()
        .map(|s| s.trim().to_string());

    let mut iface = RadioInterface {
        name: interface.to_string(),
        phy,
        mac,
        ..Default::default()
    };

    if let Ok(link) = cmd::output_of("iw", &["dev", interface, "link"]) {
        let (ssid, signal) = parse_link(&link);
        iface.connected = ssid.is_some();
        iface.ssid = ssid;
        iface.signal_dbm = signal;
    }
    if let Ok(info) = cmd::output_of("iw", &["dev", interface, "info"]) {
        iface.channel = parse_channel(&info);
    }
    if let Ok(addr) = cmd::output_of("ip", &["-4", "addr", "show", "dev", interface]) {
        iface.ip = parse_inet(&addr);
    }

    let report = cmd::output_of("iw", &["phy", &iface.phy, "info"])?;
    iface.supports_ap_sta = concurrency_supported(&report);

    Ok(iface)
}

/// Extract SSID and signal strength from `iw dev <if> link` output.
pub fn parse_link(text: &str) -> (Option<String>, Option<i32>) {
    if text.trim_start().starts_with("Not connected") {
        return (None, None);
    }
    let mut ssid = None;
    let mut signal = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("SSID:") {
            let rest = rest.trim();
            if !rest.is_empty() {
                ssid = Some(rest.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("signal:") {
            signal = rest
                .trim()
                .split_whitespace()
                .next()
                .and_then(|v| v.parse().ok());
        }
    }
    (ssid, signal)
}

/// Extract the channel number from `iw dev <if> info` output.
pub fn parse_channel(text: &str) -> Option<u32> {
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("channel ") {
            return rest.split_whitespace().next().and_then(|v| v.parse().ok());
        }
    }
    None
}

/// Extract the first IPv4 address from `ip -4 addr show` output.
pub fn parse_inet(text: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("inet ") {
            let addr = rest.split_whitespace().next()?;
            return Some(addr.split('/').next()?.to_string());
        }
    }
    None
}

/// Decide whether a phy report advertises managed + AP concurrency.
///
/// True only when a single combination entry lists both "managed" and "AP".
/// Drivers that omit the combinations section fall back to the supported
/// interface modes block, which must list both modes.
pub fn concurrency_supported(report: &str) -> bool {
    if let Some(entries) = combination_entries(report) {
        return entries
            .iter()
            .any(|entry| entry.contains("managed") && has_ap_token(entry));
    }
    supported_modes_block(report)
        .map(|modes| {
            modes.iter().any(|m| m == "managed") && modes.iter().any(|m| m == "AP")
        })
        .unwrap_or(false)
}

// Combination entries start with "*" and may wrap onto deeper-indented
// continuation lines.
fn combination_entries(report: &str) -> Option<Vec<String>> {
    let mut lines = report.lines();
    let header_indent = loop {
        let line = lines.next()?;
        if line.trim() == "valid interface combinations:" {
            break indent_of(line);
        }
    };

    let mut entries: Vec<String> = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if indent_of(line) <= header_indent {
            break;
        }
        if let Some(rest) = trimmed.strip_prefix("* ") {
            entries.push(rest.to_string());
        } else if let Some(last) = entries.last_mut() {
            last.push(' ');
            last.push_str(trimmed);
        }
    }

    if entries.is_empty() {
        None
    } else {
        Some(entries)
    }
}

fn supported_modes_block(report: &str) -> Option<Vec<String>> {
    let mut lines = report.lines();
    let header_indent = loop {
        let line = lines.next()?;
        if line.trim() == "Supported interface modes:" {
            break indent_of(line);
        }
    };

    let mut modes = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() || indent_of(line) <= header_indent {
            break;
        }
        if let Some(mode) = trimmed.strip_prefix("* ") {
            modes.push(mode.to_string());
        }
    }

    if modes.is_empty() {
        None
    } else {
        Some(modes)
    }
}

// "AP" must appear as its own token; "AP/VLAN" alone does not count.
fn has_ap_token(entry: &str) -> bool {
    entry
        .split(|c: char| c == '{' || c == '}' || c == ',' || c.is_whitespace())
        .any(|tok| tok == "AP")
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK_CONNECTED: &str = "Connected to aa:bb:cc:dd:ee:ff (on wlan0)\n\
        \tSSID: HomeNet\n\
        \tfreq: 5180\n\
        \tsignal: -52 dBm\n\
        \ttx bitrate: 433.3 MBit/s\n";

    const INFO_5GHZ: &str = "Interface wlan0\n\
        \tifindex 3\n\
        \ttype managed\n\
        \tchannel 36 (5180 MHz), width: 80 MHz, center1: 5210 MHz\n";

    const ADDR_OUTPUT: &str = "3: wlan0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500\n    \
        inet 192.168.1.42/24 brd 192.168.1.255 scope global dynamic wlan0\n       \
        valid_lft 86297sec preferred_lft 86297sec\n";

    const PHY_CONCURRENT: &str = "Wiphy phy0\n\
        \tSupported interface modes:\n\
        \t\t * IBSS\n\
        \t\t * managed\n\
        \t\t * AP\n\
        \t\t * AP/VLAN\n\
        \t\t * monitor\n\
        \tvalid interface combinations:\n\
        \t\t * #{ managed } <= 1, #{ AP, P2P-client, P2P-GO } <= 1, #{ P2P-device } <= 1,\n\
        \t\t   total <= 3, #channels <= 2\n";

    const PHY_NO_COMBINATIONS: &str = "Wiphy phy1\n\
        \tSupported interface modes:\n\
        \t\t * managed\n\
        \t\t * monitor\n\
        \tBand 1:\n";

    const PHY_SEPARATE_COMBOS: &str = "Wiphy phy2\n\
        \tvalid interface combinations:\n\
        \t\t * #{ managed } <= 1,\n\
        \t\t   total <= 1\n\
        \t\t * #{ AP } <= 1,\n\
        \t\t   total <= 1\n";

    #[test]
    fn parses_connected_link() {
        let (ssid, signal) = parse_link(LINK_CONNECTED);
        assert_eq!(ssid.as_deref(), Some("HomeNet"));
        assert_eq!(signal, Some(-52));
    }

    #[test]
    fn parses_disconnected_link() {
        let (ssid, signal) = parse_link("Not connected.\n");
        assert!(ssid.is_none());
        assert!(signal.is_none());
    }

    #[test]
    fn parses_channel_from_info() {
        assert_eq!(parse_channel(INFO_5GHZ), Some(36));
        assert_eq!(parse_channel("Interface wlan0\n\ttype managed\n"), None);
    }

    #[test]
    fn parses_inet_address() {
        assert_eq!(parse_inet(ADDR_OUTPUT).as_deref(), Some("192.168.1.42"));
        assert!(parse_inet("3: wlan0: <BROADCAST> mtu 1500\n").is_none());
    }

    #[test]
    fn band_resolution() {
        assert!(!is_5ghz_channel(1));
        assert!(!is_5ghz_channel(6));
        assert!(!is_5ghz_channel(14));
        assert!(is_5ghz_channel(32));
        assert!(is_5ghz_channel(36));
        assert!(is_5ghz_channel(149));
    }

    #[test]
    fn concurrency_from_single_combination_entry() {
        assert!(concurrency_supported(PHY_CONCURRENT));
    }

    #[test]
    fn concurrency_rejected_across_separate_entries() {
        // managed and AP each appear, but never in the same entry
        assert!(!concurrency_supported(PHY_SEPARATE_COMBOS));
    }

    #[test]
    fn concurrency_fallback_requires_both_modes() {
        assert!(!concurrency_supported(PHY_NO_COMBINATIONS));
    }

    #[test]
    fn ap_vlan_is_not_ap() {
        assert!(!has_ap_token("#{ managed } <= 1, #{ AP/VLAN } <= 1"));
        assert!(has_ap_token("#{ managed } <= 1, #{ AP, P2P-GO } <= 1"));
    }
}
