//! hostapd supervision: config generation, launch, and channel negotiation.
//!
//! hostapd is the one collaborator whose failure modes need interpretation:
//! a launch that exits zero can still die during interface setup, and
//! channel rejections only show up in its log. Launching sits behind the
//! [`ApLauncher`] trait so the negotiation policy is testable without a
//! radio.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::cmd::{self, poll_until};
use crate::error::{Result, WirelessError};
use crate::iface::is_5ghz_channel;
use crate::process;

/// Fallback channel when the configured 5 GHz channel is rejected.
pub const FALLBACK_CHANNEL: u8 = 6;

/// Log substrings hostapd emits when it rejects the configured channel.
const CHANNEL_REJECT_PATTERNS: [&str; 2] = [
    "could not select hw_mode and channel",
    "hardware does not support configured channel",
];

/// Longest log excerpt carried into an error message.
const LOG_EXCERPT_MAX: usize = 400;

/// Everything needed to render a hostapd configuration.
#[derive(Debug, Clone)]
pub struct ApConfig {
    /// AP interface name
    pub interface: String,
    /// Network name, 1-32 bytes
    pub ssid: String,
    /// WPA2 passphrase, 8-63 chars
    pub passphrase: String,
    /// Channel; band follows from the number
    pub channel: u8,
    /// Omit the SSID from beacons
    pub hidden: bool,
    /// ISO 3166-1 alpha-2 regulatory domain
    pub country: String,
}

impl ApConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ssid.is_empty() || self.ssid.len() > 32 {
            return Err(WirelessError::Config(format!(
                "SSID must be 1-32 bytes, got {}",
                self.ssid.len()
            )));
        }
        if self.passphrase.len() < 8 || self.passphrase.len() > 63 {
            return Err(WirelessError::Config(format!(
                "WPA2 passphrase must be 8-63 characters, got {}",
                self.passphrase.len()
            )));
        }
        Ok(())
    }
}

/// Feature sets tried during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSet {
    /// HT (and VHT on 5 GHz) plus WMM
    Full,
    /// Bare 802.11 a/g, for drivers that choke on capability flags
    Minimal,
}

/// Result of one launch attempt.
#[derive(Debug)]
pub enum LaunchOutcome {
    /// hostapd is up and beaconing
    Running { pid: i32 },
    /// hostapd exited or died; log tail for classification
    Failed { log_tail: String },
}

/// Seam between negotiation policy and the real daemon.
pub trait ApLauncher {
    fn launch(&mut self, config: &ApConfig, features: FeatureSet) -> Result<LaunchOutcome>;
}

/// Outcome of a successful negotiation.
#[derive(Debug)]
pub struct NegotiatedAp {
    /// PID of the daemonized hostapd
    pub pid: i32,
    /// Channel actually in use
    pub effective_channel: u8,
    /// True when the 2.4 GHz fallback replaced a rejected 5 GHz channel
    pub fallback_applied: bool,
}

/// Whether a hostapd log excerpt is a channel rejection.
pub fn is_channel_rejection(log: &str) -> bool {
    let log = log.to_lowercase();
    CHANNEL_REJECT_PATTERNS.iter().any(|p| log.contains(p))
}

/// Map a channel number to the hostapd hw_mode letter.
pub fn hw_mode(channel: u8) -> &'static str {
    if is_5ghz_channel(channel as u32) {
        "a"
    } else {
        "g"
    }
}

/// Render a hostapd configuration for the given feature set.
pub fn render_config(config: &ApConfig, features: FeatureSet) -> String {
    let mut out = String::new();
    let mut line = |k: &str, v: &str| {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('\n');
    };

    line("interface", &config.interface);
    line("driver", "nl80211");
    line("ssid", &config.ssid);
    line("hw_mode", hw_mode(config.channel));
    line("channel", &config.channel.to_string());
    line("country_code", &config.country);
    line("ieee80211d", "1");
    if features == FeatureSet::Full {
        line("ieee80211n", "1");
        if is_5ghz_channel(config.channel as u32) {
            line("ieee80211ac", "1");
        }
        line("wmm_enabled", "1");
    }
    line("auth_algs", "1");
    line(
        "ignore_broadcast_ssid",
        if config.hidden { "1" } else { "0" },
    );
    line("wpa", "2");
    line("wpa_passphrase", &config.passphrase);
    line("wpa_key_mgmt", "WPA-PSK");
    line("rsn_pairwise", "CCMP");

    out
}

/// Resolve the regulatory country code.
///
/// Prefers the kernel regdom from `iw reg get`; a locale suffix is the
/// heuristic fallback, then a fixed default.
pub fn resolve_country() -> String {
    if let Ok(reg) = cmd::output_of("iw", &["reg", "get"]) {
        if let Some(code) = parse_regdom(&reg) {
            return code;
        }
    }
    for var in ["LC_ALL", "LANG"] {
        if let Ok(value) = env::var(var) {
            if let Some(code) = country_from_locale(&value) {
                return code;
            }
        }
    }
    "US".to_string()
}

/// Extract the country code from `iw reg get` output. The world domain
/// ("00") does not count.
pub fn parse_regdom(text: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("country ") {
            let code: String = rest.chars().take_while(|c| *c != ':').collect();
            if code.len() == 2 && code != "00" && code.chars().all(|c| c.is_ascii_alphabetic()) {
                return Some(code.to_uppercase());
            }
        }
    }
    None
}

/// Extract a country code from a locale string like `en_US.UTF-8`.
pub fn country_from_locale(locale: &str) -> Option<String> {
    let after = locale.split('_').nth(1)?;
    let code: String = after.chars().take(2).collect();
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code.to_uppercase())
    } else {
        None
    }
}

/// Collapse a log excerpt into a single capped line for error messages.
pub fn collapse_log(log: &str) -> String {
    let mut collapsed = log
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    if collapsed.len() > LOG_EXCERPT_MAX {
        let mut cut = LOG_EXCERPT_MAX;
        while !collapsed.is_char_boundary(cut) {
            cut -= 1;
        }
        collapsed.truncate(cut);
    }
    collapsed
}

/// Negotiate an AP configuration the hardware will accept.
///
/// Phase 1 asks for the full feature set on the configured channel. If that
/// fails for any reason other than a channel rejection, phase 2 retries
/// with the minimal set. A channel rejection on a 5 GHz channel earns one
/// repeat of both phases on the 2.4 GHz fallback channel; the caller keeps
/// reporting the originally configured channel.
pub fn negotiate(launcher: &mut dyn ApLauncher, config: &ApConfig) -> Result<NegotiatedAp> {
    config.validate()?;

    log::info!(
        "Starting AP daemon: ssid={}, channel={}, hw_mode={}",
        config.ssid,
        config.channel,
        hw_mode(config.channel)
    );

    let mut last_log = match attempt_phases(launcher, config)? {
        Ok(pid) => {
            return Ok(NegotiatedAp {
                pid,
                effective_channel: config.channel,
                fallback_applied: false,
            })
        }
        Err(log_tail) => log_tail,
    };

    let on_5ghz = is_5ghz_channel(config.channel as u32);
    if is_channel_rejection(&last_log) && on_5ghz {
        log::warn!(
            "Channel {} rejected, falling back to channel {}",
            config.channel,
            FALLBACK_CHANNEL
        );
        let fallback = ApConfig {
            channel: FALLBACK_CHANNEL,
            ..config.clone()
        };
        match attempt_phases(launcher, &fallback)? {
            Ok(pid) => {
                return Ok(NegotiatedAp {
                    pid,
                    effective_channel: FALLBACK_CHANNEL,
                    fallback_applied: true,
                })
            }
            Err(log_tail) => last_log = log_tail,
        }
    }

    if on_5ghz && is_channel_rejection(&last_log) {
        Err(WirelessError::Daemon(format!(
            "hostapd rejected channel {} and the {} fallback; this adapter cannot host an AP \
             while associated on 5 GHz, connect to a 2.4 GHz network and retry ({})",
            config.channel,
            FALLBACK_CHANNEL,
            collapse_log(&last_log)
        )))
    } else {
        Err(WirelessError::Daemon(format!(
            "hostapd failed to start: {}",
            collapse_log(&last_log)
        )))
    }
}

// One full-then-minimal pass on a single channel. Ok(pid) on success,
// Err(log) with the last failure otherwise. The minimal retry is skipped
// for channel rejections, which no feature set will fix.
fn attempt_phases(
    launcher: &mut dyn ApLauncher,
    config: &ApConfig,
) -> Result<std::result::Result<i32, String>> {
    let last_log = match launcher.launch(config, FeatureSet::Full)? {
        LaunchOutcome::Running { pid } => return Ok(Ok(pid)),
        LaunchOutcome::Failed { log_tail } => log_tail,
    };

    if is_channel_rejection(&last_log) {
        return Ok(Err(last_log));
    }

    log::warn!("AP daemon rejected full feature set, retrying with minimal features");
    match launcher.launch(config, FeatureSet::Minimal)? {
        LaunchOutcome::Running { pid } => Ok(Ok(pid)),
        LaunchOutcome::Failed { log_tail } => Ok(Err(log_tail)),
    }
}

/// Launches the real hostapd binary.
pub struct HostapdLauncher {
    conf_path: PathBuf,
    log_path: PathBuf,
}

impl HostapdLauncher {
    pub fn new(conf_path: PathBuf, log_path: PathBuf) -> Self {
        Self { conf_path, log_path }
    }
}

impl ApLauncher for HostapdLauncher {
    fn launch(&mut self, config: &ApConfig, features: FeatureSet) -> Result<LaunchOutcome> {
        fs::write(&self.conf_path, render_config(config, features)).map_err(|e| {
            WirelessError::System(format!("write {}: {}", self.conf_path.display(), e))
        })?;
        // fresh log per attempt so classification only sees this run
        let _ = fs::write(&self.log_path, "");

        // The supplicant must not hold the AP interface, and hostapd wants
        // to bring it up itself.
        let _ = cmd::run_ok("wpa_cli", &["-i", &config.interface, "disconnect"]);
        let _ = cmd::run_ok("ip", &["link", "set", &config.interface, "down"]);

        // A leftover hostapd would both hold the interface and satisfy the
        // pid poll below with a foreign process.
        clear_stale_hostapd();

        let conf = self.conf_path.to_string_lossy();
        let log = self.log_path.to_string_lossy();
        if let Err(e) = cmd::run("hostapd", &["-B", &conf, "-f", &log]) {
            log::debug!("hostapd launch command failed: {}", e);
            return Ok(LaunchOutcome::Failed {
                log_tail: self.read_log_tail(),
            });
        }

        // -B reports success before interface setup finishes; only a live
        // pid after the settle window counts.
        let mut pid = None;
        poll_until(15, Duration::from_millis(100), || {
            pid = process::pid_of_name("hostapd");
            pid.is_some()
        });

        match pid {
            Some(pid) if process::pid_alive(pid) => Ok(LaunchOutcome::Running { pid }),
            _ => Ok(LaunchOutcome::Failed {
                log_tail: self.read_log_tail(),
            }),
        }
    }
}

impl HostapdLauncher {
    fn read_log_tail(&self) -> String {
        fs::read_to_string(&self.log_path).unwrap_or_default()
    }
}

fn clear_stale_hostapd() {
    let stale = match process::find_by_name("hostapd") {
        Ok(procs) => procs,
        Err(_) => return,
    };
    if stale.is_empty() {
        return;
    }

    log::warn!("Terminating {} stale hostapd instance(s)", stale.len());
    for proc in &stale {
        let _ = process::signal_pid(proc.pid, libc::SIGTERM);
    }
    let gone = poll_until(10, Duration::from_millis(100), || {
        stale.iter().all(|p| !process::pid_alive(p.pid))
    });
    if !gone {
        for proc in &stale {
            if process::pid_alive(proc.pid) {
                let _ = process::signal_pid(proc.pid, libc::SIGKILL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(channel: u8) -> ApConfig {
        ApConfig {
            interface: "ap0".to_string(),
            ssid: "testnet".to_string(),
            passphrase: "secret-pass".to_string(),
            channel,
            hidden: false,
            country: "US".to_string(),
        }
    }

    /// Scripted launcher that replays a fixed sequence of outcomes and
    /// records what it was asked to do.
    struct ScriptedLauncher {
        script: Vec<LaunchOutcome>,
        calls: Vec<(u8, FeatureSet)>,
    }

    impl ScriptedLauncher {
        fn new(script: Vec<LaunchOutcome>) -> Self {
            Self {
                script,
                calls: Vec::new(),
            }
        }
    }

    impl ApLauncher for ScriptedLauncher {
        fn launch(&mut self, config: &ApConfig, features: FeatureSet) -> Result<LaunchOutcome> {
            self.calls.push((config.channel, features));
            Ok(self.script.remove(0))
        }
    }

    #[test]
    fn first_attempt_success() {
        let mut launcher = ScriptedLauncher::new(vec![LaunchOutcome::Running { pid: 42 }]);
        let ap = negotiate(&mut launcher, &config(149)).unwrap();
        assert_eq!(ap.pid, 42);
        assert_eq!(ap.effective_channel, 149);
        assert!(!ap.fallback_applied);
        assert_eq!(launcher.calls, vec![(149, FeatureSet::Full)]);
    }

    #[test]
    fn minimal_retry_after_non_channel_failure() {
        let mut launcher = ScriptedLauncher::new(vec![
            LaunchOutcome::Failed {
                log_tail: "nl80211: Driver does not support some feature".to_string(),
            },
            LaunchOutcome::Running { pid: 7 },
        ]);
        let ap = negotiate(&mut launcher, &config(6)).unwrap();
        assert_eq!(ap.effective_channel, 6);
        assert!(!ap.fallback_applied);
        assert_eq!(
            launcher.calls,
            vec![(6, FeatureSet::Full), (6, FeatureSet::Minimal)]
        );
    }

    #[test]
    fn fallback_channel_after_5ghz_rejection() {
        let mut launcher = ScriptedLauncher::new(vec![
            LaunchOutcome::Failed {
                log_tail: "wlan0: could not select hw_mode and channel".to_string(),
            },
            LaunchOutcome::Running { pid: 99 },
        ]);
        let ap = negotiate(&mut launcher, &config(149)).unwrap();
        assert_eq!(ap.pid, 99);
        assert_eq!(ap.effective_channel, FALLBACK_CHANNEL);
        assert!(ap.fallback_applied);
        // rejection skips the minimal-feature phase entirely
        assert_eq!(
            launcher.calls,
            vec![(149, FeatureSet::Full), (6, FeatureSet::Full)]
        );
    }

    #[test]
    fn fallback_channel_retries_minimal_features() {
        // rejected on 149, then the fallback channel fails Full for a
        // non-channel reason; Minimal on the fallback channel must still
        // get its turn
        let mut launcher = ScriptedLauncher::new(vec![
            LaunchOutcome::Failed {
                log_tail: "could not select hw_mode and channel".to_string(),
            },
            LaunchOutcome::Failed {
                log_tail: "nl80211: Driver does not support some feature".to_string(),
            },
            LaunchOutcome::Running { pid: 13 },
        ]);
        let ap = negotiate(&mut launcher, &config(149)).unwrap();
        assert_eq!(ap.pid, 13);
        assert_eq!(ap.effective_channel, FALLBACK_CHANNEL);
        assert!(ap.fallback_applied);
        assert_eq!(
            launcher.calls,
            vec![
                (149, FeatureSet::Full),
                (6, FeatureSet::Full),
                (6, FeatureSet::Minimal)
            ]
        );
    }

    #[test]
    fn both_bands_rejected_gets_actionable_error() {
        let mut launcher = ScriptedLauncher::new(vec![
            LaunchOutcome::Failed {
                log_tail: "could not select hw_mode and channel".to_string(),
            },
            LaunchOutcome::Failed {
                log_tail: "Hardware does not support configured channel".to_string(),
            },
        ]);
        let err = negotiate(&mut launcher, &config(149)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2.4 GHz"));
        assert!(msg.contains("149"));
    }

    #[test]
    fn no_fallback_for_2ghz_rejection() {
        let mut launcher = ScriptedLauncher::new(vec![LaunchOutcome::Failed {
            log_tail: "could not select hw_mode and channel".to_string(),
        }]);
        let err = negotiate(&mut launcher, &config(6)).unwrap_err();
        assert!(err.to_string().contains("hostapd failed to start"));
        assert_eq!(launcher.calls.len(), 1);
    }

    #[test]
    fn classifier_pins_known_substrings() {
        assert!(is_channel_rejection(
            "line one\nCould not select hw_mode and channel\nline three"
        ));
        assert!(is_channel_rejection(
            "HARDWARE DOES NOT SUPPORT CONFIGURED CHANNEL"
        ));
        assert!(!is_channel_rejection("interface state UNINITIALIZED"));
    }

    #[test]
    fn config_keys_per_feature_set() {
        let full = render_config(&config(36), FeatureSet::Full);
        assert!(full.contains("hw_mode=a\n"));
        assert!(full.contains("ieee80211n=1\n"));
        assert!(full.contains("ieee80211ac=1\n"));
        assert!(full.contains("wmm_enabled=1\n"));
        assert!(full.contains("country_code=US\n"));
        assert!(full.contains("rsn_pairwise=CCMP\n"));

        let minimal = render_config(&config(6), FeatureSet::Minimal);
        assert!(minimal.contains("hw_mode=g\n"));
        assert!(!minimal.contains("ieee80211n"));
        assert!(!minimal.contains("ieee80211ac"));
        assert!(!minimal.contains("wmm_enabled"));

        let g_full = render_config(&config(6), FeatureSet::Full);
        assert!(g_full.contains("ieee80211n=1\n"));
        assert!(!g_full.contains("ieee80211ac"));
    }

    #[test]
    fn hidden_ssid_flag() {
        let mut cfg = config(6);
        cfg.hidden = true;
        assert!(render_config(&cfg, FeatureSet::Full).contains("ignore_broadcast_ssid=1\n"));
    }

    #[test]
    fn validation_bounds() {
        let mut cfg = config(6);
        cfg.ssid = "".to_string();
        assert!(cfg.validate().is_err());
        cfg.ssid = "x".repeat(33);
        assert!(cfg.validate().is_err());
        cfg.ssid = "ok".to_string();
        cfg.passphrase = "short".to_string();
        assert!(cfg.validate().is_err());
        cfg.passphrase = "longenough".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn regdom_parsing() {
        assert_eq!(
            parse_regdom("global\ncountry DE: DFS-ETSI\n"),
            Some("DE".to_string())
        );
        assert_eq!(parse_regdom("country 00: DFS-UNSET\n"), None);
        assert_eq!(parse_regdom("phy#0\n"), None);
    }

    #[test]
    fn locale_country_heuristic() {
        assert_eq!(country_from_locale("en_US.UTF-8"), Some("US".to_string()));
        assert_eq!(country_from_locale("de_AT"), Some("AT".to_string()));
        assert_eq!(country_from_locale("C"), None);
        assert_eq!(country_from_locale("POSIX"), None);
    }

    #[test]
    fn log_collapse_caps_length() {
        let collapsed = collapse_log("a\n\nb\nc");
        assert_eq!(collapsed, "a; b; c");
        let long = "x".repeat(1000);
        assert_eq!(collapse_log(&long).len(), 400);
    }
}
