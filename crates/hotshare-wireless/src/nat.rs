//! NAT and forwarding between the AP subnet and the upstream client link.
//!
//! Rules are built as explicit argument vectors and handed to the
//! `iptables` binary. Kernel IP forwarding is captured before being
//! enabled so teardown can restore whatever the host had.

use std::fs;
use std::process::Command;

use crate::error::{Result, WirelessError};

const IP_FORWARD_PATH: &str = "/proc/sys/net/ipv4/ip_forward";

/// Table types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Filter,
    Nat,
}

impl Table {
    fn as_str(&self) -> &str {
        match self {
            Table::Filter => "filter",
            Table::Nat => "nat",
        }
    }
}

/// Chain names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Forward,
    Postrouting,
}

impl Chain {
    fn as_str(&self) -> &str {
        match self {
            Chain::Forward => "FORWARD",
            Chain::Postrouting => "POSTROUTING",
        }
    }
}

/// Target actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Accept,
    Masquerade,
}

impl Target {
    fn as_str(&self) -> &str {
        match self {
            Target::Accept => "ACCEPT",
            Target::Masquerade => "MASQUERADE",
        }
    }
}

/// Iptables rule builder
#[derive(Debug, Clone)]
pub struct Rule {
    table: Table,
    chain: Chain,
    in_interface: Option<String>,
    out_interface: Option<String>,
    state: Option<String>,
    target: Target,
}

impl Rule {
    pub fn new(table: Table, chain: Chain, target: Target) -> Self {
        Self {
            table,
            chain,
            in_interface: None,
            out_interface: None,
            state: None,
            target,
        }
    }

    pub fn in_interface(mut self, iface: &str) -> Self {
        self.in_interface = Some(iface.to_string());
        self
    }

    pub fn out_interface(mut self, iface: &str) -> Self {
        self.out_interface = Some(iface.to_string());
        self
    }

    pub fn connection_state(mut self, state: &str) -> Self {
        self.state = Some(state.to_string());
        self
    }

    fn to_args(&self, action: &str) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            self.table.as_str().to_string(),
            action.to_string(),
            self.chain.as_str().to_string(),
        ];

        if let Some(iface) = &self.in_interface {
            args.push("-i".to_string());
            args.push(iface.clone());
        }

        if let Some(iface) = &self.out_interface {
            args.push("-o".to_string());
            args.push(iface.clone());
        }

        if let Some(state) = &self.state {
            args.push("-m".to_string());
            args.push("state".to_string());
            args.push("--state".to_string());
            args.push(state.clone());
        }

        args.push("-j".to_string());
        args.push(self.target.as_str().to_string());

        args
    }
}

/// NAT configuration between the AP interface and the upstream client link.
pub struct NatManager {
    ap_iface: String,
    upstream_iface: String,
}

impl NatManager {
    pub fn new(ap_iface: &str, upstream_iface: &str) -> Self {
        Self {
            ap_iface: ap_iface.to_string(),
            upstream_iface: upstream_iface.to_string(),
        }
    }

    fn rules(&self) -> Vec<Rule> {
        vec![
            Rule::new(Table::Nat, Chain::Postrouting, Target::Masquerade)
                .out_interface(&self.upstream_iface),
            Rule::new(Table::Filter, Chain::Forward, Target::Accept)
                .in_interface(&self.upstream_iface)
                .out_interface(&self.ap_iface)
                .connection_state("RELATED,ESTABLISHED"),
            Rule::new(Table::Filter, Chain::Forward, Target::Accept)
                .in_interface(&self.ap_iface)
                .out_interface(&self.upstream_iface),
        ]
    }

    /// Install forwarding rules and enable IP forwarding.
    ///
    /// Returns whether forwarding was already enabled, for restoration at
    /// teardown.
    pub fn apply(&self) -> Result<bool> {
        let was_enabled = ip_forwarding_enabled()?;
        if !was_enabled {
            set_ip_forwarding(true)?;
            log::info!("Enabled IPv4 forwarding");
        }

        for rule in self.rules() {
            self.execute(&rule.to_args("-A"))?;
        }
        log::info!(
            "NAT configured: {} -> {}",
            self.ap_iface,
            self.upstream_iface
        );
        Ok(was_enabled)
    }

    /// Delete the forwarding rules and restore the recorded forwarding flag.
    ///
    /// Missing rules are a no-op; forwarding is only touched when this run
    /// enabled it.
    pub fn remove(&self, forwarding_was_enabled: bool) {
        for rule in self.rules() {
            self.delete(&rule);
        }
        if !forwarding_was_enabled {
            if let Err(e) = set_ip_forwarding(false) {
                log::warn!("Could not restore IPv4 forwarding: {}", e);
            } else {
                log::info!("Restored IPv4 forwarding to disabled");
            }
        }
    }

    fn delete(&self, rule: &Rule) {
        if let Err(e) = self.execute(&rule.to_args("-D")) {
            if e.to_string().contains("does a matching rule exist") {
                log::debug!("Rule already absent");
            } else {
                log::warn!("Could not delete rule: {}", e);
            }
        }
    }

    fn execute(&self, args: &[String]) -> Result<()> {
        log::debug!("iptables {}", args.join(" "));
        let output = Command::new("iptables")
            .args(args)
            .output()
            .map_err(|e| WirelessError::Nat(format!("Failed to spawn iptables: {}", e)))?;
        if !output.status.success() {
            return Err(WirelessError::Nat(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

/// Read the kernel IPv4 forwarding flag.
pub fn ip_forwarding_enabled() -> Result<bool> {
    let value = fs::read_to_string(IP_FORWARD_PATH)
        .map_err(|e| WirelessError::System(format!("read {}: {}", IP_FORWARD_PATH, e)))?;
    Ok(value.trim() == "1")
}

fn set_ip_forwarding(enabled: bool) -> Result<()> {
    let value = if enabled { "1\n" } else { "0\n" };
    fs::write(IP_FORWARD_PATH, value)
        .map_err(|e| WirelessError::System(format!("write {}: {}", IP_FORWARD_PATH, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masquerade_rule_args() {
        let rule = Rule::new(Table::Nat, Chain::Postrouting, Target::Masquerade)
            .out_interface("wlan0");
        let args = rule.to_args("-A");
        assert_eq!(
            args,
            vec!["-t", "nat", "-A", "POSTROUTING", "-o", "wlan0", "-j", "MASQUERADE"]
        );
    }

    #[test]
    fn stateful_forward_rule_args() {
        let rule = Rule::new(Table::Filter, Chain::Forward, Target::Accept)
            .in_interface("wlan0")
            .out_interface("ap0")
            .connection_state("RELATED,ESTABLISHED");
        let args = rule.to_args("-A");
        assert_eq!(
            args,
            vec![
                "-t", "filter", "-A", "FORWARD", "-i", "wlan0", "-o", "ap0", "-m", "state",
                "--state", "RELATED,ESTABLISHED", "-j", "ACCEPT"
            ]
        );
    }

    #[test]
    fn manager_rule_set_shape() {
        let mgr = NatManager::new("ap0", "wlan0");
        let rules = mgr.rules();
        assert_eq!(rules.len(), 3);
        // return path is stateful, AP egress is not
        let add: Vec<Vec<String>> = rules.iter().map(|r| r.to_args("-A")).collect();
        assert!(add[0].contains(&"MASQUERADE".to_string()));
        assert!(add[1].contains(&"RELATED,ESTABLISHED".to_string()));
        assert!(!add[2].contains(&"RELATED,ESTABLISHED".to_string()));
        // -D builds the same match as -A
        let del = rules[1].to_args("-D");
        assert_eq!(del[2], "-D");
        assert_eq!(&del[3..], &add[1][3..]);
    }
}
