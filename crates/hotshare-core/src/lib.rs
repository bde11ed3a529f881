//! Orchestration core for hotshare: configuration, the hotspot lifecycle
//! state machine, and command dispatch for the CLI.

pub mod cli;
pub mod config;
pub mod hotspot;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

pub use cli::{Cli, Commands, ConfigCommand, OutputFormat};
use config::{HotspotConfig, DEFAULT_CONFIG_PATH};
use hotspot::{HotspotController, RuntimePaths};

/// External tools a start depends on.
const REQUIRED_TOOLS: [&str; 5] = ["iw", "ip", "hostapd", "dnsmasq", "iptables"];

/// Resolve the config path from the CLI override or the default.
pub fn resolve_config_path(cli_path: Option<PathBuf>) -> PathBuf {
    cli_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Fail unless running as root. Everything mutating (interfaces, daemons,
/// netfilter) needs it.
pub fn ensure_root() -> Result<()> {
    if unsafe { libc::geteuid() } != 0 {
        bail!("this command must be run as root");
    }
    Ok(())
}

/// Fail unless every required external tool is on PATH.
pub fn ensure_tools() -> Result<()> {
    let missing: Vec<&str> = REQUIRED_TOOLS
        .iter()
        .copied()
        .filter(|tool| !hotshare_wireless::cmd::tool_exists(tool))
        .collect();
    if !missing.is_empty() {
        bail!("required tools not found: {}", missing.join(", "));
    }
    Ok(())
}

/// Execute a parsed command, returning a message and JSON payload.
pub fn dispatch_command(config_path: &PathBuf, command: Commands) -> Result<(String, Value)> {
    let controller = HotspotController::new(RuntimePaths::default());

    match command {
        Commands::Start(args) => {
            ensure_root()?;
            ensure_tools()?;
            let mut config = HotspotConfig::load(config_path)?;
            if let Some(ssid) = args.ssid {
                config.ssid = ssid;
            }
            if let Some(password) = args.password {
                config.password = password;
            }
            if let Some(channel) = args.channel {
                config.channel = channel;
            }
            let status = controller.start(&config)?;
            let message = format!(
                "hotspot '{}' running on {} (channel {}, {})",
                status.ssid, status.ap_interface, status.channel, status.band
            );
            Ok((message, serde_json::to_value(status)?))
        }
        Commands::Stop => {
            ensure_root()?;
            let message = controller.stop()?;
            Ok((message, Value::Null))
        }
        Commands::Status => {
            let status = controller.status()?;
            let message = match status.state {
                hotspot::HotspotState::Running => format!(
                    "hotspot '{}' running on {} (up {})",
                    status.ssid,
                    status.ap_interface,
                    status.uptime.as_deref().unwrap_or("?")
                ),
                hotspot::HotspotState::Error => format!(
                    "hotspot failed: {}",
                    status.last_error.as_deref().unwrap_or("unknown error")
                ),
                state => format!("hotspot is {}", state),
            };
            Ok((message, serde_json::to_value(status)?))
        }
        Commands::Clients(args) => {
            let config = HotspotConfig::load(config_path)?;
            let max = args.max.unwrap_or(config.max_clients as usize);
            let clients = controller.clients(max)?;
            let message = format!("{} client(s) connected", clients.len());
            Ok((message, serde_json::to_value(clients)?))
        }
        Commands::Config(ConfigCommand::Show) => {
            let config = HotspotConfig::load(config_path)?;
            let payload = json!({
                "path": config_path,
                "ssid": config.ssid,
                "password": config.password,
                "channel": config.channel,
                "max_clients": config.max_clients,
                "hidden": config.hidden,
            });
            Ok((format!("config at {}", config_path.display()), payload))
        }
        Commands::Config(ConfigCommand::Set(args)) => {
            ensure_root()?;
            let mut config = HotspotConfig::load(config_path)?;
            config.set(&args.key, &args.value)?;
            config.validate()?;
            config
                .save(config_path)
                .with_context(|| format!("saving {}", config_path.display()))?;
            Ok((format!("{} updated", args.key), Value::Null))
        }
    }
}
