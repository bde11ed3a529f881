//! Persisted hotspot configuration.
//!
//! Plain key=value file. Unknown keys and unparseable values are skipped on
//! load so a hand-edited file degrades to defaults instead of blocking
//! startup. Saves go through a temp file with fsync and rename, mode 0600
//! since the passphrase lives here.

use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Default config location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hotshare.conf";

/// User-facing hotspot settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotConfig {
    /// Network name, 1-32 bytes
    pub ssid: String,
    /// WPA2 passphrase, 8-63 chars
    pub password: String,
    /// 0 means follow the client connection's channel
    pub channel: u8,
    /// Cap on simultaneous DHCP clients shown
    pub max_clients: u32,
    /// Omit the SSID from beacons
    pub hidden: bool,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            ssid: "hotshare".to_string(),
            password: "password123".to_string(),
            channel: 0,
            max_clients: 10,
            hidden: false,
        }
    }
}

impl HotspotConfig {
    /// Load from a key=value file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(config),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                log::warn!("Skipping malformed config line: {}", line);
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "ssid" => config.ssid = value.to_string(),
                "password" => config.password = value.to_string(),
                "channel" => match value.parse() {
                    Ok(ch) => config.channel = ch,
                    Err(_) => log::warn!("Skipping invalid channel value: {}", value),
                },
                "max_clients" => match value.parse() {
                    Ok(n) => config.max_clients = n,
                    Err(_) => log::warn!("Skipping invalid max_clients value: {}", value),
                },
                "hidden" => config.hidden = value == "1" || value == "true",
                other => log::warn!("Skipping unknown config key: {}", other),
            }
        }

        Ok(config)
    }

    /// Atomically write the config with mode 0600.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .with_context(|| format!("{} has no parent directory", path.display()))?;
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;

        let tmp = path.with_extension("tmp");
        {
            let mut file =
                File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
            file.write_all(self.render().as_bytes())
                .with_context(|| format!("writing {}", tmp.display()))?;
            file.sync_all().context("syncing config to disk")?;
            let mut perms = file.metadata().context("reading temp file metadata")?.permissions();
            perms.set_mode(0o600);
            file.set_permissions(perms).context("restricting config permissions")?;
        }
        fs::rename(&tmp, path)
            .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
        Ok(())
    }

    /// Set one field from CLI key/value strings.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "ssid" => self.ssid = value.to_string(),
            "password" => self.password = value.to_string(),
            "channel" => {
                self.channel = value
                    .parse()
                    .with_context(|| format!("invalid channel: {}", value))?
            }
            "max_clients" => {
                self.max_clients = value
                    .parse()
                    .with_context(|| format!("invalid max_clients: {}", value))?
            }
            "hidden" => match value {
                "1" | "true" => self.hidden = true,
                "0" | "false" => self.hidden = false,
                other => bail!("invalid hidden value: {} (use true/false)", other),
            },
            other => bail!(
                "unknown config key: {} (valid: ssid, password, channel, max_clients, hidden)",
                other
            ),
        }
        Ok(())
    }

    /// Validate WPA2 bounds before a start.
    pub fn validate(&self) -> Result<()> {
        if self.ssid.is_empty() || self.ssid.len() > 32 {
            bail!("ssid must be 1-32 bytes");
        }
        if self.password.len() < 8 || self.password.len() > 63 {
            bail!("password must be 8-63 characters");
        }
        Ok(())
    }

    fn render(&self) -> String {
        format!(
            "ssid={}\npassword={}\nchannel={}\nmax_clients={}\nhidden={}\n",
            self.ssid,
            self.password,
            self.channel,
            self.max_clients,
            if self.hidden { "1" } else { "0" },
        )
    }
}
