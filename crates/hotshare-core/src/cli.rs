use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "hotshare",
    author,
    version,
    about = "Run a WiFi hotspot while staying connected as a client"
)]
pub struct Cli {
    /// Override the config file path (defaults to /etc/hotshare.conf)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format for command responses
    #[arg(
        long = "output",
        value_enum,
        default_value_t = OutputFormat::Text,
        global = true
    )]
    pub output_format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the hotspot
    Start(StartArgs),
    /// Stop the hotspot and undo all system changes
    Stop,
    /// Show the hotspot state, uptime and daemon health
    Status,
    /// List connected clients from the DHCP lease database
    Clients(ClientsArgs),
    /// Inspect or change the persisted configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Override the configured SSID for this run
    #[arg(long)]
    pub ssid: Option<String>,

    /// Override the configured passphrase for this run
    #[arg(long)]
    pub password: Option<String>,

    /// Override the channel (0 follows the client connection)
    #[arg(long)]
    pub channel: Option<u8>,
}

#[derive(Args, Debug)]
pub struct ClientsArgs {
    /// Maximum number of clients to list (defaults to configured max_clients)
    #[arg(long)]
    pub max: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the current configuration
    Show,
    /// Set a configuration key (ssid, password, channel, max_clients, hidden)
    Set(ConfigSetArgs),
}

#[derive(Args, Debug)]
pub struct ConfigSetArgs {
    pub key: String,
    pub value: String,
}
