//! System plumbing for hotshare: wireless interface inspection, virtual AP
//! interface management, daemon supervision (hostapd, dnsmasq), network
//! manager coordination, and NAT.

pub mod ap;
pub mod cmd;
pub mod dnsmasq;
pub mod error;
pub mod hostapd;
pub mod iface;
pub mod nat;
pub mod netman;
pub mod process;

pub use error::{Result, WirelessError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
