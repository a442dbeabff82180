//! Gateway identity.
//!
//! Every vitals sample and alert carries the gateway's own MAC address
//! (`fbd_mac_address`). It is resolved once at startup and shared as a
//! [`GatewayId`]; nothing else re-reads the host's interfaces.
//!
//! Resolution order:
//! 1. The configured override
//! 2. `eth0`, then `wlan0`, then any other non-loopback interface under
//!    `/sys/class/net`
//! 3. [`UNKNOWN_GATEWAY_ID`]

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::is_valid_mac_address;

/// Reported when no interface address can be found.
pub const UNKNOWN_GATEWAY_ID: &str = "UNKNOWN_HOST_MAC";

const PREFERRED_INTERFACES: [&str; 2] = ["eth0", "wlan0"];
const NULL_MAC: &str = "00:00:00:00:00:00";

/// The gateway's MAC address, or the unknown sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GatewayId(Arc<str>);

impl GatewayId {
    /// Wrap an identifier verbatim.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// The unknown sentinel.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_GATEWAY_ID)
    }

    /// The identifier as sent to the backend.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a real address was found.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.as_str() != UNKNOWN_GATEWAY_ID
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the gateway identity from the host's network interfaces.
#[must_use]
pub fn resolve_gateway_id(override_mac: Option<&str>) -> GatewayId {
    resolve_from(Path::new("/sys/class/net"), override_mac)
}

/// Resolve against an arbitrary sysfs-style directory of interfaces.
#[must_use]
pub fn resolve_from(net_dir: &Path, override_mac: Option<&str>) -> GatewayId {
    if let Some(mac) = override_mac {
        info!(mac, "Using configured gateway MAC address");
        return GatewayId::new(mac);
    }

    let mut interfaces: Vec<String> = match std::fs::read_dir(net_dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name != "lo")
            .collect(),
        Err(e) => {
            warn!(dir = %net_dir.display(), error = %e, "Cannot list network interfaces");
            return GatewayId::unknown();
        }
    };
    interfaces.sort_by_key(|name| {
        let rank = PREFERRED_INTERFACES
            .iter()
            .position(|preferred| preferred == name)
            .unwrap_or(PREFERRED_INTERFACES.len());
        (rank, name.clone())
    });

    for interface in &interfaces {
        let Ok(raw) = std::fs::read_to_string(net_dir.join(interface).join("address")) else {
            continue;
        };
        let mac = raw.trim();
        if mac != NULL_MAC && is_valid_mac_address(mac) {
            info!(interface = %interface, mac, "Resolved gateway MAC address");
            return GatewayId::new(mac);
        }
        debug!(interface = %interface, mac, "Skipping interface without usable address");
    }

    warn!("No MAC address found, reporting {UNKNOWN_GATEWAY_ID}");
    GatewayId::unknown()
}
