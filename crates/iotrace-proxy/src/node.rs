//! Resolution of the local node address recorded in telemetry.

use std::net::{IpAddr, ToSocketAddrs};
use std::sync::OnceLock;

static LOCAL_ADDRESS: OnceLock<Option<String>> = OnceLock::new();

/// The local host's address, resolved once per process.
///
/// Resolves the hostname and prefers an IPv4 address. Returns `None` when the
/// hostname cannot be read or resolved; records then carry `null`.
pub fn local_address() -> Option<String> {
    LOCAL_ADDRESS.get_or_init(resolve).clone()
}

fn resolve() -> Option<String> {
    let host = match hostname::get() {
        Ok(h) => h.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot read hostname");
            return None;
        }
    };

    let addrs: Vec<IpAddr> = match (host.as_str(), 0).to_socket_addrs() {
        Ok(addrs) => addrs.map(|a| a.ip()).collect(),
        Err(e) => {
            tracing::warn!(error = %e, host = %host, "Cannot resolve local hostname");
            return None;
        }
    };

    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .map(|ip| ip.to_string())
}
