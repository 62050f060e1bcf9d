//! Reverse DNS for heartbeat senders, run on the blocking pool.

use std::net::IpAddr;

pub async fn reverse_lookup(ip: IpAddr) -> Option<String> {
    match tokio::task::spawn_blocking(move || lookup_blocking(ip)).await {
        Ok(name) => name,
        Err(e) => {
            tracing::debug!(%ip, "reverse lookup task failed: {}", e);
            None
        }
    }
}

/// The resolver falls back to the numeric form when the address has no
/// name; that counts as unresolved.
fn lookup_blocking(ip: IpAddr) -> Option<String> {
    match dns_lookup::lookup_addr(&ip) {
        Ok(name) if name != ip.to_string() => Some(name),
        Ok(_) => {
            tracing::debug!(%ip, "no reverse name");
            None
        }
        Err(e) => {
            tracing::debug!(%ip, "reverse lookup failed: {}", e);
            None
        }
    }
}
