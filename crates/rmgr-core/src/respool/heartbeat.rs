//! Direct heartbeat adapter: `IMAlive` body plus what the transport saw.

use super::{SegStat, StatusDesc, SEGSTAT_ID_INVALID};
use crate::error::RmError;
use crate::protocol::requests::ImAliveRequest;

/// Build the canonical record for a direct heartbeat.
///
/// The source address observed on the connection goes first, ahead of the
/// addresses the segment reports about itself, and the hostname is the
/// reverse lookup of that address rather than the payload's claim.
pub fn stat_from_heartbeat(
    request: ImAliveRequest,
    peer_ip: &str,
    peer_hostname: Option<&str>,
) -> Result<SegStat, RmError> {
    let hostname = peer_hostname
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| {
            RmError::MalformedHeartbeat(format!("cannot resolve hostname of {peer_ip}"))
        })?;

    let mut stat = request.stat;
    let mut addresses = Vec::with_capacity(stat.info.addresses.len() + 1);
    addresses.push(peer_ip.to_string());
    addresses.append(&mut stat.info.addresses);

    stat.info.addresses = addresses;
    stat.info.hostname = hostname.to_string();
    stat.info.id = SEGSTAT_ID_INVALID;
    stat.info.grm_hostname = None;
    stat.info.grm_rackname = None;
    stat.status_desc = StatusDesc::default();
    Ok(stat)
}
