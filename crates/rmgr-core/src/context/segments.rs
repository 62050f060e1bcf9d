//! Segment liveness: heartbeats, membership, probes and expiry.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::RmContext;
use crate::catalog::{unix_timestamp, SegmentState, SegmentStatusUpdate};
use crate::error::RmError;
use crate::protocol::requests::ImAliveRequest;
use crate::respool::{
    parse_membership_update, stat_from_heartbeat, DownOutcome, IngestOutcome,
    MembershipParseError, MembershipUpdate, ProbeCompletion, SegStat,
};

impl RmContext {
    /// Common entry for both heartbeat paths. Recomputes capacity only when
    /// the host is new or its capacity moved.
    pub fn add_segment(&mut self, stat: SegStat, now: Instant) -> IngestOutcome {
        let host = stat.info.hostname.clone();
        let was_down = self.pool.host(&host).map(|s| !s.is_available());
        let outcome = self.pool.add_segment_with_stat(stat, now);
        if was_down == Some(true) {
            self.report_status(&host, SegmentState::Up);
        }
        if outcome.capacity_changed() {
            self.refresh_capacity();
        }
        outcome
    }

    /// Direct `IMAlive` heartbeat. `peer_hostname` is the reverse lookup of
    /// the connection's source address.
    pub fn ingest_heartbeat(
        &mut self,
        request: ImAliveRequest,
        peer_ip: &str,
        peer_hostname: Option<&str>,
        now: Instant,
    ) -> Result<IngestOutcome, RmError> {
        let stat = stat_from_heartbeat(request, peer_ip, peer_hostname).map_err(|e| {
            warn!(peer = %peer_ip, "{}", e);
            e
        })?;
        Ok(self.add_segment(stat, now))
    }

    /// One change from the membership store. A malformed value is dropped;
    /// the next report from that host replaces it. A departed host loses
    /// its stable id, and a new host is only taken while the cluster is
    /// short of its expected size.
    pub fn handle_membership_update(
        &mut self,
        key: &str,
        value: &str,
        now: Instant,
    ) -> Result<(), MembershipParseError> {
        let update = parse_membership_update(&self.config.membership_server_dir, key, value)
            .map_err(|e| {
                warn!(key = %key, "membership update dropped: {}", e);
                e
            })?;
        match update {
            MembershipUpdate::Departed { hostname } => {
                let was_available = self.pool.mark_departed(&hostname);
                self.pool.invalidate_id(&hostname);
                if was_available {
                    self.report_status(&hostname, SegmentState::Down);
                    self.refresh_capacity();
                }
            }
            MembershipUpdate::Report(stat) => {
                let host = stat.info.hostname.clone();
                if !self.pool.admits_member(&host) {
                    warn!(
                        host = %host,
                        slaves = self.pool.slaves_host_count(),
                        "cluster already has its expected host count, new segment refused"
                    );
                    return Ok(());
                }
                self.add_segment(stat, now);
                self.pool.note_membership_host(&host);
            }
        }
        Ok(())
    }

    /// A client reported these hosts down. Each one is probed unless it is
    /// already down or being probed; capacity is recomputed afterwards.
    pub fn segment_is_down(&mut self, hosts: &[String]) -> Vec<DownOutcome> {
        let mut outcomes = Vec::with_capacity(hosts.len());
        for host in hosts {
            let outcome = self.pool.segment_is_down(host, self.prober.as_mut());
            if outcome == DownOutcome::MarkedUnavailable {
                info!(host = %host, "segment set from up to down, not reachable");
                self.report_status(host, SegmentState::Down);
            }
            outcomes.push(outcome);
        }
        self.refresh_capacity();
        outcomes
    }

    /// Result of a liveness probe.
    pub fn complete_probe(&mut self, host: &str, alive: bool) -> ProbeCompletion {
        let outcome = self.pool.complete_probe(host, alive);
        match outcome {
            ProbeCompletion::MarkedUnavailable => {
                self.report_status(host, SegmentState::Down);
                self.refresh_capacity();
            }
            ProbeCompletion::UnknownHost => {
                debug!(host = %host, "probe result for unknown segment ignored")
            }
            ProbeCompletion::Restored | ProbeCompletion::Ignored => {}
        }
        outcome
    }

    /// Mark hosts that stopped heartbeating unavailable.
    pub fn expire_silent_segments(&mut self, now: Instant) -> Vec<String> {
        let timeout = Duration::from_secs(self.config.segment_heartbeat_timeout_secs);
        let expired = self.pool.expire_silent_segments(now, timeout);
        if expired.is_empty() {
            return expired;
        }
        for host in &expired {
            self.report_status(host, SegmentState::Down);
        }
        self.refresh_capacity();
        expired
    }

    fn report_status(&mut self, host: &str, state: SegmentState) {
        let Some(seg) = self.pool.host(host) else {
            return;
        };
        let update = SegmentStatusUpdate {
            id: seg.stat.info.id,
            hostname: host.to_string(),
            state,
            description: seg.stat.status_desc.describe(),
            at: unix_timestamp(),
        };
        self.catalog.segment_status_changed(update);
    }
}
