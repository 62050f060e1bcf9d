//! Segment resource pool: the registry of worker hosts and the capacity
//! they contribute.
//!
//! Both heartbeat paths (direct `IMAlive` and the membership store) are
//! reduced to a [`SegStat`] by their adapters and enter through
//! [`ResourcePool::add_segment_with_stat`]. Records are never removed;
//! departure and failure are flags.

mod heartbeat;
mod membership;
mod probe;
mod segstat;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

pub use heartbeat::stat_from_heartbeat;
pub use membership::{parse_membership_update, MembershipParseError, MembershipUpdate};
pub use probe::Prober;
pub use segstat::{
    CapacitySource, SegInfo, SegStat, StatusDesc, LOOPBACK_ADDR, SEGSTAT_ID_INVALID,
};

/// Liveness of one host as far as the pool knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Availability {
    Available,
    /// Reported down; an active probe is outstanding.
    PendingProbe,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct SegResource {
    pub stat: SegStat,
    pub availability: Availability,
    pub last_seen: Instant,
    pub departed: bool,
}

impl SegResource {
    /// Counts toward cluster capacity. A host with a probe outstanding still
    /// counts until the probe says otherwise.
    pub fn is_available(&self) -> bool {
        !self.departed && self.availability != Availability::Unavailable
    }

    pub fn ru_alive_pending(&self) -> bool {
        self.availability == Availability::PendingProbe
    }
}

/// Live cluster totals over available hosts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ClusterCapacity {
    pub memory_mb: u64,
    pub core: f64,
    pub nodes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    New,
    Changed,
    Unchanged,
}

impl IngestOutcome {
    pub fn capacity_changed(self) -> bool {
        matches!(self, IngestOutcome::New | IngestOutcome::Changed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownOutcome {
    UnknownHost,
    /// Already unavailable or already being probed.
    Skipped,
    ProbeDispatched,
    /// Probe dispatch failed; the host is now unavailable.
    MarkedUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeCompletion {
    UnknownHost,
    /// The host was not waiting on a probe.
    Ignored,
    Restored,
    MarkedUnavailable,
}

#[derive(Debug)]
pub struct ResourcePool {
    hosts: BTreeMap<String, SegResource>,
    ids: HashMap<String, i32>,
    next_id: i32,
    configured_slaves: u32,
    source: CapacitySource,
    cluster_report_counter: u64,
    membership_hosts: BTreeSet<String>,
}

impl ResourcePool {
    pub fn new(slaves_host_count: u32, source: CapacitySource) -> Self {
        Self {
            hosts: BTreeMap::new(),
            ids: HashMap::new(),
            next_id: 0,
            configured_slaves: slaves_host_count,
            source,
            cluster_report_counter: 0,
            membership_hosts: BTreeSet::new(),
        }
    }

    fn stable_id(&mut self, host: &str) -> i32 {
        if let Some(id) = self.ids.get(host) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(host.to_string(), id);
        id
    }

    /// Insert or update the record for `stat`'s host. Returns whether the
    /// cluster capacity may have changed; an identical heartbeat for a
    /// tracked host only refreshes its timestamp.
    pub fn add_segment_with_stat(&mut self, mut stat: SegStat, now: Instant) -> IngestOutcome {
        stat.normalize_addresses();
        let host = stat.info.hostname.clone();

        if self.hosts.contains_key(&host) {
            let id = self.stable_id(&host);
            let Some(seg) = self.hosts.get_mut(&host) else {
                return IngestOutcome::Unchanged;
            };
            let returning = !seg.is_available();
            let changed = returning || seg.stat.capacity_differs(&stat);
            stat.info.id = id;
            seg.stat = stat;
            seg.availability = Availability::Available;
            seg.departed = false;
            seg.last_seen = now;
            self.cluster_report_counter += 1;
            if returning {
                info!(host = %host, id, "segment is available again");
            }
            return if changed {
                debug!(host = %host, "segment capacity changed");
                IngestOutcome::Changed
            } else {
                IngestOutcome::Unchanged
            };
        }

        let id = self.stable_id(&host);
        stat.info.id = id;
        info!(
            host = %host,
            id,
            addresses = ?stat.info.addresses,
            "segment registered"
        );
        self.hosts.insert(
            host,
            SegResource {
                stat,
                availability: Availability::Available,
                last_seen: now,
                departed: false,
            },
        );
        self.cluster_report_counter += 1;
        IngestOutcome::New
    }

    /// Whether the membership store may add `host`: a tracked host always,
    /// a new one only while fewer than the expected hosts are available.
    pub fn admits_member(&self, host: &str) -> bool {
        self.hosts.contains_key(host)
            || self.configured_slaves == 0
            || self.avail_node_count() < self.configured_slaves
    }

    /// Record that the membership store lists `host`.
    pub fn note_membership_host(&mut self, host: &str) {
        self.membership_hosts.insert(host.to_string());
    }

    pub fn membership_hosts(&self) -> impl Iterator<Item = &str> {
        self.membership_hosts.iter().map(String::as_str)
    }

    /// Host left the membership store. Returns true if it was contributing
    /// capacity.
    pub fn mark_departed(&mut self, host: &str) -> bool {
        self.membership_hosts.remove(host);
        let Some(seg) = self.hosts.get_mut(host) else {
            debug!(host = %host, "departure for unknown segment ignored");
            return false;
        };
        let was_available = seg.is_available();
        seg.departed = true;
        seg.availability = Availability::Unavailable;
        seg.stat.status_desc.insert(StatusDesc::DEPARTED);
        info!(host = %host, "segment left cluster membership");
        was_available
    }

    /// Mark `host` unavailable with the given status bit. Returns true if it
    /// was contributing capacity.
    pub fn mark_unavailable(&mut self, host: &str, reason: u32) -> bool {
        let Some(seg) = self.hosts.get_mut(host) else {
            return false;
        };
        let was_available = seg.is_available();
        seg.availability = Availability::Unavailable;
        seg.stat.status_desc.insert(reason);
        warn!(
            host = %host,
            status = %seg.stat.status_desc.describe(),
            "segment set unavailable"
        );
        was_available
    }

    /// A client reported `host` down. Dispatch a liveness probe unless the
    /// host is already unavailable or being probed; a failed dispatch marks
    /// it unavailable directly.
    pub fn segment_is_down(&mut self, host: &str, prober: &mut dyn Prober) -> DownOutcome {
        let Some(seg) = self.hosts.get_mut(host) else {
            warn!(host = %host, "cannot find segment to check status, skipped");
            return DownOutcome::UnknownHost;
        };
        if seg.availability != Availability::Available || seg.departed {
            debug!(host = %host, availability = ?seg.availability, "segment already down or probing");
            return DownOutcome::Skipped;
        }
        match prober.dispatch_probe(&seg.stat) {
            Ok(()) => {
                seg.availability = Availability::PendingProbe;
                debug!(host = %host, "liveness probe dispatched");
                DownOutcome::ProbeDispatched
            }
            Err(e) => {
                warn!(host = %host, error = %e, "cannot dispatch liveness probe");
                self.mark_unavailable(host, StatusDesc::FAILED_PROBING);
                DownOutcome::MarkedUnavailable
            }
        }
    }

    /// Outcome of a probe dispatched by [`segment_is_down`]. A dead host
    /// ends up exactly as if the dispatch had failed.
    ///
    /// [`segment_is_down`]: ResourcePool::segment_is_down
    pub fn complete_probe(&mut self, host: &str, alive: bool) -> ProbeCompletion {
        let Some(seg) = self.hosts.get_mut(host) else {
            return ProbeCompletion::UnknownHost;
        };
        if seg.availability != Availability::PendingProbe {
            return ProbeCompletion::Ignored;
        }
        if alive {
            seg.availability = Availability::Available;
            debug!(host = %host, "liveness probe answered, segment kept available");
            return ProbeCompletion::Restored;
        }
        self.mark_unavailable(host, StatusDesc::FAILED_PROBING);
        ProbeCompletion::MarkedUnavailable
    }

    /// Mark hosts silent for longer than `timeout` unavailable. Returns the
    /// hosts that changed.
    pub fn expire_silent_segments(&mut self, now: Instant, timeout: Duration) -> Vec<String> {
        let silent: Vec<String> = self
            .hosts
            .iter()
            .filter(|(_, seg)| seg.is_available())
            .filter(|(_, seg)| now.saturating_duration_since(seg.last_seen) > timeout)
            .map(|(h, _)| h.clone())
            .collect();
        for host in &silent {
            self.mark_unavailable(host, StatusDesc::HEARTBEAT_TIMEOUT);
        }
        silent
    }

    /// Forget `host`'s stable id; its next registration gets a fresh one.
    pub fn invalidate_id(&mut self, host: &str) {
        self.ids.remove(host);
        if let Some(seg) = self.hosts.get_mut(host) {
            seg.stat.info.id = SEGSTAT_ID_INVALID;
        }
    }

    pub fn host(&self, host: &str) -> Option<&SegResource> {
        self.hosts.get(host)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &SegResource> {
        self.hosts.values()
    }

    pub fn avail_node_count(&self) -> u32 {
        self.hosts.values().filter(|s| s.is_available()).count() as u32
    }

    /// Expected cluster size: the configured value, or every non-departed
    /// host seen so far.
    pub fn slaves_host_count(&self) -> u32 {
        if self.configured_slaves > 0 {
            return self.configured_slaves;
        }
        self.hosts.values().filter(|s| !s.departed).count() as u32
    }

    /// Heartbeats accepted since startup.
    pub fn cluster_report_counter(&self) -> u64 {
        self.cluster_report_counter
    }

    pub fn capacity_source(&self) -> CapacitySource {
        self.source
    }

    pub fn cluster_capacity(&self) -> ClusterCapacity {
        let mut total = ClusterCapacity::default();
        for seg in self.hosts.values().filter(|s| s.is_available()) {
            let (mem, core) = seg.stat.capacity(self.source);
            total.memory_mb += u64::from(mem);
            total.core += f64::from(core);
            total.nodes += 1;
        }
        total
    }

    /// Memory of each available host, for the container floor.
    pub fn segment_memories(&self) -> Vec<u32> {
        self.hosts
            .values()
            .filter(|s| s.is_available())
            .map(|s| s.stat.capacity(self.source).0)
            .collect()
    }
}

#[cfg(test)]
mod tests;
