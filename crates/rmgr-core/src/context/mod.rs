//! The resource manager instance.
//!
//! [`RmContext`] owns the connection registry, the queue manager and the
//! resource pool, and is driven by one event at a time. Nothing in here
//! blocks: probes and catalog writes are handed to collaborators.

mod segments;
mod session;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error};

use crate::catalog::{NullCatalog, SegmentCatalog};
use crate::config::RmConfig;
use crate::conntrack::{ClientId, ConnId, ConnTrackRegistry, Progress};
use crate::dispatch::InboundRequest;
use crate::protocol::requests::WireBody;
use crate::protocol::responses::AcquireResponse;
use crate::protocol::{Frame, MessageId};
use crate::respool::{Prober, ResourcePool, SegStat};
use crate::resqueue::{Promotion, ResQueueManager};

pub use session::AcquireStatus;

/// Pause phases controlled by the quota-control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaPhase {
    /// Acquire requests are deferred.
    Admission,
    /// Requests queue in their resource queue but are not granted.
    Allocation,
}

impl QuotaPhase {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(QuotaPhase::Admission),
            1 => Some(QuotaPhase::Allocation),
            _ => None,
        }
    }
}

/// An acquire that arrived before the cluster could size it.
#[derive(Debug, Clone)]
pub(crate) struct DeferredRequest {
    pub conn_id: Option<ConnId>,
    pub request: InboundRequest,
}

/// Response waiting for the transport.
#[derive(Debug, Clone)]
enum Outgoing {
    Direct(ClientId, Frame),
    /// Staged on the track with this id.
    Track(ConnId),
}

/// Prober used when no transport is attached. Every dispatch fails, so a
/// reported-down host goes straight to unavailable.
#[derive(Debug, Default)]
pub struct NoProber;

impl Prober for NoProber {
    fn dispatch_probe(&mut self, segment: &SegStat) -> anyhow::Result<()> {
        anyhow::bail!("no liveness prober attached for {}", segment.hostname())
    }
}

pub struct RmContext {
    pub(crate) config: RmConfig,
    pub(crate) conns: ConnTrackRegistry,
    pub(crate) queues: ResQueueManager,
    pub(crate) pool: ResourcePool,
    prober: Box<dyn Prober + Send>,
    catalog: Box<dyn SegmentCatalog + Send>,
    started: Instant,
    admission_paused: bool,
    pub(crate) deferred: VecDeque<DeferredRequest>,
    outbox: Vec<Outgoing>,
}

impl RmContext {
    /// Build an instance from a validated config.
    pub fn new(config: RmConfig, now: Instant) -> Result<Self> {
        config.validate()?;
        let queues = ResQueueManager::new(
            &config.queues,
            &config.users,
            config.min_containers_per_seg,
        )
        .context("invalid resource queue tree")?;
        Ok(Self {
            conns: ConnTrackRegistry::new(config.max_resource_contexts),
            pool: ResourcePool::new(config.slaves_host_count, config.capacity_source),
            queues,
            prober: Box::new(NoProber),
            catalog: Box::new(NullCatalog),
            started: now,
            admission_paused: false,
            deferred: VecDeque::new(),
            outbox: Vec::new(),
            config,
        })
    }

    pub fn with_prober(mut self, prober: impl Prober + Send + 'static) -> Self {
        self.prober = Box::new(prober);
        self
    }

    /// Attach a catalog sink. Ignored when catalog updates are disabled.
    pub fn with_catalog(mut self, catalog: impl SegmentCatalog + Send + 'static) -> Self {
        if self.config.catalog_updates {
            self.catalog = Box::new(catalog);
        }
        self
    }

    pub fn config(&self) -> &RmConfig {
        &self.config
    }

    pub fn conns(&self) -> &ConnTrackRegistry {
        &self.conns
    }

    pub fn queues(&self) -> &ResQueueManager {
        &self.queues
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn admission_paused(&self) -> bool {
        self.admission_paused
    }

    pub fn set_phase_paused(&mut self, phase: QuotaPhase, paused: bool) {
        match phase {
            QuotaPhase::Admission => self.admission_paused = paused,
            QuotaPhase::Allocation => {
                self.queues.set_allocation_paused(paused);
                if !paused {
                    self.dispatch_waiters();
                }
            }
        }
        debug!(?phase, paused, "quota phase updated");
    }

    /// Acquires wait while the cluster has not reported in yet, while the
    /// root queue has no capacity, and while admission is paused.
    pub fn should_defer(&self, now: Instant) -> bool {
        let grace = Duration::from_secs(self.config.nocluster_timeout_secs);
        let in_grace = now.saturating_duration_since(self.started) <= grace;
        (in_grace && self.pool.cluster_report_counter() == 0)
            || !self.queues.root_capacity_known()
            || self.admission_paused
    }

    /// Re-derive queue capacity from the live cluster, then let waiters in.
    /// Holders whose grants were cut keep the smaller grant on their track.
    pub fn refresh_capacity(&mut self) {
        let cluster = self.pool.cluster_capacity();
        let memories = self.pool.segment_memories();
        for r in self.queues.refresh_capacity(&cluster, &memories) {
            match self.conns.get_mut(r.conn_id) {
                Some(track) => track.grant = Some(r.grant),
                None => error!(conn_id = %r.conn_id, "reclaimed grant has no connection track"),
            }
        }
        self.dispatch_waiters();
    }

    /// Promote waiters that fit and stage their responses.
    pub fn dispatch_waiters(&mut self) {
        let promoted = self.queues.dispatch_waiters();
        for p in promoted {
            self.apply_promotion(p);
        }
    }

    fn apply_promotion(&mut self, p: Promotion) {
        let Some(track) = self.conns.get_mut(p.conn_id) else {
            // Waiter outlived its track; hand the grant straight back.
            error!(conn_id = %p.conn_id, "promoted waiter has no connection track");
            self.queues.release(p.queue, p.conn_id);
            return;
        };
        if let Err(e) = track.transform(Progress::AllocDone) {
            error!(conn_id = %p.conn_id, "cannot complete allocation: {}", e);
            self.queues.release(p.queue, p.conn_id);
            return;
        }
        track.grant = Some(p.grant);
        let body = AcquireResponse::granted(p.grant).encode();
        match body {
            Ok(body) => {
                let frame = Frame::new(
                    MessageId::ResponseAcquireResource,
                    track.mark1,
                    track.mark2,
                    body,
                );
                track.build_response(frame);
                self.outbox.push(Outgoing::Track(p.conn_id));
            }
            Err(e) => error!(conn_id = %p.conn_id, "cannot encode allocation response: {}", e),
        }
        debug!(conn_id = %p.conn_id, seg_num = p.grant.seg_num, "waiting allocation granted");
    }

    /// Queue a response for a client that has no tracked session.
    pub fn send_direct(&mut self, client: ClientId, frame: Frame) {
        self.outbox.push(Outgoing::Direct(client, frame));
    }

    /// Stage a response on a tracked session. Falls back to nothing if the
    /// track is gone.
    pub fn send_on_track(&mut self, conn_id: ConnId, frame: Frame) {
        if let Some(track) = self.conns.get_mut(conn_id) {
            track.build_response(frame);
            self.outbox.push(Outgoing::Track(conn_id));
        }
    }

    /// Every response produced since the last drain, in production order.
    pub fn drain_responses(&mut self) -> Vec<(ClientId, Frame)> {
        let mut out = Vec::with_capacity(self.outbox.len());
        for item in std::mem::take(&mut self.outbox) {
            match item {
                Outgoing::Direct(client, frame) => out.push((client, frame)),
                Outgoing::Track(id) => {
                    if let Some(track) = self.conns.get_mut(id) {
                        if let Some(frame) = track.take_response() {
                            out.push((track.client, frame));
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests;
