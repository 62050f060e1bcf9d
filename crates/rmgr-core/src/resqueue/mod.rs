//! Resource queue manager: the queue tree, admission and FIFO allocation.
//!
//! Queue capacity is a share of the live cluster total and only changes
//! through [`ResQueueManager::refresh_capacity`]. Grants are charged to the
//! leaf and every ancestor; a leaf may never hold more than its vseg number
//! times its vseg quota. When capacity shrinks below what is held, the
//! newest grants give vsegs back until every queue fits again.

mod ratio;
mod sizing;
mod tree;
mod users;

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{QueueConfig, UserConfig};
use crate::conntrack::ConnId;
use crate::error::RmError;
use crate::protocol::requests::RequestShape;
use crate::respool::ClusterCapacity;

pub use ratio::{memory_core_ratio, RatioTracker};
pub use tree::{Holder, QueueTrack, QueueTreeError, Waiter};
pub use users::UserDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueueId(pub(crate) usize);

/// Per-vseg quota and vseg count, either requested or granted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ResourceGrant {
    pub seg_memory_mb: u32,
    pub seg_core: f64,
    pub seg_num: u32,
    pub seg_num_min: u32,
}

impl ResourceGrant {
    pub fn total_memory_mb(&self) -> u64 {
        u64::from(self.seg_memory_mb) * u64::from(self.seg_num)
    }

    pub fn total_core(&self) -> f64 {
        self.seg_core * f64::from(self.seg_num)
    }

    fn with_count(mut self, n: u32) -> Self {
        self.seg_num = n;
        self
    }
}

/// Result of submitting an allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AllocOutcome {
    Granted(ResourceGrant),
    Waiting,
}

/// A waiter that was granted by [`ResQueueManager::dispatch_waiters`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Promotion {
    pub conn_id: ConnId,
    pub queue: QueueId,
    pub grant: ResourceGrant,
}

/// A held grant cut down by a capacity refresh. `grant` is what remains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reclaim {
    pub conn_id: ConnId,
    pub queue: QueueId,
    pub grant: ResourceGrant,
}

/// Dispatch state shown in queue status dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchFlag {
    /// Head waiter blocked by an ancestor's limit.
    Fragmented,
    /// Allocation paused by quota control.
    Paused,
    Running,
}

impl DispatchFlag {
    pub fn as_byte(self) -> u8 {
        match self {
            DispatchFlag::Fragmented => b'R',
            DispatchFlag::Paused => b'T',
            DispatchFlag::Running => b'F',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'R' => Some(DispatchFlag::Fragmented),
            b'T' => Some(DispatchFlag::Paused),
            b'F' => Some(DispatchFlag::Running),
            _ => None,
        }
    }
}

/// One row of queue status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub name: String,
    pub seg_memory_mb: u32,
    pub seg_core: f64,
    pub seg_num: u32,
    pub seg_num_max: u32,
    pub used_memory_mb: u32,
    pub used_core: f64,
    pub holders: u32,
    pub waiters: u32,
    pub dispatch: DispatchFlag,
}

enum Fit {
    Grant(u32),
    Blocked { by_ancestor: bool },
}

#[derive(Debug)]
pub struct ResQueueManager {
    queues: Vec<QueueTrack>,
    by_name: HashMap<String, QueueId>,
    users: UserDirectory,
    ratio_trackers: BTreeMap<u32, RatioTracker>,
    ratio_water_mark: u32,
    cluster_ratio: u32,
    configured_min_containers_per_seg: u32,
    min_containers_per_seg: u32,
    capacity_refresh_count: u64,
}

impl ResQueueManager {
    pub fn new(
        queues: &[QueueConfig],
        users: &[UserConfig],
        min_containers_per_seg: u32,
    ) -> Result<Self, QueueTreeError> {
        let (queues, by_name) = tree::build_tree(queues)?;
        let users = UserDirectory::build(users, &queues, &by_name)?;
        Ok(Self {
            queues,
            by_name,
            users,
            ratio_trackers: BTreeMap::new(),
            ratio_water_mark: 0,
            cluster_ratio: 0,
            configured_min_containers_per_seg: min_containers_per_seg,
            min_containers_per_seg: 0,
            capacity_refresh_count: 0,
        })
    }

    pub fn root(&self) -> QueueId {
        QueueId(0)
    }

    pub fn queue(&self, id: QueueId) -> &QueueTrack {
        &self.queues[id.0]
    }

    pub fn queue_by_name(&self, name: &str) -> Option<QueueId> {
        self.by_name.get(name).copied()
    }

    pub fn queues(&self) -> impl Iterator<Item = (QueueId, &QueueTrack)> {
        self.queues.iter().enumerate().map(|(i, q)| (QueueId(i), q))
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// True once a capacity refresh has given the root queue memory.
    pub fn root_capacity_known(&self) -> bool {
        self.queues[0].cluster_memory_mb > 0
    }

    pub fn capacity_refresh_count(&self) -> u64 {
        self.capacity_refresh_count
    }

    pub fn ratio_water_mark(&self) -> u32 {
        self.ratio_water_mark
    }

    pub fn min_containers_per_seg(&self) -> u32 {
        self.min_containers_per_seg
    }

    pub fn ratio_trackers(&self) -> impl Iterator<Item = &RatioTracker> {
        self.ratio_trackers.values()
    }

    pub fn attach_connection(&mut self, q: QueueId) {
        self.queues[q.0].num_connections += 1;
    }

    pub fn detach_connection(&mut self, q: QueueId) {
        let queue = &mut self.queues[q.0];
        queue.num_connections = queue.num_connections.saturating_sub(1);
    }

    /// Pure sizing decision for a request against queue `q`.
    pub fn size_request(
        &self,
        q: QueueId,
        shape: &RequestShape,
        avail_nodes: u32,
    ) -> Result<ResourceGrant, RmError> {
        sizing::size_request(&self.queues[q.0], shape, avail_nodes)
    }

    /// Resolve a user by oid and size a request without reserving anything.
    pub fn acquire_resource_quota(
        &self,
        user_oid: i64,
        shape: &RequestShape,
        avail_nodes: u32,
    ) -> Result<(String, ResourceGrant), RmError> {
        let (_, q) = self.users.by_oid(user_oid)?;
        let grant = self.size_request(q, shape, avail_nodes)?;
        Ok((self.queues[q.0].name.clone(), grant))
    }

    fn ancestors(&self, q: QueueId) -> impl Iterator<Item = &QueueTrack> {
        let queues = &self.queues;
        std::iter::successors(queues[q.0].parent, move |p| queues[p.0].parent)
            .map(move |p| &queues[p.0])
    }

    fn fit(&self, q: QueueId, req: &ResourceGrant) -> Fit {
        let queue = &self.queues[q.0];
        if queue.def.active_statements > 0 && queue.num_running >= queue.def.active_statements {
            return Fit::Blocked { by_ancestor: false };
        }
        let per = u64::from(req.seg_memory_mb.max(1));
        let want = u64::from(req.seg_num);
        let n_leaf = want.min(queue.free_memory_mb() / per);
        let n_anc = self
            .ancestors(q)
            .map(|a| a.free_memory_mb() / per)
            .fold(want, u64::min);
        let n = n_leaf.min(n_anc);
        let min = u64::from(req.seg_num_min.max(1));
        if n >= min {
            return Fit::Grant(n as u32);
        }
        Fit::Blocked {
            by_ancestor: n_leaf >= min && n_anc < min,
        }
    }

    fn charge(&mut self, q: QueueId, conn_id: ConnId, grant: ResourceGrant) {
        self.charge_usage(q, &grant);
        let queue = &mut self.queues[q.0];
        queue.holders.push(Holder { conn_id, grant });
        queue.num_running += 1;
    }

    fn charge_usage(&mut self, q: QueueId, grant: &ResourceGrant) {
        let mem = grant.total_memory_mb();
        let core = grant.total_core();
        let mut cur = Some(q);
        while let Some(id) = cur {
            let queue = &mut self.queues[id.0];
            queue.used_memory_mb += mem;
            queue.used_core += core;
            cur = queue.parent;
        }
    }

    fn uncharge_usage(&mut self, q: QueueId, grant: &ResourceGrant) {
        let mem = grant.total_memory_mb();
        let core = grant.total_core();
        let mut cur = Some(q);
        while let Some(id) = cur {
            let queue = &mut self.queues[id.0];
            queue.used_memory_mb = queue.used_memory_mb.saturating_sub(mem);
            queue.used_core = (queue.used_core - core).max(0.0);
            cur = queue.parent;
        }
    }

    /// Reserve `request` in queue `q` for `conn_id`, or append it to the
    /// queue's FIFO. A request never overtakes an earlier waiter.
    pub fn acquire(&mut self, q: QueueId, conn_id: ConnId, request: ResourceGrant) -> AllocOutcome {
        let queue = &self.queues[q.0];
        if queue.pause_allocation || !queue.waiters.is_empty() {
            self.queues[q.0].waiters.push_back(Waiter { conn_id, request });
            debug!(%conn_id, queue = %self.queues[q.0].name, "allocation queued behind waiters");
            return AllocOutcome::Waiting;
        }
        match self.fit(q, &request) {
            Fit::Grant(n) => {
                let grant = request.with_count(n);
                self.charge(q, conn_id, grant);
                debug!(%conn_id, queue = %self.queues[q.0].name, seg_num = n, "allocation granted");
                AllocOutcome::Granted(grant)
            }
            Fit::Blocked { by_ancestor } => {
                let queue = &mut self.queues[q.0];
                queue.troubled_by_fragment = by_ancestor;
                queue.waiters.push_back(Waiter { conn_id, request });
                debug!(%conn_id, queue = %queue.name, "allocation waiting for capacity");
                AllocOutcome::Waiting
            }
        }
    }

    /// Give back the allocation `conn_id` holds in `q`, returning what it
    /// held at release time. Call [`dispatch_waiters`] afterwards.
    ///
    /// [`dispatch_waiters`]: ResQueueManager::dispatch_waiters
    pub fn release(&mut self, q: QueueId, conn_id: ConnId) -> Option<ResourceGrant> {
        let queue = &mut self.queues[q.0];
        let at = queue.holders.iter().position(|h| h.conn_id == conn_id)?;
        let holder = queue.holders.remove(at);
        queue.num_running = queue.num_running.saturating_sub(1);
        self.uncharge_usage(q, &holder.grant);
        Some(holder.grant)
    }

    /// Drop a waiting request. Returns false if it was not queued.
    pub fn cancel(&mut self, q: QueueId, conn_id: ConnId) -> bool {
        let queue = &mut self.queues[q.0];
        let before = queue.waiters.len();
        queue.waiters.retain(|w| w.conn_id != conn_id);
        if queue.waiters.is_empty() {
            queue.troubled_by_fragment = false;
        }
        before != queue.waiters.len()
    }

    /// Promote waiters that now fit, strictly in arrival order per queue.
    pub fn dispatch_waiters(&mut self) -> Vec<Promotion> {
        let mut promoted = Vec::new();
        for i in 0..self.queues.len() {
            let q = QueueId(i);
            if self.queues[i].pause_allocation {
                continue;
            }
            while let Some(head) = self.queues[i].waiters.front().copied() {
                match self.fit(q, &head.request) {
                    Fit::Grant(n) => {
                        self.queues[i].waiters.pop_front();
                        let grant = head.request.with_count(n);
                        self.charge(q, head.conn_id, grant);
                        promoted.push(Promotion {
                            conn_id: head.conn_id,
                            queue: q,
                            grant,
                        });
                    }
                    Fit::Blocked { by_ancestor } => {
                        self.queues[i].troubled_by_fragment = by_ancestor;
                        break;
                    }
                }
            }
            if self.queues[i].waiters.is_empty() {
                self.queues[i].troubled_by_fragment = false;
            }
        }
        if !promoted.is_empty() {
            debug!(count = promoted.len(), "promoted waiting allocations");
        }
        promoted
    }

    /// Pause or resume allocation in every queue.
    pub fn set_allocation_paused(&mut self, paused: bool) {
        for q in &mut self.queues {
            q.pause_allocation = paused;
        }
    }

    /// The four-step capacity refresh: queue capacity, minimum containers
    /// per segment, ratio tracker limits, ratio water mark. Safe to repeat.
    ///
    /// Grants that no longer fit are shrunk in place; the returned list says
    /// which holders lost vsegs and what they keep.
    pub fn refresh_capacity(
        &mut self,
        cluster: &ClusterCapacity,
        seg_memories_mb: &[u32],
    ) -> Vec<Reclaim> {
        self.refresh_queue_capacity(cluster);
        let reclaimed = self.reclaim_over_limit();
        self.refresh_min_containers_per_seg(seg_memories_mb);
        self.refresh_ratio_limits();
        self.refresh_ratio_water_mark();
        self.capacity_refresh_count += 1;
        info!(
            memory_mb = cluster.memory_mb,
            core = cluster.core,
            nodes = cluster.nodes,
            water_mark = self.ratio_water_mark,
            reclaimed = reclaimed.len(),
            "refreshed resource queue capacity"
        );
        reclaimed
    }

    fn refresh_queue_capacity(&mut self, cluster: &ClusterCapacity) {
        self.cluster_ratio = memory_core_ratio(cluster.memory_mb as f64, cluster.core);
        let mb_per_core = if cluster.core > 0.0 {
            cluster.memory_mb as f64 / cluster.core
        } else {
            0.0
        };
        let root_memory = (cluster.memory_mb as f64 * self.queues[0].def.memory_limit_percent
            / 100.0)
            .floor() as u64;

        // Parents precede children, so one forward pass sees final parent values.
        for i in 0..self.queues.len() {
            let (parent_mem, parent_core) = match self.queues[i].parent {
                Some(p) => (
                    self.queues[p.0].cluster_memory_mb as f64,
                    self.queues[p.0].cluster_vcore,
                ),
                None => (cluster.memory_mb as f64, cluster.core),
            };
            let q = &mut self.queues[i];
            q.cluster_memory_mb = (parent_mem * q.def.memory_limit_percent / 100.0).floor() as u64;
            q.cluster_vcore = parent_core * q.def.core_limit_percent / 100.0;
            q.seg_quota_memory_mb = q.def.vseg_memory_mb;
            q.seg_quota_core = match q.def.vseg_core {
                Some(core) => core,
                None if mb_per_core > 0.0 => f64::from(q.seg_quota_memory_mb) / mb_per_core,
                None => 0.0,
            };
            let quota = u64::from(q.seg_quota_memory_mb.max(1));
            let number = q.cluster_memory_mb / quota;
            q.cluster_seg_number = u32::try_from(number).unwrap_or(u32::MAX);
            let overcommitted = (number as f64 * q.def.overcommit.max(1.0)).floor() as u64;
            q.cluster_seg_number_max =
                u32::try_from(overcommitted.min(root_memory / quota)).unwrap_or(u32::MAX);
        }
    }

    /// Memory by which `q` exceeds its limit, or with `ancestors` set, by
    /// which `q` or its tightest ancestor does.
    fn excess_memory_mb(&self, q: QueueId, ancestors: bool) -> u64 {
        let above = self.ancestors(q).take(if ancestors { usize::MAX } else { 0 });
        std::iter::once(&self.queues[q.0])
            .chain(above)
            .map(|t| t.used_memory_mb.saturating_sub(t.memory_limit_mb()))
            .max()
            .unwrap_or(0)
    }

    /// Take vsegs from the newest holders until every leaf and then every
    /// ancestor is back within its limit. Holders first give up whatever
    /// they got above their minimum; only then is the minimum itself cut.
    fn reclaim_over_limit(&mut self) -> Vec<Reclaim> {
        let mut reclaimed: Vec<Reclaim> = Vec::new();
        let passes = [(false, true), (false, false), (true, true), (true, false)];
        for (ancestors, keep_min) in passes {
            for i in 0..self.queues.len() {
                if !self.queues[i].is_leaf() {
                    continue;
                }
                let q = QueueId(i);
                for h in (0..self.queues[i].holders.len()).rev() {
                    let excess = self.excess_memory_mb(q, ancestors);
                    if excess == 0 {
                        break;
                    }
                    let holder = self.queues[i].holders[h];
                    let floor = if keep_min { holder.grant.seg_num_min } else { 0 };
                    let spare = holder.grant.seg_num.saturating_sub(floor);
                    if spare == 0 {
                        continue;
                    }
                    let per = u64::from(holder.grant.seg_memory_mb.max(1));
                    let cut = u32::try_from(excess.div_ceil(per))
                        .unwrap_or(u32::MAX)
                        .min(spare);
                    self.uncharge_usage(q, &holder.grant.with_count(cut));
                    let grant = holder.grant.with_count(holder.grant.seg_num - cut);
                    self.queues[i].holders[h].grant = grant;
                    warn!(
                        conn_id = %holder.conn_id,
                        queue = %self.queues[i].name,
                        from = holder.grant.seg_num,
                        to = grant.seg_num,
                        "reclaimed vsegs from a held grant"
                    );
                    match reclaimed.iter_mut().find(|r| r.conn_id == holder.conn_id) {
                        Some(r) => r.grant = grant,
                        None => reclaimed.push(Reclaim {
                            conn_id: holder.conn_id,
                            queue: q,
                            grant,
                        }),
                    }
                }
            }
        }
        reclaimed
    }

    fn refresh_min_containers_per_seg(&mut self, seg_memories_mb: &[u32]) {
        let smallest_quota = self
            .queues
            .iter()
            .filter(|q| q.is_leaf())
            .map(|q| q.seg_quota_memory_mb.max(1))
            .min()
            .unwrap_or(1);
        let per_seg = seg_memories_mb
            .iter()
            .map(|m| m / smallest_quota)
            .min()
            .unwrap_or(0);
        self.min_containers_per_seg = self.configured_min_containers_per_seg.min(per_seg);
    }

    fn refresh_ratio_limits(&mut self) {
        let mut trackers: BTreeMap<u32, RatioTracker> = BTreeMap::new();
        for (i, q) in self.queues.iter().enumerate() {
            if !q.is_leaf() {
                continue;
            }
            let ratio = match memory_core_ratio(f64::from(q.seg_quota_memory_mb), q.seg_quota_core)
            {
                0 => self.cluster_ratio,
                r => r,
            };
            let t = trackers
                .entry(ratio)
                .or_insert_with(|| RatioTracker::new(ratio));
            t.memory_limit_mb += q.memory_limit_mb();
            t.core_limit += f64::from(q.cluster_seg_number) * q.seg_quota_core;
            t.queues.push(QueueId(i));
        }
        self.ratio_trackers = trackers;
    }

    fn refresh_ratio_water_mark(&mut self) {
        for t in self.ratio_trackers.values_mut() {
            t.used_memory_mb = t.queues.iter().map(|q| self.queues[q.0].used_memory_mb).sum();
            t.used_core = t.queues.iter().map(|q| self.queues[q.0].used_core).sum();
        }
        self.ratio_water_mark = self
            .ratio_trackers
            .values()
            .filter(|t| t.used_memory_mb > 0)
            .max_by_key(|t| t.used_memory_mb)
            .map(|t| t.ratio)
            .unwrap_or(self.cluster_ratio);
    }

    /// Status rows for every queue.
    pub fn status(&self) -> Vec<QueueStatus> {
        self.queues
            .iter()
            .map(|q| QueueStatus {
                name: q.name.clone(),
                seg_memory_mb: q.seg_quota_memory_mb,
                seg_core: q.seg_quota_core,
                seg_num: q.cluster_seg_number,
                seg_num_max: q.cluster_seg_number_max,
                used_memory_mb: u32::try_from(q.used_memory_mb).unwrap_or(u32::MAX),
                used_core: q.used_core,
                holders: q.num_running,
                waiters: q.waiters.len() as u32,
                dispatch: if q.troubled_by_fragment {
                    DispatchFlag::Fragmented
                } else if q.pause_allocation {
                    DispatchFlag::Paused
                } else {
                    DispatchFlag::Running
                },
            })
            .collect()
    }
}
