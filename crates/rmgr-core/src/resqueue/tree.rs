//! Queue tree nodes and construction from config.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use super::{QueueId, ResourceGrant};
use crate::config::QueueConfig;
use crate::conntrack::ConnId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueTreeError {
    #[error("no root queue defined")]
    NoRoot,
    #[error("more than one root queue: {0} and {1}")]
    MultipleRoots(String, String),
    #[error("duplicate queue {0}")]
    Duplicate(String),
    #[error("queue {queue} names unknown parent {parent}")]
    UnknownParent { queue: String, parent: String },
    #[error("queue {0} is not reachable from the root")]
    Unreachable(String),
    #[error("user {user} is assigned to {queue}, which is not a leaf queue")]
    NotLeaf { user: String, queue: String },
    #[error("user {user} is assigned to unknown queue {queue}")]
    UnknownQueue { user: String, queue: String },
}

/// A queued allocation request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waiter {
    pub conn_id: ConnId,
    pub request: ResourceGrant,
}

/// An allocation currently charged to a queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Holder {
    pub conn_id: ConnId,
    pub grant: ResourceGrant,
}

/// Runtime state of one resource queue.
#[derive(Debug, Clone)]
pub struct QueueTrack {
    pub name: String,
    pub parent: Option<QueueId>,
    pub children: Vec<QueueId>,
    pub def: QueueConfig,

    pub cluster_memory_mb: u64,
    pub cluster_vcore: f64,
    pub seg_quota_memory_mb: u32,
    pub seg_quota_core: f64,
    pub cluster_seg_number: u32,
    pub cluster_seg_number_max: u32,

    pub used_memory_mb: u64,
    pub used_core: f64,
    pub num_running: u32,
    pub num_connections: u32,

    /// Granted allocations, oldest first.
    pub(crate) holders: Vec<Holder>,
    pub(crate) waiters: VecDeque<Waiter>,
    pub pause_allocation: bool,
    /// Set while the head waiter fits this queue's own limit but is held
    /// back by an ancestor's.
    pub troubled_by_fragment: bool,
}

impl QueueTrack {
    fn new(def: QueueConfig, parent: Option<QueueId>) -> Self {
        Self {
            name: def.name.clone(),
            parent,
            children: Vec::new(),
            seg_quota_memory_mb: def.vseg_memory_mb,
            seg_quota_core: def.vseg_core.unwrap_or(0.0),
            def,
            cluster_memory_mb: 0,
            cluster_vcore: 0.0,
            cluster_seg_number: 0,
            cluster_seg_number_max: 0,
            used_memory_mb: 0,
            used_core: 0.0,
            num_running: 0,
            num_connections: 0,
            holders: Vec::new(),
            waiters: VecDeque::new(),
            pause_allocation: false,
            troubled_by_fragment: false,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    pub fn waiters(&self) -> impl Iterator<Item = &Waiter> {
        self.waiters.iter()
    }

    pub fn holder(&self, conn_id: ConnId) -> Option<&Holder> {
        self.holders.iter().find(|h| h.conn_id == conn_id)
    }

    /// Memory this queue may hold in total.
    pub fn memory_limit_mb(&self) -> u64 {
        if self.is_leaf() {
            u64::from(self.cluster_seg_number) * u64::from(self.seg_quota_memory_mb)
        } else {
            self.cluster_memory_mb
        }
    }

    pub fn free_memory_mb(&self) -> u64 {
        self.memory_limit_mb().saturating_sub(self.used_memory_mb)
    }
}

/// Build the queue list with every parent ahead of its children.
pub(crate) fn build_tree(
    defs: &[QueueConfig],
) -> Result<(Vec<QueueTrack>, HashMap<String, QueueId>), QueueTreeError> {
    let mut root: Option<&QueueConfig> = None;
    let mut seen = HashMap::new();
    for def in defs {
        if seen.insert(def.name.as_str(), def).is_some() {
            return Err(QueueTreeError::Duplicate(def.name.clone()));
        }
        if def.parent.is_none() {
            if let Some(r) = root {
                return Err(QueueTreeError::MultipleRoots(
                    r.name.clone(),
                    def.name.clone(),
                ));
            }
            root = Some(def);
        }
    }
    for def in defs {
        if let Some(parent) = def.parent.as_deref() {
            if !seen.contains_key(parent) {
                return Err(QueueTreeError::UnknownParent {
                    queue: def.name.clone(),
                    parent: parent.to_string(),
                });
            }
        }
    }
    let root = root.ok_or(QueueTreeError::NoRoot)?;

    let mut queues = vec![QueueTrack::new(root.clone(), None)];
    let mut by_name = HashMap::from([(root.name.clone(), QueueId(0))]);
    let mut next = 0;
    while next < queues.len() {
        let parent_id = QueueId(next);
        let parent_name = queues[next].name.clone();
        for def in defs
            .iter()
            .filter(|d| d.parent.as_deref() == Some(parent_name.as_str()))
        {
            let id = QueueId(queues.len());
            queues.push(QueueTrack::new(def.clone(), Some(parent_id)));
            queues[next].children.push(id);
            by_name.insert(def.name.clone(), id);
        }
        next += 1;
    }

    if let Some(lost) = defs.iter().find(|d| !by_name.contains_key(&d.name)) {
        return Err(QueueTreeError::Unreachable(lost.name.clone()));
    }
    Ok((queues, by_name))
}
