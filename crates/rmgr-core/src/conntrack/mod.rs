//! Connection track registry: the bounded pool of connection ids and the
//! tracks currently holding them.

mod progress;
mod track;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::RmError;

pub use progress::Progress;
pub use track::{ClientId, ConnectionTrack};

/// Small integer handle for a registered session. Reused after release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnId(pub i32);

impl ConnId {
    pub const INVALID: ConnId = ConnId(-1);

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry of tracked sessions keyed by connection id.
#[derive(Debug)]
pub struct ConnTrackRegistry {
    capacity: usize,
    free: BTreeSet<i32>,
    tracks: BTreeMap<ConnId, ConnectionTrack>,
}

impl ConnTrackRegistry {
    pub fn new(capacity: usize) -> Self {
        let top = i32::try_from(capacity).unwrap_or(i32::MAX);
        Self {
            capacity,
            free: (0..top).collect(),
            tracks: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_ids(&self) -> usize {
        self.free.len()
    }

    /// Ids handed out and not yet released.
    pub fn in_use(&self) -> usize {
        self.capacity - self.free.len()
    }

    /// Lowest free id.
    pub fn allocate_id(&mut self) -> Result<ConnId, RmError> {
        let id = self.free.pop_first().ok_or(RmError::ConnIdFull)?;
        Ok(ConnId(id))
    }

    pub fn release_id(&mut self, id: ConnId) {
        if id.is_valid() && (id.0 as usize) < self.capacity {
            self.free.insert(id.0);
        }
    }

    /// Track a registered session under its id.
    pub fn insert(&mut self, track: ConnectionTrack) {
        self.tracks.insert(track.conn_id, track);
    }

    pub fn get(&self, id: ConnId) -> Option<&ConnectionTrack> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut ConnectionTrack> {
        self.tracks.get_mut(&id)
    }

    /// Detach a track so an operation can own it; reinsert with [`insert`].
    ///
    /// [`insert`]: ConnTrackRegistry::insert
    pub fn take(&mut self, id: ConnId) -> Result<ConnectionTrack, RmError> {
        self.tracks.remove(&id).ok_or(RmError::NoConnId(id))
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.tracks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionTrack> {
        self.tracks.values()
    }

    pub fn ids(&self) -> Vec<ConnId> {
        self.tracks.keys().copied().collect()
    }
}
