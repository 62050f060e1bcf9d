//! User to leaf-queue lookup.

use std::collections::HashMap;

use super::tree::{QueueTrack, QueueTreeError};
use super::QueueId;
use crate::config::UserConfig;
use crate::error::RmError;

#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    by_name: HashMap<String, QueueId>,
    by_oid: HashMap<i64, String>,
}

impl UserDirectory {
    pub(crate) fn build(
        users: &[UserConfig],
        queues: &[QueueTrack],
        by_name: &HashMap<String, QueueId>,
    ) -> Result<Self, QueueTreeError> {
        let mut dir = Self::default();
        for u in users {
            let queue = *by_name
                .get(&u.queue)
                .ok_or_else(|| QueueTreeError::UnknownQueue {
                    user: u.name.clone(),
                    queue: u.queue.clone(),
                })?;
            if !queues[queue.0].is_leaf() {
                return Err(QueueTreeError::NotLeaf {
                    user: u.name.clone(),
                    queue: u.queue.clone(),
                });
            }
            dir.by_name.insert(u.name.clone(), queue);
            dir.by_oid.insert(u.oid, u.name.clone());
        }
        Ok(dir)
    }

    pub fn queue_of(&self, user: &str) -> Result<QueueId, RmError> {
        self.by_name
            .get(user)
            .copied()
            .ok_or_else(|| RmError::NoUserId(user.to_string()))
    }

    /// Resolve a user oid to the user's name and queue.
    pub fn by_oid(&self, oid: i64) -> Result<(&str, QueueId), RmError> {
        let name = self
            .by_oid
            .get(&oid)
            .ok_or_else(|| RmError::NoUserId(oid.to_string()))?;
        let queue = self.queue_of(name)?;
        Ok((name.as_str(), queue))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
