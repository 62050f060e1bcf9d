//! Memory/core ratio trackers.
//!
//! Leaf queues are grouped by the MB-per-core ratio of their vseg quota.
//! Each group's limit is the sum of its queues' cluster share; the water
//! mark is the ratio of the group currently holding the most memory.

use serde::Serialize;

use super::QueueId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatioTracker {
    pub ratio: u32,
    pub memory_limit_mb: u64,
    pub core_limit: f64,
    pub used_memory_mb: u64,
    pub used_core: f64,
    #[serde(skip)]
    pub queues: Vec<QueueId>,
}

impl RatioTracker {
    pub(crate) fn new(ratio: u32) -> Self {
        Self {
            ratio,
            memory_limit_mb: 0,
            core_limit: 0.0,
            used_memory_mb: 0,
            used_core: 0.0,
            queues: Vec::new(),
        }
    }
}

/// MB per core, rounded. Zero cores yields zero.
pub fn memory_core_ratio(memory_mb: f64, core: f64) -> u32 {
    if core <= 0.0 {
        return 0;
    }
    (memory_mb / core).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_rounds_and_tolerates_zero_cores() {
        assert_eq!(memory_core_ratio(256.0, 0.125), 2048);
        assert_eq!(memory_core_ratio(1000.0, 3.0), 333);
        assert_eq!(memory_core_ratio(1000.0, 0.0), 0);
    }
}
