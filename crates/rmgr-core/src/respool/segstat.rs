//! Canonical per-host segment record, shared by both heartbeat paths.

use serde::{Deserialize, Serialize};

/// Sentinel id meaning "let the resource pool assign one".
pub const SEGSTAT_ID_INVALID: i32 = -1;

pub const LOOPBACK_ADDR: &str = "127.0.0.1";

/// Which capacity view a segment contributes to the cluster total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacitySource {
    /// Capacity reported by the segment's own heartbeat.
    #[default]
    Fts,
    /// Capacity reported by the global resource manager.
    Grm,
}

/// Segment status bitmask. Zero means healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct StatusDesc(pub u32);

impl StatusDesc {
    pub const FAILED_PROBING: u32 = 0x0001;
    pub const HEARTBEAT_TIMEOUT: u32 = 0x0002;
    pub const FAILED_TMPDIR: u32 = 0x0004;
    pub const DEPARTED: u32 = 0x0008;

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn insert(&mut self, bit: u32) {
        self.0 |= bit;
    }

    pub fn is_healthy(self) -> bool {
        self.0 == 0
    }

    /// Human-readable description used for catalog rows.
    pub fn describe(self) -> String {
        let mut parts = Vec::new();
        if self.contains(Self::FAILED_PROBING) {
            parts.push("failed probing segment");
        }
        if self.contains(Self::HEARTBEAT_TIMEOUT) {
            parts.push("heartbeat timeout");
        }
        if self.contains(Self::FAILED_TMPDIR) {
            parts.push("failed temporary directory");
        }
        if self.contains(Self::DEPARTED) {
            parts.push("left cluster membership");
        }
        parts.join(";")
    }
}

/// Identity and addressing of one segment host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SegInfo {
    pub id: i32,
    pub port: u16,
    pub hostname: String,
    /// Ordered address list; the first entry is the preferred one.
    pub addresses: Vec<String>,
    pub master: bool,
    pub standby: bool,
    pub alive: bool,
    pub grm_hostname: Option<String>,
    pub grm_rackname: Option<String>,
    pub failed_tmp_dirs: Option<String>,
}

/// Segment status: identity plus the capacity it reports.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SegStat {
    pub info: SegInfo,
    pub failed_tmp_dir_num: u32,
    pub fts_available: bool,
    pub grm_handled: bool,
    pub fts_total_memory_mb: u32,
    pub fts_total_core: u32,
    pub grm_total_memory_mb: u32,
    pub grm_total_core: u32,
    pub status_desc: StatusDesc,
    pub rm_start_timestamp: i64,
}

impl SegStat {
    pub fn hostname(&self) -> &str {
        &self.info.hostname
    }

    /// Put the externally reachable address first: when the list starts with
    /// the loopback address and has more entries, swap the first two. A lone
    /// loopback address is left as is.
    pub fn normalize_addresses(&mut self) {
        let addrs = &mut self.info.addresses;
        if addrs.len() > 1 && addrs[0] == LOOPBACK_ADDR {
            addrs.swap(0, 1);
        }
    }

    /// (memory MB, cores) contributed under the given view.
    pub fn capacity(&self, source: CapacitySource) -> (u32, u32) {
        match source {
            CapacitySource::Fts => (self.fts_total_memory_mb, self.fts_total_core),
            CapacitySource::Grm if self.grm_handled => {
                (self.grm_total_memory_mb, self.grm_total_core)
            }
            CapacitySource::Grm => (0, 0),
        }
    }

    /// True when a field that feeds queue capacity differs.
    pub fn capacity_differs(&self, other: &SegStat) -> bool {
        self.fts_available != other.fts_available
            || self.grm_handled != other.grm_handled
            || self.fts_total_memory_mb != other.fts_total_memory_mb
            || self.fts_total_core != other.fts_total_core
            || self.grm_total_memory_mb != other.grm_total_memory_mb
            || self.grm_total_core != other.grm_total_core
            || self.failed_tmp_dir_num != other.failed_tmp_dir_num
    }
}
