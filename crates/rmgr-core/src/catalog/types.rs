//! Catalog record types.

use serde::Serialize;

/// Segment status as stored in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SegmentState {
    Up,
    Down,
}

impl SegmentState {
    pub fn as_str(self) -> &'static str {
        match self {
            SegmentState::Up => "u",
            SegmentState::Down => "d",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "u" => SegmentState::Up,
            _ => SegmentState::Down,
        }
    }
}

/// One status change to persist: a status row update plus a history row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentStatusUpdate {
    pub id: i32,
    pub hostname: String,
    pub state: SegmentState,
    pub description: String,
    pub at: i64,
}

/// Current status row for a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentStatusRow {
    pub id: i64,
    pub hostname: String,
    pub state: SegmentState,
    pub description: String,
    pub updated_at: i64,
}

/// Append-only history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentHistoryRow {
    pub seq: i64,
    pub id: i64,
    pub hostname: String,
    pub state: SegmentState,
    pub description: String,
    pub recorded_at: i64,
}
