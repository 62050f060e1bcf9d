//! Session progress state machine.

use serde::Serialize;

/// Where a connection track is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Progress {
    Unregistered,
    RegisterDone,
    AllocWait,
    AllocDone,
    Established,
    TransformError,
}

impl Progress {
    /// Whether `self -> to` is a legal transition. Any state may fall into
    /// `TransformError`; nothing leaves it.
    pub fn can_transform(self, to: Progress) -> bool {
        use Progress::*;
        if to == TransformError {
            return self != TransformError;
        }
        matches!(
            (self, to),
            (Unregistered, RegisterDone)
                | (RegisterDone, AllocWait)
                | (RegisterDone, Established)
                | (AllocWait, AllocDone)
                | (AllocWait, RegisterDone)
                | (AllocDone, RegisterDone)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Progress::Unregistered => "UNREGISTERED",
            Progress::RegisterDone => "REGISTER_DONE",
            Progress::AllocWait => "RESOURCE_QUEUE_ALLOC_WAIT",
            Progress::AllocDone => "RESOURCE_QUEUE_ALLOC_DONE",
            Progress::Established => "ESTABLISHED",
            Progress::TransformError => "TRANSFORM_ERROR",
        }
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
