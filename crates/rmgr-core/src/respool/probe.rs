//! Liveness probe dispatch.

use anyhow::Result;

use super::SegStat;

/// Starts an asynchronous liveness probe for a segment. Implementations
/// must not block: the result comes back later as a probe-completion event.
/// An `Err` means the probe could not even be started.
pub trait Prober {
    fn dispatch_probe(&mut self, segment: &SegStat) -> Result<()>;
}
