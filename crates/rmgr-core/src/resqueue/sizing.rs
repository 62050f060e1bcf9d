//! Turn a session's request shape into a vseg count and per-vseg quota.

use super::tree::QueueTrack;
use super::ResourceGrant;
use crate::error::RmError;
use crate::protocol::requests::RequestShape;

fn positive(v: i32) -> Option<u32> {
    u32::try_from(v).ok().filter(|v| *v > 0)
}

/// Size a request against queue `q`.
///
/// A statement-level vseg count takes precedence and fixes both the count
/// and the minimum. Otherwise the queue's vseg number is capped by the
/// request's fixed maximum, its total vseg limit and its per-segment limit
/// times the available host count.
pub(crate) fn size_request(
    q: &QueueTrack,
    shape: &RequestShape,
    avail_nodes: u32,
) -> Result<ResourceGrant, RmError> {
    if let Some(nvseg) = positive(shape.stat_nvseg) {
        let mem = positive(shape.stat_vseg_memory_mb).unwrap_or(q.seg_quota_memory_mb);
        let fits = q.memory_limit_mb() / u64::from(mem.max(1));
        if u64::from(nvseg) > fits {
            return Err(RmError::TooManyFixedSegNum {
                queue: q.name.clone(),
                requested: nvseg,
                limit: u32::try_from(fits).unwrap_or(u32::MAX),
            });
        }
        return Ok(ResourceGrant {
            seg_memory_mb: mem,
            seg_core: q.seg_quota_core,
            seg_num: nvseg,
            seg_num_min: nvseg,
        });
    }

    let limit = q.cluster_seg_number;
    let per_host = positive(shape.vseg_limit_per_seg).map(|p| p.saturating_mul(avail_nodes));
    let max = [
        positive(shape.max_seg_count_fix),
        positive(shape.vseg_limit),
        per_host.filter(|v| *v > 0),
    ]
    .into_iter()
    .flatten()
    .fold(limit, u32::min);

    let min = positive(shape.min_seg_count_fix).unwrap_or(1);
    if min > limit {
        return Err(RmError::TooManyFixedSegNum {
            queue: q.name.clone(),
            requested: min,
            limit,
        });
    }

    Ok(ResourceGrant {
        seg_memory_mb: q.seg_quota_memory_mb,
        seg_core: q.seg_quota_core,
        seg_num: max.max(1),
        seg_num_min: min.min(max).max(1),
    })
}
