//! Plain-text status dumps written on request to a caller-chosen file.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use tracing::info;

use crate::context::RmContext;
use crate::error::RmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    ConnectionTracks = 1,
    QueueStatus = 2,
    PoolHosts = 3,
}

impl DumpKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(DumpKind::ConnectionTracks),
            2 => Some(DumpKind::QueueStatus),
            3 => Some(DumpKind::PoolHosts),
            _ => None,
        }
    }
}

pub fn dump_status(ctx: &RmContext, kind: DumpKind, path: &Path, now: Instant) -> Result<(), RmError> {
    let write = || -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        match kind {
            DumpKind::ConnectionTracks => write_tracks(ctx, &mut out, now)?,
            DumpKind::QueueStatus => write_queues(ctx, &mut out)?,
            DumpKind::PoolHosts => write_hosts(ctx, &mut out, now)?,
        }
        out.flush()
    };
    write().map_err(|e| RmError::DumpFailed(format!("{}: {}", path.display(), e)))?;
    info!(?kind, path = %path.display(), "status dumped");
    Ok(())
}

pub fn write_tracks(ctx: &RmContext, out: &mut impl Write, now: Instant) -> io::Result<()> {
    let conns = ctx.conns();
    writeln!(
        out,
        "Number of tracked resource contexts: {} (ids in use {} of {})",
        conns.len(),
        conns.in_use(),
        conns.capacity()
    )?;
    for t in conns.iter() {
        let queue = t
            .queue
            .map(|q| ctx.queues().queue(q).name.as_str())
            .unwrap_or("");
        writeln!(
            out,
            "CONN(id={} user={} queue={} progress={} client={} idle_ms={} sent={})",
            t.conn_id,
            t.user_id,
            queue,
            t.progress(),
            t.client.0,
            now.saturating_duration_since(t.last_act_time).as_millis(),
            t.response_sent
        )?;
        writeln!(
            out,
            "  REQ(session={} slices={} io_bytes={} preferred={} maxfix={} minfix={} \
             vseg_per_seg={} vseg_limit={} stat_mem={} stat_nvseg={})",
            t.session_id,
            t.shape.slice_size,
            t.shape.io_bytes,
            t.preferred.len(),
            t.shape.max_seg_count_fix,
            t.shape.min_seg_count_fix,
            t.shape.vseg_limit_per_seg,
            t.shape.vseg_limit,
            t.shape.stat_vseg_memory_mb,
            t.shape.stat_nvseg
        )?;
        if let Some(g) = t.grant.or(t.requested) {
            writeln!(
                out,
                "  ALLOC(granted={} mem_mb={} core={:.3} num={} min={})",
                t.grant.is_some(),
                g.seg_memory_mb,
                g.seg_core,
                g.seg_num,
                g.seg_num_min
            )?;
        }
    }
    Ok(())
}

pub fn write_queues(ctx: &RmContext, out: &mut impl Write) -> io::Result<()> {
    let queues = ctx.queues();
    writeln!(
        out,
        "Capacity refreshes: {} ratio water mark: {} min containers per segment: {}",
        queues.capacity_refresh_count(),
        queues.ratio_water_mark(),
        queues.min_containers_per_seg()
    )?;
    for s in queues.status() {
        writeln!(
            out,
            "QUEUE(name={} seg_mem_mb={} seg_core={:.3} seg_num={} seg_num_max={} \
             used_mem_mb={} used_core={:.3} holders={} waiters={} dispatch={})",
            s.name,
            s.seg_memory_mb,
            s.seg_core,
            s.seg_num,
            s.seg_num_max,
            s.used_memory_mb,
            s.used_core,
            s.holders,
            s.waiters,
            s.dispatch.as_byte() as char
        )?;
    }
    for t in queues.ratio_trackers() {
        writeln!(
            out,
            "RATIO(ratio={} mem_limit_mb={} core_limit={:.3} used_mem_mb={} used_core={:.3})",
            t.ratio, t.memory_limit_mb, t.core_limit, t.used_memory_mb, t.used_core
        )?;
    }
    Ok(())
}

pub fn write_hosts(ctx: &RmContext, out: &mut impl Write, now: Instant) -> io::Result<()> {
    let pool = ctx.pool();
    writeln!(
        out,
        "Hosts available {} of {} (reports received {})",
        pool.avail_node_count(),
        pool.slaves_host_count(),
        pool.cluster_report_counter()
    )?;
    let members: Vec<&str> = pool.membership_hosts().collect();
    writeln!(out, "Membership hosts {} ({})", members.len(), members.join(","))?;
    for seg in pool.hosts() {
        let s = &seg.stat;
        writeln!(
            out,
            "HOST(id={} hostname={} addresses={} port={} availability={:?} departed={} \
             silent_ms={})",
            s.info.id,
            s.info.hostname,
            s.info.addresses.join(","),
            s.info.port,
            seg.availability,
            seg.departed,
            now.saturating_duration_since(seg.last_seen).as_millis()
        )?;
        writeln!(
            out,
            "  CAPACITY(fts_mem_mb={} fts_core={} grm_mem_mb={} grm_core={} grm_handled={} \
             failed_tmp_dirs={} status={})",
            s.fts_total_memory_mb,
            s.fts_total_core,
            s.grm_total_memory_mb,
            s.grm_total_core,
            s.grm_handled,
            s.failed_tmp_dir_num,
            s.status_desc.describe()
        )?;
    }
    Ok(())
}
