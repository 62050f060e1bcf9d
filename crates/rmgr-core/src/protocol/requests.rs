//! Request bodies. Each type encodes to and decodes from a frame body.

use super::seginfo::{decode_seginfo, SegInfoBuilder};
use super::{MessageBuilder, MessageReader, WireError};
use crate::respool::{SegStat, StatusDesc};

/// A typed message body.
pub trait WireBody: Sized {
    fn encode(&self) -> Result<Vec<u8>, WireError>;
    fn decode(raw: &[u8]) -> Result<Self, WireError>;
}

/// Reads a count field and caps the allocation by what the buffer can hold.
fn bounded_capacity(count: u32, r: &MessageReader<'_>, min_item: usize) -> usize {
    (count as usize).min(r.remaining() / min_item.max(1))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub user: String,
}

impl WireBody for RegisterRequest {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut b = MessageBuilder::new();
        b.put_cstr(&self.user).pad64();
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        let user = r.cstr()?.to_string();
        Ok(Self { user })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterByOidRequest {
    pub oid: i64,
}

impl WireBody for RegisterByOidRequest {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut b = MessageBuilder::new();
        b.put_i64(self.oid);
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        Ok(Self { oid: r.i64()? })
    }
}

/// Body shared by unregister and return-resource: just the connection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnIdRequest {
    pub conn_id: i32,
}

impl WireBody for ConnIdRequest {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut b = MessageBuilder::new();
        b.put_i32(self.conn_id).put_u32(0);
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        Ok(Self { conn_id: r.i32()? })
    }
}

/// Host the session would like to run on, with the bytes it will scan there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferredHost {
    pub hostname: String,
    pub scan_size: i64,
}

/// Shape of a resource request as the session describes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestShape {
    pub slice_size: i32,
    pub io_bytes: i64,
    pub max_seg_count_fix: i32,
    pub min_seg_count_fix: i32,
    pub vseg_limit_per_seg: i32,
    pub vseg_limit: i32,
    /// Statement-level per-vseg memory override; only used with `stat_nvseg`.
    pub stat_vseg_memory_mb: i32,
    /// Statement-level vseg count override; zero means "use queue sizing".
    pub stat_nvseg: i32,
}

impl RequestShape {
    fn put(&self, b: &mut MessageBuilder) {
        b.put_i32(self.max_seg_count_fix)
            .put_i32(self.min_seg_count_fix)
            .put_i32(self.vseg_limit_per_seg)
            .put_i32(self.vseg_limit)
            .put_i32(self.stat_vseg_memory_mb)
            .put_i32(self.stat_nvseg);
    }

    fn read(r: &mut MessageReader<'_>, slice_size: i32, io_bytes: i64) -> Result<Self, WireError> {
        Ok(Self {
            slice_size,
            io_bytes,
            max_seg_count_fix: r.i32()?,
            min_seg_count_fix: r.i32()?,
            vseg_limit_per_seg: r.i32()?,
            vseg_limit: r.i32()?,
            stat_vseg_memory_mb: r.i32()?,
            stat_nvseg: r.i32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    pub session_id: i64,
    pub conn_id: i32,
    pub shape: RequestShape,
    pub preferred: Vec<PreferredHost>,
}

impl WireBody for AcquireRequest {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let node_count = i32::try_from(self.preferred.len())
            .map_err(|_| WireError::Invalid("too many preferred hosts".to_string()))?;
        let mut b = MessageBuilder::new();
        b.put_i64(self.session_id)
            .put_i32(self.conn_id)
            .put_i32(self.shape.slice_size)
            .put_i64(self.shape.io_bytes)
            .put_i32(node_count);
        self.shape.put(&mut b);
        b.put_u32(0);
        for host in &self.preferred {
            b.put_i64(host.scan_size);
        }
        for host in &self.preferred {
            b.put_cstr(&host.hostname);
        }
        b.pad64();
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        let session_id = r.i64()?;
        let conn_id = r.i32()?;
        let slice_size = r.i32()?;
        let io_bytes = r.i64()?;
        let node_count = r.i32()?;
        let shape = RequestShape::read(&mut r, slice_size, io_bytes)?;
        r.skip(4)?;

        let node_count = u32::try_from(node_count)
            .map_err(|_| WireError::Invalid(format!("negative node count {node_count}")))?;
        let mut sizes = Vec::with_capacity(bounded_capacity(node_count, &r, 8));
        for _ in 0..node_count {
            sizes.push(r.i64()?);
        }
        let mut preferred = Vec::with_capacity(sizes.len());
        for scan_size in sizes {
            let hostname = r.cstr()?.to_string();
            preferred.push(PreferredHost {
                hostname,
                scan_size,
            });
        }
        Ok(Self {
            session_id,
            conn_id,
            shape,
            preferred,
        })
    }
}

/// Sizing-only request, resolved against the user's queue without binding
/// segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireQuotaRequest {
    pub user_oid: i64,
    pub shape: RequestShape,
}

impl WireBody for AcquireQuotaRequest {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut b = MessageBuilder::new();
        b.put_i64(self.user_oid);
        self.shape.put(&mut b);
        b.put_u32(0);
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        let user_oid = r.i64()?;
        let shape = RequestShape::read(&mut r, 0, 0)?;
        Ok(Self { user_oid, shape })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub conn_ids: Vec<i32>,
}

impl WireBody for RefreshRequest {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut b = MessageBuilder::new();
        b.put_u32(self.conn_ids.len() as u32).put_u32(0);
        for id in &self.conn_ids {
            b.put_i32(*id);
        }
        b.pad64();
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        let count = r.u32()?;
        r.skip(4)?;
        let mut conn_ids = Vec::with_capacity(bounded_capacity(count, &r, 4));
        for _ in 0..count {
            conn_ids.push(r.i32()?);
        }
        Ok(Self { conn_ids })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentIsDownRequest {
    pub hosts: Vec<String>,
}

impl WireBody for SegmentIsDownRequest {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut b = MessageBuilder::new();
        b.put_u32(self.hosts.len() as u32).put_u32(0);
        for host in &self.hosts {
            b.put_cstr(host);
        }
        b.pad64();
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        let count = r.u32()?;
        r.skip(4)?;
        let mut hosts = Vec::with_capacity(bounded_capacity(count, &r, 2));
        for _ in 0..count {
            hosts.push(r.cstr()?.to_string());
        }
        Ok(Self { hosts })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpStatusRequest {
    pub dump_type: u32,
    pub path: String,
}

impl WireBody for DumpStatusRequest {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut b = MessageBuilder::new();
        b.put_u32(self.dump_type).put_u32(0).put_cstr(&self.path).pad64();
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        let dump_type = r.u32()?;
        r.skip(4)?;
        let path = r.cstr()?.to_string();
        Ok(Self { dump_type, path })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaControlRequest {
    pub phase: u32,
    pub pause: bool,
}

impl WireBody for QuotaControlRequest {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut b = MessageBuilder::new();
        b.put_u32(self.phase).put_bool(self.pause).pad64();
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        let phase = r.u32()?;
        let pause = r.bool()?;
        Ok(Self { phase, pause })
    }
}

/// Direct segment heartbeat.
///
/// Layout: a 16-byte head (tmp dir count, broken tmp dir count, reserved,
/// resource manager start timestamp), the 40-byte fixed part of the segment
/// status, then the segment info block.
#[derive(Debug, Clone, PartialEq)]
pub struct ImAliveRequest {
    pub tmp_dir_count: u16,
    pub broken_tmp_dir_count: u16,
    pub stat: SegStat,
}

impl WireBody for ImAliveRequest {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let s = &self.stat;
        let mut b = MessageBuilder::with_capacity(256);
        b.put_u16(self.tmp_dir_count)
            .put_u16(self.broken_tmp_dir_count)
            .put_u32(0)
            .put_i64(s.rm_start_timestamp);
        b.put_u32(s.failed_tmp_dir_num)
            .put_bool(s.fts_available)
            .put_bool(s.grm_handled)
            .put_u16(0)
            .put_u32(s.fts_total_memory_mb)
            .put_u32(s.fts_total_core)
            .put_u32(s.grm_total_memory_mb)
            .put_u32(s.grm_total_core)
            .put_u32(s.status_desc.0)
            .put_u32(0)
            .put_i64(s.rm_start_timestamp);
        b.put_bytes(&SegInfoBuilder::new(&s.info).finish()?);
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        let tmp_dir_count = r.u16()?;
        let broken_tmp_dir_count = r.u16()?;
        r.skip(4)?;
        let rm_start_timestamp = r.i64()?;

        let failed_tmp_dir_num = r.u32()?;
        let fts_available = r.bool()?;
        let grm_handled = r.bool()?;
        r.skip(2)?;
        let fts_total_memory_mb = r.u32()?;
        let fts_total_core = r.u32()?;
        let grm_total_memory_mb = r.u32()?;
        let grm_total_core = r.u32()?;
        let status_desc = StatusDesc(r.u32()?);
        r.skip(4)?;
        let _stat_timestamp = r.i64()?;

        let (info, _) = decode_seginfo(&raw[r.position()..])?;
        Ok(Self {
            tmp_dir_count,
            broken_tmp_dir_count,
            stat: SegStat {
                info,
                failed_tmp_dir_num,
                fts_available,
                grm_handled,
                fts_total_memory_mb,
                fts_total_core,
                grm_total_memory_mb,
                grm_total_core,
                status_desc,
                rm_start_timestamp,
            },
        })
    }
}
