//! Response bodies.
//!
//! Every response starts with a `u32` result code. A failed response carries
//! the error text after the fixed head, NUL-terminated and padded to 64 bits.

use super::requests::WireBody;
use super::{MessageBuilder, MessageReader, WireError};
use crate::error::{ResultCode, RmError};
use crate::resqueue::{DispatchFlag, QueueStatus, ResourceGrant};

/// Width of the fixed queue-name field in queue responses.
pub const QUEUE_NAME_WIDTH: usize = 64;

fn put_error(b: &mut MessageBuilder, error: &Option<String>) {
    if let Some(msg) = error {
        b.put_cstr(msg).pad64();
    }
}

fn read_error(r: &mut MessageReader<'_>, result: u32) -> Result<Option<String>, WireError> {
    if result == ResultCode::Ok.as_u32() || r.remaining() == 0 {
        return Ok(None);
    }
    Ok(Some(r.cstr()?.to_string()))
}

fn put_grant(b: &mut MessageBuilder, g: &ResourceGrant) {
    b.put_f64(g.seg_core)
        .put_u32(g.seg_memory_mb)
        .put_u32(g.seg_num)
        .put_u32(g.seg_num_min)
        .put_u32(0);
}

fn read_grant(r: &mut MessageReader<'_>) -> Result<ResourceGrant, WireError> {
    let seg_core = r.f64()?;
    let seg_memory_mb = r.u32()?;
    let seg_num = r.u32()?;
    let seg_num_min = r.u32()?;
    r.skip(4)?;
    Ok(ResourceGrant {
        seg_memory_mb,
        seg_core,
        seg_num,
        seg_num_min,
    })
}

/// The common `{result, reserved}` response, used by every request whose
/// success carries no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultResponse {
    pub result: u32,
    pub error: Option<String>,
}

impl ResultResponse {
    pub fn ok() -> Self {
        Self {
            result: ResultCode::Ok.as_u32(),
            error: None,
        }
    }

    pub fn failed(err: &RmError) -> Self {
        Self {
            result: err.code().as_u32(),
            error: Some(err.to_string()),
        }
    }

    pub fn code(&self) -> Option<ResultCode> {
        ResultCode::from_u32(self.result)
    }
}

impl WireBody for ResultResponse {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut b = MessageBuilder::new();
        b.put_u32(self.result).put_u32(0);
        put_error(&mut b, &self.error);
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        let result = r.u32()?;
        r.skip(4)?;
        let error = read_error(&mut r, result)?;
        Ok(Self { result, error })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    pub result: u32,
    pub conn_id: i32,
    pub error: Option<String>,
}

impl RegisterResponse {
    pub fn failed(err: &RmError) -> Self {
        Self {
            result: err.code().as_u32(),
            conn_id: -1,
            error: Some(err.to_string()),
        }
    }
}

impl WireBody for RegisterResponse {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut b = MessageBuilder::new();
        b.put_u32(self.result).put_i32(self.conn_id);
        put_error(&mut b, &self.error);
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        let result = r.u32()?;
        let conn_id = r.i32()?;
        let error = read_error(&mut r, result)?;
        Ok(Self {
            result,
            conn_id,
            error,
        })
    }
}

/// Allocation result. The grant is present only on success.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquireResponse {
    pub result: u32,
    pub grant: Option<ResourceGrant>,
    pub error: Option<String>,
}

impl AcquireResponse {
    pub fn granted(grant: ResourceGrant) -> Self {
        Self {
            result: ResultCode::Ok.as_u32(),
            grant: Some(grant),
            error: None,
        }
    }

    pub fn failed(err: &RmError) -> Self {
        Self {
            result: err.code().as_u32(),
            grant: None,
            error: Some(err.to_string()),
        }
    }
}

impl WireBody for AcquireResponse {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut b = MessageBuilder::new();
        b.put_u32(self.result).put_u32(0);
        match &self.grant {
            Some(g) => {
                put_grant(&mut b, g);
            }
            None => put_error(&mut b, &self.error),
        }
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        let result = r.u32()?;
        r.skip(4)?;
        if result == ResultCode::Ok.as_u32() {
            let grant = read_grant(&mut r)?;
            return Ok(Self::granted(grant));
        }
        let error = read_error(&mut r, result)?;
        Ok(Self {
            result,
            grant: None,
            error,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcquireQuotaResponse {
    pub result: u32,
    pub queue: String,
    pub grant: Option<ResourceGrant>,
    pub error: Option<String>,
}

impl WireBody for AcquireQuotaResponse {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut b = MessageBuilder::new();
        b.put_u32(self.result)
            .put_u32(0)
            .put_fixed_str(&self.queue, QUEUE_NAME_WIDTH);
        match &self.grant {
            Some(g) => {
                put_grant(&mut b, g);
            }
            None => put_error(&mut b, &self.error),
        }
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        let result = r.u32()?;
        r.skip(4)?;
        let queue = r.fixed_str(QUEUE_NAME_WIDTH)?.to_string();
        let (grant, error) = if result == ResultCode::Ok.as_u32() {
            (Some(read_grant(&mut r)?), None)
        } else {
            (None, read_error(&mut r, result)?)
        };
        Ok(Self {
            result,
            queue,
            grant,
            error,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResQueueStatusResponse {
    pub result: u32,
    pub queues: Vec<QueueStatus>,
}

impl WireBody for ResQueueStatusResponse {
    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut b = MessageBuilder::with_capacity(8 + self.queues.len() * 112);
        b.put_u32(self.result).put_u32(self.queues.len() as u32);
        for q in &self.queues {
            b.put_fixed_str(&q.name, QUEUE_NAME_WIDTH)
                .put_u32(q.seg_memory_mb)
                .put_u32(q.seg_num)
                .put_f64(q.seg_core)
                .put_u32(q.seg_num_max)
                .put_u32(q.used_memory_mb)
                .put_f64(q.used_core)
                .put_u32(q.holders)
                .put_u32(q.waiters)
                .put_u8(q.dispatch.as_byte())
                .pad64();
        }
        Ok(b.into_vec())
    }

    fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let mut r = MessageReader::new(raw);
        let result = r.u32()?;
        let count = r.u32()? as usize;
        let mut queues = Vec::with_capacity(count.min(r.remaining() / 112));
        for _ in 0..count {
            let name = r.fixed_str(QUEUE_NAME_WIDTH)?.to_string();
            let seg_memory_mb = r.u32()?;
            let seg_num = r.u32()?;
            let seg_core = r.f64()?;
            let seg_num_max = r.u32()?;
            let used_memory_mb = r.u32()?;
            let used_core = r.f64()?;
            let holders = r.u32()?;
            let waiters = r.u32()?;
            let flag = r.u8()?;
            let dispatch = DispatchFlag::from_byte(flag)
                .ok_or_else(|| WireError::Invalid(format!("bad dispatch flag {flag:#x}")))?;
            r.align64();
            queues.push(QueueStatus {
                name,
                seg_memory_mb,
                seg_core,
                seg_num,
                seg_num_max,
                used_memory_mb,
                used_core,
                holders,
                waiters,
                dispatch,
            });
        }
        Ok(Self { result, queues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_result_appends_padded_error_text() {
        let resp = ResultResponse::failed(&RmError::ConnIdFull);
        let raw = resp.encode().unwrap();
        assert_eq!(raw.len() % 8, 0);
        assert_eq!(
            &raw[0..4],
            &ResultCode::ConnTrackConnIdFull.as_u32().to_le_bytes()
        );
        let back = ResultResponse::decode(&raw).unwrap();
        assert_eq!(back.code(), Some(ResultCode::ConnTrackConnIdFull));
        assert_eq!(
            back.error.as_deref(),
            Some("cannot accept more resource context instance")
        );
    }

    #[test]
    fn ok_result_has_no_error_text() {
        let raw = ResultResponse::ok().encode().unwrap();
        assert_eq!(raw.len(), 8);
        assert_eq!(ResultResponse::decode(&raw).unwrap().error, None);
    }

    #[test]
    fn acquire_grant_decodes() {
        let grant = ResourceGrant {
            seg_memory_mb: 256,
            seg_core: 0.125,
            seg_num: 6,
            seg_num_min: 2,
        };
        let raw = AcquireResponse::granted(grant).encode().unwrap();
        let back = AcquireResponse::decode(&raw).unwrap();
        assert_eq!(back.grant, Some(grant));
    }

    #[test]
    fn queue_status_rows_keep_dispatch_flag() {
        let resp = ResQueueStatusResponse {
            result: 0,
            queues: vec![QueueStatus {
                name: "pg_default".into(),
                seg_memory_mb: 256,
                seg_core: 0.125,
                seg_num: 40,
                seg_num_max: 80,
                used_memory_mb: 512,
                used_core: 0.25,
                holders: 1,
                waiters: 3,
                dispatch: DispatchFlag::Paused,
            }],
        };
        let raw = resp.encode().unwrap();
        assert_eq!(ResQueueStatusResponse::decode(&raw).unwrap(), resp);
    }
}
