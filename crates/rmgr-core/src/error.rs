//! Status codes and domain errors.
//!
//! Every failure that can reach a client is an [`RmError`]; the numeric
//! [`ResultCode`] is what travels back in a response head.

use thiserror::Error;

use crate::conntrack::{ConnId, Progress};
use crate::protocol::WireError;

/// Numeric status carried in every response. `Ok` is the success sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ResultCode {
    Ok = 0,
    ConnTrackConnIdFull = 1001,
    ConnTrackNoConnId = 1002,
    RequestHandlerWrongConnStat = 1101,
    RequestHandlerDumpFailed = 1102,
    ResourcePoolTooManyUnavailableHost = 1201,
    ResourcePoolBadHeartbeat = 1202,
    ResQueMgrNoUserId = 1301,
    ResQueMgrTooManyFixedSegNum = 1302,
    WireMalformed = 1401,
}

impl ResultCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        let code = match v {
            0 => ResultCode::Ok,
            1001 => ResultCode::ConnTrackConnIdFull,
            1002 => ResultCode::ConnTrackNoConnId,
            1101 => ResultCode::RequestHandlerWrongConnStat,
            1102 => ResultCode::RequestHandlerDumpFailed,
            1201 => ResultCode::ResourcePoolTooManyUnavailableHost,
            1202 => ResultCode::ResourcePoolBadHeartbeat,
            1301 => ResultCode::ResQueMgrNoUserId,
            1302 => ResultCode::ResQueMgrTooManyFixedSegNum,
            1401 => ResultCode::WireMalformed,
            _ => return None,
        };
        Some(code)
    }
}

/// Errors returned by resource manager operations. None of them is fatal to
/// the process; each is answered to the client as a failed response.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RmError {
    #[error("cannot accept more resource context instance")]
    ConnIdFull,

    #[error("the resource context {0} is invalid or timed out")]
    NoConnId(ConnId),

    #[error("the resource context status {0:?} is invalid for this request")]
    WrongConnStat(Progress),

    #[error(
        "{unavailable} of {expected} segments {} unavailable, exceeds {:.1}% limit. \
         The allocation request is rejected.",
        plural_verb(.unavailable),
        as_percent(.limit)
    )]
    TooManyUnavailableHosts {
        unavailable: usize,
        expected: usize,
        limit: f64,
    },

    #[error("user {0} does not exist or is not assigned to a leaf queue")]
    NoUserId(String),

    #[error("queue {queue} cannot run {requested} virtual segments, its limit is {limit}")]
    TooManyFixedSegNum {
        queue: String,
        requested: u32,
        limit: u32,
    },

    #[error("cannot dump status: {0}")]
    DumpFailed(String),

    #[error("segment heartbeat dropped: {0}")]
    MalformedHeartbeat(String),

    #[error("malformed request: {0}")]
    Wire(#[from] WireError),
}

fn plural_verb(n: &usize) -> &'static str {
    if *n == 1 {
        "is"
    } else {
        "are"
    }
}

fn as_percent(fraction: &f64) -> f64 {
    fraction * 100.0
}

impl RmError {
    pub fn code(&self) -> ResultCode {
        match self {
            RmError::ConnIdFull => ResultCode::ConnTrackConnIdFull,
            RmError::NoConnId(_) => ResultCode::ConnTrackNoConnId,
            RmError::WrongConnStat(_) => ResultCode::RequestHandlerWrongConnStat,
            RmError::TooManyUnavailableHosts { .. } => {
                ResultCode::ResourcePoolTooManyUnavailableHost
            }
            RmError::NoUserId(_) => ResultCode::ResQueMgrNoUserId,
            RmError::TooManyFixedSegNum { .. } => ResultCode::ResQueMgrTooManyFixedSegNum,
            RmError::DumpFailed(_) => ResultCode::RequestHandlerDumpFailed,
            RmError::MalformedHeartbeat(_) => ResultCode::ResourcePoolBadHeartbeat,
            RmError::Wire(_) => ResultCode::WireMalformed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip_through_u32() {
        for code in [
            ResultCode::Ok,
            ResultCode::ConnTrackConnIdFull,
            ResultCode::ConnTrackNoConnId,
            ResultCode::RequestHandlerWrongConnStat,
            ResultCode::ResourcePoolTooManyUnavailableHost,
            ResultCode::ResQueMgrNoUserId,
        ] {
            assert_eq!(ResultCode::from_u32(code.as_u32()), Some(code));
        }
        assert_eq!(ResultCode::from_u32(77), None);
    }

    #[test]
    fn unavailable_host_message_uses_singular_verb() {
        let one = RmError::TooManyUnavailableHosts {
            unavailable: 1,
            expected: 2,
            limit: 0.25,
        };
        assert!(one.to_string().contains("1 of 2 segments is unavailable"));
        assert!(one.to_string().contains("25.0%"));

        let many = RmError::TooManyUnavailableHosts {
            unavailable: 4,
            expected: 10,
            limit: 0.3,
        };
        assert!(many.to_string().contains("are unavailable"));
        assert_eq!(many.code(), ResultCode::ResourcePoolTooManyUnavailableHost);
    }
}
