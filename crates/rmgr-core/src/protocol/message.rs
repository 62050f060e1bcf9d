//! Message type ids. Every request kind has a distinct response id.

use super::WireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageId {
    RequestConnectionReg = 257,
    RequestConnectionRegByOid = 258,
    RequestConnectionUnreg = 259,
    RequestAcquireResource = 260,
    RequestReturnResource = 261,
    RequestAcquireResourceQuota = 262,
    RequestRefreshResource = 263,
    RequestSegmentIsDown = 264,
    RequestDumpStatus = 265,
    RequestDumpResQueueStatus = 266,
    RequestQuotaControl = 267,
    RequestDummy = 268,
    RequestImAlive = 513,
    RequestRuAlive = 514,

    ResponseConnectionReg = 2305,
    ResponseConnectionRegByOid = 2306,
    ResponseConnectionUnreg = 2307,
    ResponseAcquireResource = 2308,
    ResponseReturnResource = 2309,
    ResponseAcquireResourceQuota = 2310,
    ResponseRefreshResource = 2311,
    ResponseSegmentIsDown = 2312,
    ResponseDumpStatus = 2313,
    ResponseDumpResQueueStatus = 2314,
    ResponseQuotaControl = 2315,
    ResponseDummy = 2316,
    ResponseImAlive = 2561,
    ResponseRuAlive = 2562,
}

impl MessageId {
    const ALL: [MessageId; 28] = [
        MessageId::RequestConnectionReg,
        MessageId::RequestConnectionRegByOid,
        MessageId::RequestConnectionUnreg,
        MessageId::RequestAcquireResource,
        MessageId::RequestReturnResource,
        MessageId::RequestAcquireResourceQuota,
        MessageId::RequestRefreshResource,
        MessageId::RequestSegmentIsDown,
        MessageId::RequestDumpStatus,
        MessageId::RequestDumpResQueueStatus,
        MessageId::RequestQuotaControl,
        MessageId::RequestDummy,
        MessageId::RequestImAlive,
        MessageId::RequestRuAlive,
        MessageId::ResponseConnectionReg,
        MessageId::ResponseConnectionRegByOid,
        MessageId::ResponseConnectionUnreg,
        MessageId::ResponseAcquireResource,
        MessageId::ResponseReturnResource,
        MessageId::ResponseAcquireResourceQuota,
        MessageId::ResponseRefreshResource,
        MessageId::ResponseSegmentIsDown,
        MessageId::ResponseDumpStatus,
        MessageId::ResponseDumpResQueueStatus,
        MessageId::ResponseQuotaControl,
        MessageId::ResponseDummy,
        MessageId::ResponseImAlive,
        MessageId::ResponseRuAlive,
    ];

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Result<Self, WireError> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_u16() == v)
            .ok_or(WireError::UnknownMessage(v))
    }

    /// Response id paired with a request id.
    pub fn response(self) -> Option<MessageId> {
        let resp = match self {
            MessageId::RequestConnectionReg => MessageId::ResponseConnectionReg,
            MessageId::RequestConnectionRegByOid => MessageId::ResponseConnectionRegByOid,
            MessageId::RequestConnectionUnreg => MessageId::ResponseConnectionUnreg,
            MessageId::RequestAcquireResource => MessageId::ResponseAcquireResource,
            MessageId::RequestReturnResource => MessageId::ResponseReturnResource,
            MessageId::RequestAcquireResourceQuota => MessageId::ResponseAcquireResourceQuota,
            MessageId::RequestRefreshResource => MessageId::ResponseRefreshResource,
            MessageId::RequestSegmentIsDown => MessageId::ResponseSegmentIsDown,
            MessageId::RequestDumpStatus => MessageId::ResponseDumpStatus,
            MessageId::RequestDumpResQueueStatus => MessageId::ResponseDumpResQueueStatus,
            MessageId::RequestQuotaControl => MessageId::ResponseQuotaControl,
            MessageId::RequestDummy => MessageId::ResponseDummy,
            MessageId::RequestImAlive => MessageId::ResponseImAlive,
            MessageId::RequestRuAlive => MessageId::ResponseRuAlive,
            _ => return None,
        };
        Some(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn response_ids_are_distinct_per_request() {
        let responses: HashSet<u16> = MessageId::ALL
            .iter()
            .filter_map(|m| m.response())
            .map(|m| m.as_u16())
            .collect();
        assert_eq!(responses.len(), 14);
    }

    #[test]
    fn unknown_id_is_an_error() {
        assert_eq!(MessageId::from_u16(1), Err(WireError::UnknownMessage(1)));
        assert_eq!(
            MessageId::from_u16(260),
            Ok(MessageId::RequestAcquireResource)
        );
    }
}
