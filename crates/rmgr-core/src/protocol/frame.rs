//! Frame head and framed message.

use super::{align64, MessageId, WireError};

pub const FRAME_HEAD_SIZE: usize = 8;

/// Upper bound on a single frame body.
pub const MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;

/// Fixed-size frame head: message id, two correlation marks echoed from
/// request to response, and the body length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHead {
    pub message_id: u16,
    pub mark1: u8,
    pub mark2: u8,
    pub body_len: u32,
}

impl FrameHead {
    pub fn encode(&self) -> [u8; FRAME_HEAD_SIZE] {
        let mut out = [0u8; FRAME_HEAD_SIZE];
        out[0..2].copy_from_slice(&self.message_id.to_le_bytes());
        out[2] = self.mark1;
        out[3] = self.mark2;
        out[4..8].copy_from_slice(&self.body_len.to_le_bytes());
        out
    }

    pub fn decode(raw: &[u8; FRAME_HEAD_SIZE]) -> Result<Self, WireError> {
        let head = Self {
            message_id: u16::from_le_bytes([raw[0], raw[1]]),
            mark1: raw[2],
            mark2: raw[3],
            body_len: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        };
        if head.body_len > MAX_BODY_SIZE {
            return Err(WireError::Oversized(head.body_len));
        }
        Ok(head)
    }
}

/// A complete message: id, marks and an owned body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_id: MessageId,
    pub mark1: u8,
    pub mark2: u8,
    pub body: Vec<u8>,
}

impl Frame {
    /// Build a frame, padding the body to 64-bit alignment.
    pub fn new(message_id: MessageId, mark1: u8, mark2: u8, mut body: Vec<u8>) -> Self {
        body.resize(align64(body.len()), 0);
        Self {
            message_id,
            mark1,
            mark2,
            body,
        }
    }

    /// Response frame echoing the request's marks.
    pub fn reply_to(request: &Frame, message_id: MessageId, body: Vec<u8>) -> Self {
        Self::new(message_id, request.mark1, request.mark2, body)
    }

    pub fn head(&self) -> FrameHead {
        FrameHead {
            message_id: self.message_id.as_u16(),
            mark1: self.mark1,
            mark2: self.mark2,
            body_len: self.body.len() as u32,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEAD_SIZE + self.body.len());
        out.extend_from_slice(&self.head().encode());
        out.extend_from_slice(&self.body);
        out
    }

    /// Decode one frame from a contiguous buffer holding head and body.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < FRAME_HEAD_SIZE {
            return Err(WireError::Truncated {
                offset: 0,
                needed: FRAME_HEAD_SIZE,
                available: raw.len(),
            });
        }
        let mut head_raw = [0u8; FRAME_HEAD_SIZE];
        head_raw.copy_from_slice(&raw[..FRAME_HEAD_SIZE]);
        let head = FrameHead::decode(&head_raw)?;
        let body = &raw[FRAME_HEAD_SIZE..];
        if body.len() < head.body_len as usize {
            return Err(WireError::Truncated {
                offset: FRAME_HEAD_SIZE,
                needed: head.body_len as usize,
                available: body.len(),
            });
        }
        Ok(Self {
            message_id: MessageId::from_u16(head.message_id)?,
            mark1: head.mark1,
            mark2: head.mark2,
            body: body[..head.body_len as usize].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_is_padded_and_marks_survive() {
        let f = Frame::new(MessageId::RequestDummy, 3, 9, vec![1, 2, 3]);
        assert_eq!(f.body.len(), 8);
        let decoded = Frame::decode(&f.encode()).unwrap();
        assert_eq!(decoded, f);
    }

    #[test]
    fn reply_echoes_marks() {
        let req = Frame::new(MessageId::RequestDummy, 5, 6, Vec::new());
        let resp = Frame::reply_to(&req, MessageId::ResponseDummy, vec![0; 8]);
        assert_eq!((resp.mark1, resp.mark2), (5, 6));
    }

    #[test]
    fn oversized_head_is_rejected() {
        let head = FrameHead {
            message_id: 268,
            mark1: 0,
            mark2: 0,
            body_len: MAX_BODY_SIZE + 1,
        };
        assert_eq!(
            FrameHead::decode(&head.encode()),
            Err(WireError::Oversized(MAX_BODY_SIZE + 1))
        );
    }
}
