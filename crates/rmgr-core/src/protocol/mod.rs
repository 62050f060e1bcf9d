//! Wire codec for the resource manager RPC.
//!
//! A frame is a fixed 8-byte head followed by a body padded to 64-bit
//! alignment. Bodies are built with [`MessageBuilder`] and read back with the
//! bounds-checked [`MessageReader`]; segment info travels in the
//! self-describing offset/length layout of [`seginfo`].

mod buffer;
mod frame;
mod message;
pub mod requests;
pub mod responses;
pub mod seginfo;

use thiserror::Error;

pub use buffer::{align64, MessageBuilder, MessageReader};
pub use frame::{Frame, FrameHead, FRAME_HEAD_SIZE, MAX_BODY_SIZE};
pub use message::MessageId;

/// Decoding failure for a frame or message body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("buffer truncated: need {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("offset {offset} with length {len} is outside a {size}-byte region")]
    BadOffset { offset: usize, len: usize, size: usize },

    #[error("string at offset {0} is not valid UTF-8")]
    BadUtf8(usize),

    #[error("string at offset {0} is not NUL-terminated")]
    Unterminated(usize),

    #[error("unknown message id {0}")]
    UnknownMessage(u16),

    #[error("frame body of {0} bytes exceeds the maximum")]
    Oversized(u32),

    #[error("{0}")]
    Invalid(String),
}
