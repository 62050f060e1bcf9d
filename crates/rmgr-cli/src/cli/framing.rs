//! Frame I/O over async byte streams, shared by the server and the client commands.

use anyhow::{Context, Result};
use rmgr_core::protocol::{Frame, FrameHead, MessageId, FRAME_HEAD_SIZE};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one frame. `Ok(None)` when the peer closed the stream between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut head_raw = [0u8; FRAME_HEAD_SIZE];
    match reader.read_exact(&mut head_raw).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("reading frame head"),
    }
    let head = FrameHead::decode(&head_raw)?;
    let message_id = MessageId::from_u16(head.message_id)?;
    let mut body = vec![0u8; head.body_len as usize];
    reader
        .read_exact(&mut body)
        .await
        .with_context(|| format!("reading {}-byte body of {:?}", head.body_len, message_id))?;
    Ok(Some(Frame {
        message_id,
        mark1: head.mark1,
        mark2: head.mark2,
        body,
    }))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}
