//! Minimal request/response client used by the admin commands.

use anyhow::{bail, Context, Result};
use rmgr_core::error::ResultCode;
use rmgr_core::protocol::requests::WireBody;
use rmgr_core::protocol::responses::ResultResponse;
use rmgr_core::protocol::{Frame, MessageId};
use std::time::Duration;
use tokio::net::TcpStream;

use super::framing::{read_frame, write_frame};

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RpcClient {
    stream: TcpStream,
    next_mark: u8,
}

impl RpcClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connecting to resource manager at {addr}"))?;
        Ok(Self {
            stream,
            next_mark: 1,
        })
    }

    /// Send one request and wait for the frame answering it.
    pub async fn call(&mut self, id: MessageId, body: Vec<u8>) -> Result<Frame> {
        let expected = id
            .response()
            .with_context(|| format!("{id:?} is not a request"))?;
        let mark = self.next_mark;
        self.next_mark = self.next_mark.wrapping_add(1);
        write_frame(&mut self.stream, &Frame::new(id, mark, 0, body)).await?;

        tokio::time::timeout(CALL_TIMEOUT, self.read_reply(expected, mark))
            .await
            .with_context(|| format!("no answer to {id:?} within {}s", CALL_TIMEOUT.as_secs()))?
    }

    async fn read_reply(&mut self, expected: MessageId, mark: u8) -> Result<Frame> {
        loop {
            let Some(frame) = read_frame(&mut self.stream).await? else {
                bail!("connection closed before {expected:?} arrived");
            };
            if frame.message_id == expected && frame.mark1 == mark {
                return Ok(frame);
            }
            tracing::debug!(message = ?frame.message_id, "skipping unrelated frame");
        }
    }

    pub async fn call_body<B: WireBody>(&mut self, id: MessageId, body: &B) -> Result<Frame> {
        let raw = body.encode()?;
        self.call(id, raw).await
    }
}

/// Decode a plain result response and turn a failure code into an error.
pub fn expect_ok(frame: &Frame) -> Result<()> {
    let resp = ResultResponse::decode(&frame.body)?;
    if resp.result == ResultCode::Ok.as_u32() {
        return Ok(());
    }
    bail!(
        "request failed with code {}: {}",
        resp.result,
        resp.error.as_deref().unwrap_or("no detail")
    )
}

/// Address to dial for a listen address; wildcard binds are reached on loopback.
pub fn client_addr(listen_addr: &str) -> String {
    match listen_addr.rsplit_once(':') {
        Some(("0.0.0.0", port)) => format!("127.0.0.1:{port}"),
        Some(("[::]", port)) => format!("[::1]:{port}"),
        _ => listen_addr.to_string(),
    }
}
