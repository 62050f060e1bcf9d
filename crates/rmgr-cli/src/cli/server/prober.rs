//! Liveness probes: an `RUAlive` round trip to the segment's RPC port.

use anyhow::{Context, Result};
use rmgr_core::dispatch::Event;
use rmgr_core::error::ResultCode;
use rmgr_core::protocol::requests::WireBody;
use rmgr_core::protocol::responses::ResultResponse;
use rmgr_core::protocol::{Frame, MessageId};
use rmgr_core::respool::{Prober, SegStat, LOOPBACK_ADDR};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::ServerMsg;
use crate::cli::framing::{read_frame, write_frame};

pub struct TcpProber {
    tx: mpsc::UnboundedSender<ServerMsg>,
    port: u16,
    timeout: Duration,
    runtime: Handle,
}

impl TcpProber {
    /// Must be called from inside the tokio runtime the probes will run on.
    pub fn new(tx: mpsc::UnboundedSender<ServerMsg>, port: u16, timeout: Duration) -> Self {
        Self {
            tx,
            port,
            timeout,
            runtime: Handle::current(),
        }
    }
}

/// First non-loopback address, else whatever the segment reported first.
fn probe_target(segment: &SegStat, port: u16) -> Result<SocketAddr> {
    let addresses = &segment.info.addresses;
    let addr = addresses
        .iter()
        .find(|a| a.as_str() != LOOPBACK_ADDR)
        .or_else(|| addresses.first())
        .with_context(|| format!("segment {} has no address", segment.info.hostname))?;
    let ip: IpAddr = addr
        .parse()
        .with_context(|| format!("segment {} has bad address {addr}", segment.info.hostname))?;
    Ok(SocketAddr::new(ip, port))
}

impl Prober for TcpProber {
    fn dispatch_probe(&mut self, segment: &SegStat) -> Result<()> {
        let target = probe_target(segment, self.port)?;
        let hostname = segment.info.hostname.clone();
        let tx = self.tx.clone();
        let timeout = self.timeout;
        self.runtime.spawn(async move {
            let alive = match tokio::time::timeout(timeout, probe(target)).await {
                Ok(Ok(alive)) => alive,
                Ok(Err(e)) => {
                    tracing::info!(host = %hostname, %target, "probe failed: {:#}", e);
                    false
                }
                Err(_) => {
                    tracing::info!(host = %hostname, %target, "probe timed out");
                    false
                }
            };
            let _ = tx.send(ServerMsg::Event(Event::ProbeResult { hostname, alive }));
        });
        tracing::debug!(host = %segment.info.hostname, %target, "probe dispatched");
        Ok(())
    }
}

async fn probe(target: SocketAddr) -> Result<bool> {
    let mut stream = TcpStream::connect(target).await?;
    let request = Frame::new(MessageId::RequestRuAlive, 0, 0, Vec::new());
    write_frame(&mut stream, &request).await?;
    let Some(reply) = read_frame(&mut stream).await? else {
        return Ok(false);
    };
    if reply.message_id != MessageId::ResponseRuAlive {
        return Ok(false);
    }
    let result = ResultResponse::decode(&reply.body)?;
    Ok(result.result == ResultCode::Ok.as_u32())
}
