//! `rmgr ping` – round-trip a no-op request.

use anyhow::Result;
use rmgr_core::protocol::MessageId;
use std::time::Instant;

use crate::cli::rpc_client::{expect_ok, RpcClient};

pub async fn run_ping(addr: &str) -> Result<()> {
    let started = Instant::now();
    let mut client = RpcClient::connect(addr).await?;
    let reply = client.call(MessageId::RequestDummy, Vec::new()).await?;
    expect_ok(&reply)?;
    println!("{addr} answered in {:.1} ms", started.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}
