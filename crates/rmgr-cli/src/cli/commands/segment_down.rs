//! `rmgr segment-down <host>...` – report hosts as unreachable.

use anyhow::Result;
use rmgr_core::protocol::requests::SegmentIsDownRequest;
use rmgr_core::protocol::MessageId;

use crate::cli::rpc_client::{expect_ok, RpcClient};

pub async fn run_segment_down(addr: &str, hosts: Vec<String>) -> Result<()> {
    let count = hosts.len();
    let mut client = RpcClient::connect(addr).await?;
    let reply = client
        .call_body(MessageId::RequestSegmentIsDown, &SegmentIsDownRequest { hosts })
        .await?;
    expect_ok(&reply)?;
    println!("Reported {count} host(s) down");
    Ok(())
}
