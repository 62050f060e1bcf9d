//! `rmgr queues` – show resource queue usage.

use anyhow::{bail, Result};
use rmgr_core::error::ResultCode;
use rmgr_core::protocol::requests::WireBody;
use rmgr_core::protocol::responses::ResQueueStatusResponse;
use rmgr_core::protocol::MessageId;

use crate::cli::rpc_client::RpcClient;

pub async fn run_queues(addr: &str) -> Result<()> {
    let mut client = RpcClient::connect(addr).await?;
    let reply = client
        .call(MessageId::RequestDumpResQueueStatus, Vec::new())
        .await?;
    let status = ResQueueStatusResponse::decode(&reply.body)?;
    if status.result != ResultCode::Ok.as_u32() {
        bail!("queue status failed with code {}", status.result);
    }
    println!(
        "{:<20} {:>8} {:>7} {:>6} {:>6} {:>10} {:>8} {:>7} {:>7} {}",
        "QUEUE", "VSEG_MB", "VSEG_C", "SEGS", "MAX", "USED_MB", "USED_C", "HOLD", "WAIT", "D"
    );
    for q in status.queues {
        println!(
            "{:<20} {:>8} {:>7.3} {:>6} {:>6} {:>10} {:>8.3} {:>7} {:>7} {}",
            q.name,
            q.seg_memory_mb,
            q.seg_core,
            q.seg_num,
            q.seg_num_max,
            q.used_memory_mb,
            q.used_core,
            q.holders,
            q.waiters,
            q.dispatch.as_byte() as char
        );
    }
    Ok(())
}
