//! `rmgr pause|resume <phase>` – toggle the quota control pause flags.

use anyhow::Result;
use rmgr_core::context::QuotaPhase;
use rmgr_core::protocol::requests::QuotaControlRequest;
use rmgr_core::protocol::MessageId;

use crate::cli::rpc_client::{expect_ok, RpcClient};

pub async fn run_quota_control(addr: &str, phase: QuotaPhase, pause: bool) -> Result<()> {
    let request = QuotaControlRequest {
        phase: phase as u32,
        pause,
    };
    let mut client = RpcClient::connect(addr).await?;
    let reply = client
        .call_body(MessageId::RequestQuotaControl, &request)
        .await?;
    expect_ok(&reply)?;
    let verb = if pause { "Paused" } else { "Resumed" };
    println!("{verb} {phase:?}");
    Ok(())
}
