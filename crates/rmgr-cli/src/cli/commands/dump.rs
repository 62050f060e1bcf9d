//! `rmgr dump <kind> <path>` – ask the server to write a status dump.

use anyhow::{Context, Result};
use rmgr_core::dump::DumpKind;
use rmgr_core::protocol::requests::DumpStatusRequest;
use rmgr_core::protocol::MessageId;
use std::path::Path;

use crate::cli::rpc_client::{expect_ok, RpcClient};

pub async fn run_dump(addr: &str, kind: DumpKind, path: &Path) -> Result<()> {
    // The server writes the file, so hand it an absolute path.
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let path_str = path
        .to_str()
        .with_context(|| format!("dump path {} is not UTF-8", path.display()))?;
    let request = DumpStatusRequest {
        dump_type: kind as u32,
        path: path_str.to_string(),
    };
    let mut client = RpcClient::connect(addr).await?;
    let reply = client
        .call_body(MessageId::RequestDumpStatus, &request)
        .await?;
    expect_ok(&reply)?;
    println!("Wrote {:?} dump to {}", kind, path.display());
    Ok(())
}
