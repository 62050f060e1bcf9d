//! `rmgr member <key> [value]` – inject a membership store change into a running server.

use anyhow::Result;
use rmgr_core::config::{self, RmConfig};

use crate::cli::control_socket;

pub async fn run_member(cfg: &RmConfig, key: &str, value: Option<&str>) -> Result<()> {
    let socket_path = match &cfg.control_socket {
        Some(p) => p.clone(),
        None => config::default_control_socket_path()?,
    };
    control_socket::send_membership(&socket_path, key, value).await?;
    match value {
        Some(_) => println!("Sent report for {key}"),
        None => println!("Sent departure for {key}"),
    }
    Ok(())
}
