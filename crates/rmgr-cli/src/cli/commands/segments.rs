//! `rmgr segments` and `rmgr history <host>` – read the segment catalog.

use anyhow::{Context, Result};
use rmgr_core::catalog::CatalogDb;
use rmgr_core::config::{self, RmConfig};

async fn open_catalog(cfg: &RmConfig) -> Result<CatalogDb> {
    let path = match &cfg.catalog_path {
        Some(p) => p.clone(),
        None => config::default_catalog_path()?,
    };
    CatalogDb::open_at(&path)
        .await
        .with_context(|| format!("opening segment catalog {}", path.display()))
}

pub async fn run_segments(cfg: &RmConfig) -> Result<()> {
    let db = open_catalog(cfg).await?;
    let rows = db.list_segment_status().await?;
    if rows.is_empty() {
        println!("No segments in catalog.");
        return Ok(());
    }
    println!("{:<6} {:<24} {:<6} {:<12} {}", "ID", "HOST", "STATE", "UPDATED", "DESCRIPTION");
    for r in rows {
        println!(
            "{:<6} {:<24} {:<6} {:<12} {}",
            r.id,
            r.hostname,
            r.state.as_str(),
            r.updated_at,
            r.description
        );
    }
    Ok(())
}

pub async fn run_history(cfg: &RmConfig, host: &str) -> Result<()> {
    let db = open_catalog(cfg).await?;
    let rows = db.list_segment_history(host).await?;
    if rows.is_empty() {
        println!("No history for {host}.");
        return Ok(());
    }
    println!("{:<8} {:<6} {:<12} {}", "SEQ", "STATE", "RECORDED", "DESCRIPTION");
    for r in rows {
        println!(
            "{:<8} {:<6} {:<12} {}",
            r.seq,
            r.state.as_str(),
            r.recorded_at,
            r.description
        );
    }
    Ok(())
}
