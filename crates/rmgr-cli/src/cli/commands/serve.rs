//! `rmgr serve` – run the resource manager.

use anyhow::{Context, Result};
use rmgr_core::catalog::{run_catalog_writer, CatalogDb, ChannelCatalog};
use rmgr_core::config::{self, RmConfig};
use rmgr_core::context::RmContext;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::cli::control_socket;
use crate::cli::server::{run_dispatcher, spawn_rpc_listener, ServerMsg, TcpProber};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run_serve(cfg: RmConfig, listen: Option<String>) -> Result<()> {
    let listen_addr = listen.unwrap_or_else(|| cfg.listen_addr.clone());
    let (tx, rx) = mpsc::unbounded_channel::<ServerMsg>();

    let prober = TcpProber::new(tx.clone(), cfg.segment_port, PROBE_TIMEOUT);
    let mut ctx = RmContext::new(cfg.clone(), Instant::now())?.with_prober(prober);

    let mut catalog_writer = None;
    if cfg.catalog_updates {
        let path = match &cfg.catalog_path {
            Some(p) => p.clone(),
            None => config::default_catalog_path()?,
        };
        let db = CatalogDb::open_at(&path)
            .await
            .with_context(|| format!("opening segment catalog {}", path.display()))?;
        let (cat_tx, cat_rx) = mpsc::unbounded_channel();
        catalog_writer = Some(tokio::spawn(run_catalog_writer(db, cat_rx)));
        ctx = ctx.with_catalog(ChannelCatalog::new(cat_tx));
        tracing::info!(path = %path.display(), "segment catalog open");
    } else {
        tracing::info!("catalog updates disabled");
    }

    let (local, rpc) = spawn_rpc_listener(&listen_addr, tx.clone()).await?;
    let socket_path = match &cfg.control_socket {
        Some(p) => p.clone(),
        None => config::default_control_socket_path()?,
    };
    let control = control_socket::spawn_control_listener(tx.clone(), &socket_path)?;
    tracing::debug!(path = %socket_path.display(), "control socket listening");
    drop(tx);

    let tick = Duration::from_millis(cfg.tick_interval_ms.max(1));
    let mut dispatcher = tokio::spawn(run_dispatcher(ctx, rx, tick));
    println!("rmgr serving on {local}");

    tokio::select! {
        res = &mut dispatcher => {
            if let Err(e) = res {
                tracing::warn!("dispatcher task failed: {}", e);
            }
        }
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for shutdown signal")?;
            tracing::info!("shutdown requested");
            dispatcher.abort();
            let _ = dispatcher.await;
        }
    }

    rpc.abort();
    control.abort();
    let _ = std::fs::remove_file(&socket_path);
    // The context is gone, so the catalog channel is closed; let the writer drain.
    if let Some(writer) = catalog_writer {
        let _ = writer.await;
    }
    tracing::info!("rmgr stopped");
    Ok(())
}
