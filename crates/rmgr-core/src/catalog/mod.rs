//! Segment status catalog.
//!
//! The resource manager reports segment up/down transitions through the
//! [`SegmentCatalog`] trait. The event loop never waits on storage: the
//! channel implementation hands updates to [`run_catalog_writer`], which
//! persists them into a [`CatalogDb`].

mod db;
mod rows;
mod types;

pub use db::{unix_timestamp, CatalogDb};
pub use types::{SegmentHistoryRow, SegmentState, SegmentStatusRow, SegmentStatusUpdate};

use tokio::sync::mpsc;

/// Sink for segment status transitions.
pub trait SegmentCatalog {
    fn segment_status_changed(&mut self, update: SegmentStatusUpdate);
}

/// Drops every update. Used when catalog updates are disabled.
#[derive(Debug, Default)]
pub struct NullCatalog;

impl SegmentCatalog for NullCatalog {
    fn segment_status_changed(&mut self, update: SegmentStatusUpdate) {
        tracing::trace!(host = %update.hostname, "catalog updates disabled");
    }
}

/// Forwards updates to a writer task.
pub struct ChannelCatalog {
    tx: mpsc::UnboundedSender<SegmentStatusUpdate>,
}

impl ChannelCatalog {
    pub fn new(tx: mpsc::UnboundedSender<SegmentStatusUpdate>) -> Self {
        Self { tx }
    }
}

impl SegmentCatalog for ChannelCatalog {
    fn segment_status_changed(&mut self, update: SegmentStatusUpdate) {
        if let Err(e) = self.tx.send(update) {
            tracing::warn!(host = %e.0.hostname, "catalog writer gone, dropping status update");
        }
    }
}

/// Persist updates until the sender side closes. Storage errors are logged
/// and the writer keeps going.
pub async fn run_catalog_writer(db: CatalogDb, mut rx: mpsc::UnboundedReceiver<SegmentStatusUpdate>) {
    while let Some(update) = rx.recv().await {
        match db.record(&update).await {
            Ok(()) => tracing::debug!(
                host = %update.hostname,
                status = update.state.as_str(),
                "segment status recorded"
            ),
            Err(e) => tracing::error!(host = %update.hostname, "failed to record segment status: {:#}", e),
        }
    }
    tracing::debug!("catalog writer stopped");
}
