//! TTL-cached node totals for the stats endpoint.
//!
//! The cache is a lifecycle-scoped component injected through application
//! state, never a process-wide singleton.

use crate::services::metadata_store::{MetadataStore, StoreTotals};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct StatsCache {
    ttl: Duration,
    cached: Arc<RwLock<Option<(Instant, StoreTotals)>>>,
}

impl StatsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Serve cached totals while they are fresh, recomputing after the TTL.
    pub async fn totals(&self, meta: &MetadataStore) -> Result<StoreTotals, sqlx::Error> {
        if let Some((at, totals)) = *self.cached.read().await {
            if at.elapsed() < self.ttl {
                return Ok(totals);
            }
        }
        let fresh = meta.totals().await?;
        *self.cached.write().await = Some((Instant::now(), fresh));
        Ok(fresh)
    }
}
