//! Periodic full rebuilds.
//!
//! Rebuilds are maintenance work: the scheduler runs them off the request
//! path on a fixed interval, one cycle at a time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::service::IndexService;

/// Outcome counts of one rebuild cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub succeeded: usize,
    pub failed: usize,
}

pub struct RebuildScheduler {
    service: Arc<IndexService>,
    period: Duration,
}

impl RebuildScheduler {
    pub fn new(service: Arc<IndexService>, period: Duration) -> Self {
        Self { service, period }
    }

    /// Rebuilds every kind once on the blocking pool.
    pub async fn run_once(&self) -> CycleSummary {
        let service = Arc::clone(&self.service);
        match tokio::task::spawn_blocking(move || service.rebuild_all()).await {
            Ok(results) => {
                let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                let summary = CycleSummary {
                    succeeded: results.len() - failed,
                    failed,
                };
                info!(
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "scheduled rebuild finished"
                );
                summary
            }
            Err(e) => {
                error!("scheduled rebuild panicked: {e}");
                CycleSummary {
                    succeeded: 0,
                    failed: crate::types::Kind::ALL.len(),
                }
            }
        }
    }

    /// Rebuilds immediately, then every period, until `shutdown` resolves.
    ///
    /// A cycle in progress when `shutdown` fires is abandoned by the loop
    /// but finishes on the blocking pool. Returns the number of completed
    /// cycles.
    pub async fn run_until<F>(self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            "Starting rebuild scheduler with {} second interval",
            self.period.as_secs()
        );

        let mut cycles = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(cycles, "rebuild scheduler stopped");
                    return cycles;
                }
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = &mut shutdown => {
                            info!(cycles, "rebuild scheduler stopped during a cycle");
                            return cycles;
                        }
                        _ = self.run_once() => cycles += 1,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCache;
    use crate::config::Settings;
    use crate::corpus::StaticCorpus;
    use crate::store::{ArtifactStore, MemoryArtifactStore, StoreOp};
    use crate::types::Kind;
    use crate::vector::{HashEmbeddingGenerator, VectorDimension};
    use tempfile::TempDir;

    fn scheduler(dir: &TempDir, store: Arc<MemoryArtifactStore>, period: Duration) -> RebuildScheduler {
        let cache = Arc::new(LocalCache::new(dir.path().join("cache"), store, None).unwrap());
        let embedder = Arc::new(HashEmbeddingGenerator::new(VectorDimension::new(8).unwrap()));
        let corpus = StaticCorpus::new().with(Kind::Company, ["Walmart"]);
        let service = IndexService::new(cache, embedder, Arc::new(corpus), &Settings::default());
        RebuildScheduler::new(Arc::new(service), period)
    }

    #[tokio::test]
    async fn test_run_once_counts_failures() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        store.inject_failure(StoreOp::Upload, Some("address"));
        let scheduler = scheduler(&dir, store.clone(), Duration::from_secs(60));

        let summary = scheduler.run_once().await;
        assert_eq!(summary, CycleSummary { succeeded: 2, failed: 1 });
        assert!(store.latest_version("company").unwrap().is_some());
        assert!(store.latest_version("address").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_until_repeats_and_stops() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        let scheduler = scheduler(&dir, store.clone(), Duration::from_millis(20));

        let cycles = scheduler
            .run_until(tokio::time::sleep(Duration::from_millis(150)))
            .await;
        assert!(cycles >= 2, "only {cycles} cycles ran");
        assert!(store.versions("company").len() >= 2);
    }
}
