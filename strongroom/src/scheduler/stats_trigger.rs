//! Periodic repository stats refresh.
//!
//! Re-queries repository metadata for all repositories and republishes the
//! derived state to the stats publisher. The interval lives in a watch
//! channel: changing it takes effect without a restart, and 0 parks the
//! loop until a non-zero interval arrives.

use crate::engine::JobEngine;
use crate::notify::StatsPublisher;
use crate::repo::RepositoryRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Stats refresh trigger loop.
pub struct StatsRefreshTrigger {
    registry: Arc<dyn RepositoryRegistry>,
    engine: Arc<JobEngine>,
    publisher: Arc<dyn StatsPublisher>,
    interval_rx: watch::Receiver<u64>,
}

impl StatsRefreshTrigger {
    /// Creates the trigger. `interval_rx` carries the interval in seconds;
    /// 0 disables the loop until it changes.
    pub fn new(
        registry: Arc<dyn RepositoryRegistry>,
        engine: Arc<JobEngine>,
        publisher: Arc<dyn StatsPublisher>,
        interval_rx: watch::Receiver<u64>,
    ) -> Self {
        Self {
            registry,
            engine,
            publisher,
            interval_rx,
        }
    }

    /// Runs until shutdown.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            interval_secs = *self.interval_rx.borrow(),
            "Stats refresh trigger starting"
        );

        loop {
            let interval_secs = *self.interval_rx.borrow();

            if interval_secs == 0 {
                // Disabled: park until the interval changes or shutdown.
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    changed = self.interval_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                // An interval change takes effect immediately.
                changed = self.interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {
                    self.refresh_all().await;
                }
            }
        }
        info!("Stats refresh trigger shutting down");
    }

    /// Queries and republishes stats for every repository.
    ///
    /// Failures are per-repository: one broken repository never aborts the
    /// batch.
    pub(crate) async fn refresh_all(&self) {
        for repository in self.registry.all() {
            match self.engine.query_repository_stats(&repository.name).await {
                Ok(stats) => {
                    debug!(repository = %repository.name, "Stats refreshed");
                    self.publisher.publish(&repository.name, stats);
                }
                Err(e) => {
                    warn!(
                        repository = %repository.name,
                        error = %e,
                        "Stats refresh failed for repository"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notify::{NullNotifier, RepositoryStats};
    use crate::repo::{Repository, StaticRegistry};
    use crate::secrets::StaticSecretStore;
    use crate::store::MemoryStore;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, RepositoryStats)>>,
    }

    impl StatsPublisher for RecordingPublisher {
        fn publish(&self, repository: &str, stats: RepositoryStats) {
            self.published
                .lock()
                .push((repository.to_string(), stats));
        }
    }

    fn engine(repositories: Vec<Repository>, dir: &TempDir) -> Arc<JobEngine> {
        let config = Config {
            logs: crate::config::LogSettings {
                directory: dir.path().to_path_buf(),
                save_policy: crate::config::SavePolicy::FailedOnly,
                buffer_lines: 50,
                max_age_days: None,
                max_total_size: None,
            },
            tool: crate::config::ToolSettings {
                binary: "/nonexistent/backup-tool".into(),
                lock_wait_secs: 1,
            },
            retry: crate::config::RetrySettings {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
            },
            ..Default::default()
        };
        Arc::new(JobEngine::new(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(StaticRegistry::new(repositories)),
            Arc::new(StaticSecretStore::new()),
            Arc::new(NullNotifier),
        ))
    }

    #[tokio::test]
    async fn per_repository_failures_do_not_abort_the_batch() {
        let dir = TempDir::new().unwrap();
        // The tool binary does not exist, so every query fails; the pass
        // must still visit both repositories and return.
        let engine = engine(
            vec![
                Repository::new("alpha", "/srv/alpha"),
                Repository::new("beta", "/srv/beta"),
            ],
            &dir,
        );
        let registry: Arc<dyn RepositoryRegistry> = Arc::new(StaticRegistry::new(vec![
            Repository::new("alpha", "/srv/alpha"),
            Repository::new("beta", "/srv/beta"),
        ]));
        let publisher = Arc::new(RecordingPublisher::default());
        let (_tx, rx) = watch::channel(60);

        let trigger = StatsRefreshTrigger::new(
            registry,
            engine,
            Arc::clone(&publisher) as Arc<dyn StatsPublisher>,
            rx,
        );
        trigger.refresh_all().await;
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn zero_interval_parks_until_changed() {
        let dir = TempDir::new().unwrap();
        let engine = engine(vec![], &dir);
        let registry: Arc<dyn RepositoryRegistry> = Arc::new(StaticRegistry::new(vec![]));
        let publisher = Arc::new(RecordingPublisher::default());
        let (tx, rx) = watch::channel(0);

        let trigger = StatsRefreshTrigger::new(
            registry,
            engine,
            Arc::clone(&publisher) as Arc<dyn StatsPublisher>,
            rx,
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(trigger.run(shutdown.clone()));

        // Parked: nothing happens.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        // Interval change is picked up without a restart; with no
        // repositories a pass is a no-op, but the loop keeps going.
        tx.send(1).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("trigger did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_an_active_loop() {
        let dir = TempDir::new().unwrap();
        let engine = engine(vec![], &dir);
        let registry: Arc<dyn RepositoryRegistry> = Arc::new(StaticRegistry::new(vec![]));
        let publisher = Arc::new(RecordingPublisher::default());
        let (_tx, rx) = watch::channel(3600);

        let trigger = StatsRefreshTrigger::new(
            registry,
            engine,
            Arc::clone(&publisher) as Arc<dyn StatsPublisher>,
            rx,
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(trigger.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("trigger did not stop")
            .unwrap();
    }
}
