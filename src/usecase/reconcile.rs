use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::usecase::contracts::{RatingRepository, SpotRepository};
use crate::usecase::error::AggregateSyncError;
use crate::usecase::ratings::RatingsUseCase;

/// Background task that repairs spot aggregates left stale by failed or
/// abandoned refreshes.
///
/// Spots reported on the failure channel are recomputed right away; every
/// spot is recomputed on each sweep tick, the first one at start-up.
pub struct ReconcileWorker<Ra, S>
where
    Ra: RatingRepository,
    S: SpotRepository,
{
    usecase: Arc<RatingsUseCase<Ra, S>>,
    failures: mpsc::Receiver<AggregateSyncError>,
    sweep_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<Ra, S> ReconcileWorker<Ra, S>
where
    Ra: RatingRepository,
    S: SpotRepository,
{
    pub fn new(
        usecase: Arc<RatingsUseCase<Ra, S>>,
        failures: mpsc::Receiver<AggregateSyncError>,
        sweep_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            usecase,
            failures,
            sweep_interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(sweep_interval_secs = self.sweep_interval.as_secs(), "reconcile worker started");

        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures_open = true;

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                failure = self.failures.recv(), if failures_open => {
                    match failure {
                        Some(failure) => self.repair(failure).await,
                        None => {
                            tracing::debug!("aggregate failure channel closed");
                            failures_open = false;
                        }
                    }
                }
                _ = ticker.tick() => self.sweep().await,
            }
        }

        tracing::info!("reconcile worker stopped");
    }

    async fn repair(&self, failure: AggregateSyncError) {
        let spot_id = failure.spot_id();
        tracing::debug!(spot_id = %spot_id, cause = %failure, "repairing stale spot aggregate");

        match self.usecase.recompute_aggregate(spot_id).await {
            Ok(stats) => {
                tracing::info!(
                    spot_id = %spot_id,
                    average_rating = stats.average_rating,
                    review_count = stats.review_count,
                    "spot aggregate repaired"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, spot_id = %spot_id, "repair failed, leaving spot for next sweep");
            }
        }
    }

    async fn sweep(&self) {
        if let Err(e) = self.usecase.reconcile_all().await {
            tracing::error!(error = %e, "reconciliation sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rating::Rating;
    use crate::repository::memory::{InMemoryRatingRepository, InMemorySpotRepository};

    type Usecase = RatingsUseCase<InMemoryRatingRepository, InMemorySpotRepository>;

    fn setup(spots: &[&str]) -> (Arc<Usecase>, mpsc::Receiver<AggregateSyncError>) {
        let (tx, rx) = mpsc::channel(16);
        let usecase = RatingsUseCase::new(
            InMemoryRatingRepository::new(),
            InMemorySpotRepository::with_spots(spots),
        )
        .with_sync_failures(tx);
        (Arc::new(usecase), rx)
    }

    async fn wait_for_review_count(usecase: &Usecase, spot_id: &str, count: i64) {
        for _ in 0..100 {
            let aggregate = usecase.get_spot_aggregate(spot_id).await.unwrap();
            if aggregate.review_count == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("aggregate for {spot_id} never reached {count} reviews");
    }

    async fn wait_for_aggregate_updates(usecase: &Usecase, count: usize) {
        for _ in 0..100 {
            if usecase.spot_repository().aggregate_updates() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("aggregate was never written {count} times");
    }

    #[tokio::test]
    async fn test_worker_repairs_reported_spot() {
        let (usecase, rx) = setup(&["cafe"]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = ReconcileWorker::new(
            Arc::clone(&usecase),
            rx,
            Duration::from_secs(3600),
            shutdown_rx,
        );
        let handle = tokio::spawn(worker.run());

        // Start-up sweep; the next one is an hour away.
        wait_for_aggregate_updates(&usecase, 1).await;

        usecase.spot_repository().fail_aggregate_updates(true);
        usecase
            .submit_rating("cafe", "alice", 5, &["wifi_available"], None)
            .await
            .unwrap();
        usecase.spot_repository().fail_aggregate_updates(false);
        assert_eq!(usecase.get_spot_aggregate("cafe").await.unwrap().review_count, 0);

        wait_for_review_count(&usecase, "cafe", 1).await;
        let aggregate = usecase.get_spot_aggregate("cafe").await.unwrap();
        assert_eq!(aggregate.average_rating, 5.0);
        assert_eq!(usecase.spot_repository().aggregate_updates(), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_fixes_unreported_drift() {
        let (usecase, rx) = setup(&["library", "park"]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        for (spot, user, score) in [("library", "a", 2), ("library", "b", 4), ("park", "a", 1)] {
            usecase.rating_repository().insert_raw(
                Rating::new(spot.to_string(), user.to_string(), score, &[] as &[&str], None).unwrap(),
            );
        }

        let worker = ReconcileWorker::new(
            Arc::clone(&usecase),
            rx,
            Duration::from_millis(20),
            shutdown_rx,
        );
        let handle = tokio::spawn(worker.run());

        wait_for_review_count(&usecase, "library", 2).await;
        wait_for_review_count(&usecase, "park", 1).await;
        assert_eq!(usecase.get_spot_aggregate("library").await.unwrap().average_rating, 3.0);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_stops_when_shutdown_sender_dropped() {
        let (usecase, rx) = setup(&[]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = ReconcileWorker::new(usecase, rx, Duration::from_secs(3600), shutdown_rx);
        let handle = tokio::spawn(worker.run());

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
