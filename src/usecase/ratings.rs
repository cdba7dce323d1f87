use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

use crate::domain::rating::{validate, Rating};
use crate::domain::spot::{SpotAggregate, SpotStatistics};
use crate::usecase::contracts::{RatingRepository, SpotRepository};
use crate::usecase::error::{AggregateSyncError, UsecaseError};

pub const DEFAULT_AGGREGATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of a full reconciliation pass over every spot.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileReport {
    pub recomputed: usize,
    pub failed: usize,
}

/// Accepts rating submissions and keeps each spot's materialized statistics
/// in line with its ratings.
///
/// All work that reads a spot's ratings and rewrites its aggregate runs under
/// that spot's lock, so two submissions for the same spot can never publish
/// statistics computed from a stale rating set. Different spots do not
/// contend.
pub struct RatingsUseCase<Ra, S>
where
    Ra: RatingRepository,
    S: SpotRepository,
{
    rating_repository: Ra,
    spot_repository: S,
    spot_locks: DashMap<String, Arc<Mutex<()>>>,
    aggregate_timeout: Duration,
    sync_failures: Option<mpsc::Sender<AggregateSyncError>>,
}

impl<Ra, S> RatingsUseCase<Ra, S>
where
    Ra: RatingRepository,
    S: SpotRepository,
{
    pub fn new(rating_repository: Ra, spot_repository: S) -> Self {
        Self {
            rating_repository,
            spot_repository,
            spot_locks: DashMap::new(),
            aggregate_timeout: DEFAULT_AGGREGATE_TIMEOUT,
            sync_failures: None,
        }
    }

    pub fn with_aggregate_timeout(mut self, timeout: Duration) -> Self {
        self.aggregate_timeout = timeout;
        self
    }

    /// Aggregate sync failures are forwarded here in addition to being logged.
    pub fn with_sync_failures(mut self, sender: mpsc::Sender<AggregateSyncError>) -> Self {
        self.sync_failures = Some(sender);
        self
    }

    #[cfg(test)]
    pub fn rating_repository(&self) -> &Ra {
        &self.rating_repository
    }

    #[cfg(test)]
    pub fn spot_repository(&self) -> &S {
        &self.spot_repository
    }

    /// Creates the user's rating for the spot, or replaces the one they
    /// already have, then refreshes the spot's statistics.
    ///
    /// Once the rating itself is stored the call succeeds; a failed, timed out
    /// or abandoned statistics refresh is reported on the side channel only.
    #[tracing::instrument(skip(self, categories, comment), fields(spot_id = %spot_id, user_id = %user_id, score = score))]
    pub async fn submit_rating<C: AsRef<str>>(
        &self,
        spot_id: &str,
        user_id: &str,
        score: i16,
        categories: &[C],
        comment: Option<String>,
    ) -> Result<Rating, UsecaseError> {
        tracing::debug!("submitting rating");

        if let Err(e) = validate(spot_id, user_id, score, categories) {
            tracing::debug!(field = e.field(), error = %e, "rating rejected");
            metrics::counter!("spot_ratings_submitted_total", "outcome" => "invalid").increment(1);
            return Err(e.into());
        }

        if !self.spot_repository.exists(spot_id).await? {
            metrics::counter!("spot_ratings_submitted_total", "outcome" => "not_found").increment(1);
            return Err(UsecaseError::not_found("spot", spot_id));
        }

        let result = {
            let _spot = self.lock_spot(spot_id).await;
            self.upsert_and_sync(spot_id, user_id, score, categories, comment)
                .await
        };

        if result.is_err() {
            metrics::counter!("spot_ratings_submitted_total", "outcome" => "error").increment(1);
        }
        result
    }

    async fn upsert_and_sync<C: AsRef<str>>(
        &self,
        spot_id: &str,
        user_id: &str,
        score: i16,
        categories: &[C],
        comment: Option<String>,
    ) -> Result<Rating, UsecaseError> {
        let existing = self
            .rating_repository
            .find_by_spot_and_user(spot_id, user_id)
            .await?;

        let (rating, outcome) = match existing {
            Some(mut rating) => {
                rating.update(score, categories, comment)?;
                self.rating_repository.update(&rating).await?;
                (rating, "updated")
            }
            None => {
                let rating = Rating::new(
                    spot_id.to_string(),
                    user_id.to_string(),
                    score,
                    categories,
                    comment,
                )?;
                self.rating_repository.create(&rating).await?;
                (rating, "created")
            }
        };

        metrics::counter!("spot_ratings_submitted_total", "outcome" => outcome).increment(1);
        tracing::info!(rating_id = %rating.id, spot_id = %spot_id, user_id = %user_id, score, outcome, "rating stored");

        let pending = PendingSync {
            usecase: self,
            spot_id,
            armed: true,
        };
        let sync = tokio::time::timeout(self.aggregate_timeout, self.recompute_locked(spot_id, "submit")).await;
        match sync {
            Ok(Ok(stats)) => {
                tracing::debug!(
                    spot_id = %spot_id,
                    average_rating = stats.average_rating,
                    review_count = stats.review_count,
                    "spot aggregate refreshed"
                );
            }
            Ok(Err(e)) => self.report_sync_failure(e),
            Err(_) => self.report_sync_failure(AggregateSyncError::Timeout {
                spot_id: spot_id.to_string(),
                timeout: self.aggregate_timeout,
            }),
        }
        pending.settle();

        Ok(rating)
    }

    /// Recomputes a spot's statistics from all of its ratings and stores them.
    ///
    /// Takes the spot's lock, so it is safe to call while submissions for the
    /// same spot are in flight.
    #[tracing::instrument(skip(self), fields(spot_id = %spot_id))]
    pub async fn recompute_aggregate(&self, spot_id: &str) -> Result<SpotStatistics, AggregateSyncError> {
        let _spot = self.lock_spot(spot_id).await;
        self.recompute_locked(spot_id, "reconcile").await
    }

    /// Recomputes every known spot. Failures are counted, not propagated.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Result<ReconcileReport, UsecaseError> {
        let spot_ids = self.spot_repository.list_ids().await?;
        tracing::debug!(count = spot_ids.len(), "reconciling spot aggregates");

        let mut report = ReconcileReport::default();
        for spot_id in &spot_ids {
            match self.recompute_aggregate(spot_id).await {
                Ok(_) => report.recomputed += 1,
                Err(e) => {
                    tracing::warn!(error = %e, spot_id = %spot_id, "reconciliation failed for spot");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(recomputed = report.recomputed, failed = report.failed, "reconciliation pass finished");
        Ok(report)
    }

    #[tracing::instrument(skip(self), fields(spot_id = %spot_id))]
    pub async fn list_ratings(&self, spot_id: &str) -> Result<Vec<Rating>, UsecaseError> {
        tracing::debug!("listing spot ratings");

        let ratings = self.rating_repository.find_by_spot(spot_id).await?;

        tracing::debug!(spot_id = %spot_id, count = ratings.len(), "retrieved spot ratings");
        Ok(ratings)
    }

    #[tracing::instrument(skip(self), fields(spot_id = %spot_id, user_id = %user_id))]
    pub async fn get_user_rating(
        &self,
        spot_id: &str,
        user_id: &str,
    ) -> Result<Option<Rating>, UsecaseError> {
        tracing::debug!("getting user rating");

        Ok(self
            .rating_repository
            .find_by_spot_and_user(spot_id, user_id)
            .await?)
    }

    #[tracing::instrument(skip(self), fields(spot_id = %spot_id))]
    pub async fn get_spot_aggregate(&self, spot_id: &str) -> Result<SpotAggregate, UsecaseError> {
        tracing::debug!("getting spot aggregate");

        self.spot_repository
            .find_aggregate(spot_id)
            .await?
            .ok_or_else(|| UsecaseError::not_found("spot", spot_id))
    }

    async fn recompute_locked(
        &self,
        spot_id: &str,
        trigger: &'static str,
    ) -> Result<SpotStatistics, AggregateSyncError> {
        let started = Instant::now();
        let store_error = |source| AggregateSyncError::Store {
            spot_id: spot_id.to_string(),
            source,
        };

        let ratings = self
            .rating_repository
            .find_by_spot(spot_id)
            .await
            .map_err(store_error)?;
        let stats = SpotStatistics::compute(&ratings);

        self.spot_repository
            .update_aggregate(spot_id, stats.average_rating, stats.review_count)
            .await
            .map_err(store_error)?;

        metrics::counter!("spot_aggregate_recomputed_total", "trigger" => trigger).increment(1);
        metrics::histogram!("spot_aggregate_recompute_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(stats)
    }

    fn report_sync_failure(&self, error: AggregateSyncError) {
        tracing::error!(error = %error, spot_id = %error.spot_id(), "spot aggregate is stale");
        metrics::counter!("spot_aggregate_sync_failures_total").increment(1);

        if let Some(sender) = &self.sync_failures {
            if let Err(e) = sender.try_send(error) {
                tracing::warn!(error = %e, "could not queue spot for reconciliation");
            }
        }
    }

    async fn lock_spot<'a>(&'a self, spot_id: &'a str) -> SpotLock<'a, Ra, S> {
        let mut spot = SpotLock {
            usecase: self,
            spot_id,
            guard: None,
        };
        let lock = self
            .spot_locks
            .entry(spot_id.to_string())
            .or_default()
            .clone();
        spot.guard = Some(lock.lock_owned().await);
        spot
    }

    // Drops the lock entry once nobody else holds or waits on it.
    fn release_spot_lock(&self, spot_id: &str) {
        self.spot_locks
            .remove_if(spot_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Holds a spot's lock and drops its table entry on release, including when
/// the owning future is cancelled.
struct SpotLock<'a, Ra, S>
where
    Ra: RatingRepository,
    S: SpotRepository,
{
    usecase: &'a RatingsUseCase<Ra, S>,
    spot_id: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<Ra, S> Drop for SpotLock<'_, Ra, S>
where
    Ra: RatingRepository,
    S: SpotRepository,
{
    fn drop(&mut self) {
        drop(self.guard.take());
        self.usecase.release_spot_lock(self.spot_id);
    }
}

/// Armed between storing a rating and finishing its aggregate refresh. If
/// the submission is dropped in that window the spot is reported as stale.
struct PendingSync<'a, Ra, S>
where
    Ra: RatingRepository,
    S: SpotRepository,
{
    usecase: &'a RatingsUseCase<Ra, S>,
    spot_id: &'a str,
    armed: bool,
}

impl<Ra, S> PendingSync<'_, Ra, S>
where
    Ra: RatingRepository,
    S: SpotRepository,
{
    fn settle(mut self) {
        self.armed = false;
    }
}

impl<Ra, S> Drop for PendingSync<'_, Ra, S>
where
    Ra: RatingRepository,
    S: SpotRepository,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.usecase.report_sync_failure(AggregateSyncError::Abandoned {
            spot_id: self.spot_id.to_string(),
        });
    }
}
