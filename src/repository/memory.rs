//! In-process stores used by the use-case tests.
//!
//! Every read hands control back to the scheduler before returning, which
//! widens the window between "read ratings" and "write aggregate" so that
//! concurrent submissions actually interleave.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;

use crate::{
    domain::{rating::Rating, spot::SpotAggregate},
    repository::errors::RepositoryError,
    usecase::contracts::{RatingRepository, SpotRepository},
};

#[derive(Default)]
pub struct InMemoryRatingRepository {
    ratings: Mutex<Vec<Rating>>,
    fail_writes: AtomicBool,
}

impl InMemoryRatingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.ratings.lock().unwrap().len()
    }

    pub fn insert_raw(&self, rating: Rating) {
        self.ratings.lock().unwrap().push(rating);
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::DatabaseError("ratings store unavailable".to_string()));
        }
        Ok(())
    }
}

impl RatingRepository for InMemoryRatingRepository {
    async fn create(&self, rating: &Rating) -> Result<(), RepositoryError> {
        self.check_writable()?;
        tokio::task::yield_now().await;

        let mut ratings = self.ratings.lock().unwrap();
        if ratings
            .iter()
            .any(|r| r.spot_id == rating.spot_id && r.user_id == rating.user_id)
        {
            return Err(RepositoryError::DatabaseError(
                "duplicate key value violates unique constraint".to_string(),
            ));
        }
        ratings.push(rating.clone());
        Ok(())
    }

    async fn update(&self, rating: &Rating) -> Result<(), RepositoryError> {
        self.check_writable()?;
        tokio::task::yield_now().await;

        let mut ratings = self.ratings.lock().unwrap();
        let existing = ratings
            .iter_mut()
            .find(|r| r.id == rating.id)
            .ok_or(RepositoryError::NotFound)?;
        *existing = rating.clone();
        Ok(())
    }

    async fn find_by_spot_and_user(
        &self,
        spot_id: &str,
        user_id: &str,
    ) -> Result<Option<Rating>, RepositoryError> {
        let found = self
            .ratings
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.spot_id == spot_id && r.user_id == user_id)
            .cloned();
        tokio::task::yield_now().await;
        Ok(found)
    }

    async fn find_by_spot(&self, spot_id: &str) -> Result<Vec<Rating>, RepositoryError> {
        let found: Vec<Rating> = self
            .ratings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.spot_id == spot_id)
            .cloned()
            .collect();
        tokio::task::yield_now().await;
        Ok(found)
    }
}

#[derive(Default)]
pub struct InMemorySpotRepository {
    spots: DashMap<String, SpotAggregate>,
    fail_aggregate_updates: AtomicBool,
    aggregate_delay: Mutex<Duration>,
    aggregate_updates: AtomicUsize,
}

impl InMemorySpotRepository {
    pub fn with_spots(ids: &[&str]) -> Self {
        let repo = Self::default();
        for id in ids {
            repo.spots.insert(
                id.to_string(),
                SpotAggregate::new(id.to_string(), Default::default()),
            );
        }
        repo
    }

    pub fn fail_aggregate_updates(&self, fail: bool) {
        self.fail_aggregate_updates.store(fail, Ordering::SeqCst);
    }

    pub fn delay_aggregate_updates(&self, delay: Duration) {
        *self.aggregate_delay.lock().unwrap() = delay;
    }

    pub fn aggregate_updates(&self) -> usize {
        self.aggregate_updates.load(Ordering::SeqCst)
    }

    pub fn aggregate(&self, spot_id: &str) -> Option<SpotAggregate> {
        self.spots.get(spot_id).map(|entry| entry.value().clone())
    }
}

impl SpotRepository for InMemorySpotRepository {
    async fn exists(&self, spot_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.spots.contains_key(spot_id))
    }

    async fn update_aggregate(
        &self,
        spot_id: &str,
        average_rating: f64,
        review_count: i64,
    ) -> Result<(), RepositoryError> {
        let delay = *self.aggregate_delay.lock().unwrap();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        if self.fail_aggregate_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::DatabaseError("spots store unavailable".to_string()));
        }

        let mut spot = self.spots.get_mut(spot_id).ok_or(RepositoryError::NotFound)?;
        spot.average_rating = average_rating;
        spot.review_count = review_count;
        self.aggregate_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_aggregate(&self, spot_id: &str) -> Result<Option<SpotAggregate>, RepositoryError> {
        Ok(self.aggregate(spot_id))
    }

    async fn list_ids(&self) -> Result<Vec<String>, RepositoryError> {
        let mut ids: Vec<String> = self.spots.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}
