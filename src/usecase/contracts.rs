use crate::{
    domain::{rating::Rating, spot::SpotAggregate},
    repository::errors::RepositoryError,
};

/// Durable storage for individual ratings.
#[cfg_attr(test, mockall::automock)]
pub trait RatingRepository: Send + Sync {
    async fn create(&self, rating: &Rating) -> Result<(), RepositoryError>;
    async fn update(&self, rating: &Rating) -> Result<(), RepositoryError>;
    async fn find_by_spot_and_user(
        &self,
        spot_id: &str,
        user_id: &str,
    ) -> Result<Option<Rating>, RepositoryError>;
    async fn find_by_spot(&self, spot_id: &str) -> Result<Vec<Rating>, RepositoryError>;
}

/// Spots and their materialized rating statistics.
#[cfg_attr(test, mockall::automock)]
pub trait SpotRepository: Send + Sync {
    async fn exists(&self, spot_id: &str) -> Result<bool, RepositoryError>;
    /// Stores the statistics the caller computed. A store shared between
    /// processes may instead store statistics recomputed under its own lock
    /// when the caller's rating set is already out of date.
    async fn update_aggregate(
        &self,
        spot_id: &str,
        average_rating: f64,
        review_count: i64,
    ) -> Result<(), RepositoryError>;
    async fn find_aggregate(&self, spot_id: &str) -> Result<Option<SpotAggregate>, RepositoryError>;
    async fn list_ids(&self) -> Result<Vec<String>, RepositoryError>;
}
