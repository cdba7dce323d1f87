use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::{
    domain::{
        category::Category,
        rating::Rating,
        spot::{SpotAggregate, SpotStatistics},
    },
    repository::errors::RepositoryError,
    usecase::contracts::{RatingRepository, SpotRepository},
};

#[derive(sqlx::FromRow)]
struct RatingRow {
    id: Uuid,
    spot_id: String,
    user_id: String,
    score: i16,
    categories: Vec<String>,
    comment: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RatingRow> for Rating {
    type Error = RepositoryError;

    fn try_from(row: RatingRow) -> Result<Self, Self::Error> {
        let categories = row
            .categories
            .iter()
            .map(|name| {
                name.parse::<Category>().map_err(|e| {
                    RepositoryError::DatabaseError(format!(
                        "rating {} has unknown category '{}'",
                        row.id, e.0
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Rating {
            id: row.id,
            spot_id: row.spot_id,
            user_id: row.user_id,
            score: row.score,
            categories,
            comment: row.comment,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn category_names(rating: &Rating) -> Vec<&'static str> {
    rating.categories.iter().map(Category::as_str).collect()
}

pub struct PostgresRatingRepository {
    pool: PgPool,
}

impl PostgresRatingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl RatingRepository for PostgresRatingRepository {
    #[tracing::instrument(skip(self, rating), fields(rating_id = %rating.id, spot_id = %rating.spot_id, user_id = %rating.user_id, score = rating.score))]
    async fn create(&self, rating: &Rating) -> Result<(), RepositoryError> {
        tracing::debug!("creating spot rating");

        sqlx::query(
            r#"
            INSERT INTO spot_ratings (id, spot_id, user_id, score, categories, comment, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(rating.id)
        .bind(&rating.spot_id)
        .bind(&rating.user_id)
        .bind(rating.score)
        .bind(category_names(rating))
        .bind(&rating.comment)
        .bind(rating.created_at)
        .bind(rating.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(rating_id = %rating.id, "spot rating created successfully");
        Ok(())
    }

    #[tracing::instrument(skip(self, rating), fields(rating_id = %rating.id, spot_id = %rating.spot_id, score = rating.score))]
    async fn update(&self, rating: &Rating) -> Result<(), RepositoryError> {
        tracing::debug!("updating spot rating");

        let result = sqlx::query(
            r#"
            UPDATE spot_ratings
            SET score = $2, categories = $3, comment = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(rating.id)
        .bind(rating.score)
        .bind(category_names(rating))
        .bind(&rating.comment)
        .bind(rating.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        tracing::debug!(rating_id = %rating.id, "spot rating updated successfully");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(spot_id = %spot_id, user_id = %user_id))]
    async fn find_by_spot_and_user(
        &self,
        spot_id: &str,
        user_id: &str,
    ) -> Result<Option<Rating>, RepositoryError> {
        tracing::debug!("finding spot rating by spot and user");

        let row = sqlx::query_as::<_, RatingRow>(
            r#"
            SELECT id, spot_id, user_id, score, categories, comment, created_at, updated_at
            FROM spot_ratings
            WHERE spot_id = $1 AND user_id = $2
            "#,
        )
        .bind(spot_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        row.map(Rating::try_from).transpose()
    }

    #[tracing::instrument(skip(self), fields(spot_id = %spot_id))]
    async fn find_by_spot(&self, spot_id: &str) -> Result<Vec<Rating>, RepositoryError> {
        tracing::debug!("finding spot ratings by spot_id");

        let rows = sqlx::query_as::<_, RatingRow>(
            r#"
            SELECT id, spot_id, user_id, score, categories, comment, created_at, updated_at
            FROM spot_ratings
            WHERE spot_id = $1
            ORDER BY updated_at DESC
            "#,
        )
        .bind(spot_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(spot_id = %spot_id, count = rows.len(), "found spot ratings");
        rows.into_iter().map(Rating::try_from).collect()
    }
}

pub struct PostgresSpotRepository {
    pool: PgPool,
}

impl PostgresSpotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SpotRepository for PostgresSpotRepository {
    #[tracing::instrument(skip(self), fields(spot_id = %spot_id))]
    async fn exists(&self, spot_id: &str) -> Result<bool, RepositoryError> {
        tracing::debug!("checking spot existence");

        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(SELECT 1 FROM spots WHERE id = $1)
            "#,
        )
        .bind(spot_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(exists.0)
    }

    #[tracing::instrument(skip(self), fields(spot_id = %spot_id))]
    async fn update_aggregate(
        &self,
        spot_id: &str,
        average_rating: f64,
        review_count: i64,
    ) -> Result<(), RepositoryError> {
        tracing::debug!("updating spot aggregate");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        // Serializes aggregate writers for the spot across every replica until
        // commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(spot_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        let scores: Vec<i16> = sqlx::query_scalar(
            r#"
            SELECT score FROM spot_ratings WHERE spot_id = $1
            "#,
        )
        .bind(spot_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        let mut stats = SpotStatistics {
            average_rating,
            review_count,
        };
        let live = SpotStatistics::from_scores(scores);
        if live != stats {
            tracing::debug!(
                spot_id = %spot_id,
                live_review_count = live.review_count,
                stale_review_count = review_count,
                "rating set changed since it was read, storing live statistics"
            );
            stats = live;
        }

        let result = sqlx::query(
            r#"
            UPDATE spots
            SET average_rating = $2, review_count = $3
            WHERE id = $1
            "#,
        )
        .bind(spot_id)
        .bind(stats.average_rating)
        .bind(stats.review_count)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(spot_id = %spot_id, "spot aggregate updated successfully");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(spot_id = %spot_id))]
    async fn find_aggregate(&self, spot_id: &str) -> Result<Option<SpotAggregate>, RepositoryError> {
        tracing::debug!("finding spot aggregate");

        let aggregate = sqlx::query_as::<_, SpotAggregate>(
            r#"
            SELECT id AS spot_id, average_rating, review_count
            FROM spots
            WHERE id = $1
            "#,
        )
        .bind(spot_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(aggregate)
    }

    #[tracing::instrument(skip(self))]
    async fn list_ids(&self) -> Result<Vec<String>, RepositoryError> {
        tracing::debug!("listing spot ids");

        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM spots ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(count = ids.len(), "listed spot ids");
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
