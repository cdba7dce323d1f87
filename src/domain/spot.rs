use serde::{Deserialize, Serialize};

use crate::domain::rating::Rating;

/// Derived statistics over a set of ratings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpotStatistics {
    pub average_rating: f64,
    pub review_count: i64,
}

impl SpotStatistics {
    /// Exact arithmetic mean of the scores, no rounding. An empty slice yields
    /// zero for both values.
    pub fn compute(ratings: &[Rating]) -> Self {
        Self::from_scores(ratings.iter().map(|r| r.score))
    }

    /// Same as [`SpotStatistics::compute`] over bare scores.
    pub fn from_scores(scores: impl IntoIterator<Item = i16>) -> Self {
        let (sum, count) = scores
            .into_iter()
            .fold((0i64, 0i64), |(sum, count), score| (sum + i64::from(score), count + 1));

        if count == 0 {
            return Self::default();
        }

        Self {
            average_rating: sum as f64 / count as f64,
            review_count: count,
        }
    }
}

/// Materialized statistics stored alongside a spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SpotAggregate {
    pub spot_id: String,
    pub average_rating: f64,
    pub review_count: i64,
}

impl SpotAggregate {
    pub fn new(spot_id: String, stats: SpotStatistics) -> Self {
        Self {
            spot_id,
            average_rating: stats.average_rating,
            review_count: stats.review_count,
        }
    }

    pub fn statistics(&self) -> SpotStatistics {
        SpotStatistics {
            average_rating: self.average_rating,
            review_count: self.review_count,
        }
    }
}
