use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::category::Category;

pub const MIN_SCORE: i16 = 1;
pub const MAX_SCORE: i16 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid input: {0}")]
    InvalidField(&'static str),
    #[error("invalid input: unknown category '{0}'")]
    UnknownCategory(String),
}

impl ValidationError {
    /// Name of the offending field, as reported to callers.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::InvalidField(field) => field,
            ValidationError::UnknownCategory(_) => "category",
        }
    }
}

/// One user's solo-friendliness rating of one spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub id: Uuid,
    pub spot_id: String,
    pub user_id: String,
    pub score: i16,
    pub categories: Vec<Category>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rating {
    pub fn new<S: AsRef<str>>(
        spot_id: String,
        user_id: String,
        score: i16,
        categories: &[S],
        comment: Option<String>,
    ) -> Result<Self, ValidationError> {
        let categories = validate(&spot_id, &user_id, score, categories)?;
        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            spot_id,
            user_id,
            score,
            categories,
            comment,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replaces the user-supplied fields of an existing rating.
    ///
    /// `id`, `spot_id`, `user_id` and `created_at` never change. Nothing is
    /// modified when validation fails.
    pub fn update<S: AsRef<str>>(
        &mut self,
        score: i16,
        categories: &[S],
        comment: Option<String>,
    ) -> Result<(), ValidationError> {
        let categories = validate(&self.spot_id, &self.user_id, score, categories)?;

        self.score = score;
        self.categories = categories;
        self.comment = comment;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Checks a rating submission and returns its categories parsed and
/// deduplicated, first occurrence wins.
///
/// Fails on the first problem found.
pub fn validate<S: AsRef<str>>(
    spot_id: &str,
    user_id: &str,
    score: i16,
    categories: &[S],
) -> Result<Vec<Category>, ValidationError> {
    if spot_id.is_empty() {
        return Err(ValidationError::InvalidField("spot_id"));
    }
    if user_id.is_empty() {
        return Err(ValidationError::InvalidField("user_id"));
    }
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(ValidationError::InvalidField("score"));
    }

    let mut parsed: Vec<Category> = Vec::with_capacity(categories.len());
    for name in categories {
        let category = name
            .as_ref()
            .parse::<Category>()
            .map_err(|e| ValidationError::UnknownCategory(e.0))?;
        if !parsed.contains(&category) {
            parsed.push(category);
        }
    }

    Ok(parsed)
}
