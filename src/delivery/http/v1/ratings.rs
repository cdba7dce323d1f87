use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::delivery::http::v1::middleware::AuthenticatedUser;
use crate::domain::category::Category;
use crate::domain::rating::Rating;
use crate::usecase::error::UsecaseError;
use crate::AppState;

#[derive(Deserialize, Validate)]
pub struct SubmitRatingRequest {
    #[validate(range(min = 1, max = 5))]
    pub score: i16,
    #[serde(default)]
    pub categories: Vec<String>,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

#[derive(Serialize)]
pub struct RatingResponse {
    pub id: Uuid,
    pub spot_id: String,
    pub user_id: String,
    pub score: i16,
    pub categories: Vec<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Rating> for RatingResponse {
    fn from(r: Rating) -> Self {
        Self {
            id: r.id,
            spot_id: r.spot_id,
            user_id: r.user_id,
            score: r.score,
            categories: r.categories,
            comment: r.comment,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct UserRatingResponse {
    pub rating: Option<RatingResponse>,
}

#[derive(Serialize)]
pub struct SpotAggregateResponse {
    pub spot_id: String,
    pub average_rating: f64,
    pub review_count: i64,
}

#[tracing::instrument(skip(state, payload), fields(user_id = %user.user_id, spot_id = %spot_id))]
pub async fn submit_rating(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(spot_id): Path<String>,
    Json(payload): Json<SubmitRatingRequest>,
) -> Result<impl IntoResponse, UsecaseError> {
    tracing::debug!("handling submit rating request");

    if let Err(validation_errors) = payload.validate() {
        tracing::warn!(user_id = %user.user_id, ?validation_errors, "validation failed");
        return Err(UsecaseError::InvalidRequest(validation_errors.to_string()));
    }

    let rating = state
        .ratings_usecase
        .submit_rating(
            &spot_id,
            &user.user_id,
            payload.score,
            payload.categories.as_slice(),
            payload.comment,
        )
        .await?;

    tracing::debug!(rating_id = %rating.id, "rating submitted successfully");
    Ok((StatusCode::OK, Json(RatingResponse::from(rating))))
}

#[tracing::instrument(skip(state), fields(spot_id = %spot_id))]
pub async fn list_spot_ratings(
    State(state): State<Arc<AppState>>,
    Path(spot_id): Path<String>,
) -> Result<impl IntoResponse, UsecaseError> {
    tracing::debug!("handling list spot ratings request");

    let ratings = state.ratings_usecase.list_ratings(&spot_id).await?;
    let response: Vec<RatingResponse> = ratings.into_iter().map(RatingResponse::from).collect();

    tracing::debug!(count = response.len(), "spot ratings listed");
    Ok((StatusCode::OK, Json(response)))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id, spot_id = %spot_id))]
pub async fn get_user_rating(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(spot_id): Path<String>,
) -> Result<impl IntoResponse, UsecaseError> {
    tracing::debug!("handling get user rating request");

    let rating = state
        .ratings_usecase
        .get_user_rating(&spot_id, &user.user_id)
        .await?;

    Ok((
        StatusCode::OK,
        Json(UserRatingResponse {
            rating: rating.map(RatingResponse::from),
        }),
    ))
}

#[tracing::instrument(skip(state), fields(spot_id = %spot_id))]
pub async fn get_spot_aggregate(
    State(state): State<Arc<AppState>>,
    Path(spot_id): Path<String>,
) -> Result<impl IntoResponse, UsecaseError> {
    tracing::debug!("handling get spot aggregate request");

    let aggregate = state.ratings_usecase.get_spot_aggregate(&spot_id).await?;

    tracing::debug!(
        average_rating = aggregate.average_rating,
        review_count = aggregate.review_count,
        "spot aggregate retrieved"
    );
    Ok((
        StatusCode::OK,
        Json(SpotAggregateResponse {
            spot_id: aggregate.spot_id,
            average_rating: aggregate.average_rating,
            review_count: aggregate.review_count,
        }),
    ))
}

#[tracing::instrument]
pub async fn list_categories() -> Json<Vec<Category>> {
    Json(Category::ALL.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(score: i16, categories: &[&str], comment: Option<&str>) -> SubmitRatingRequest {
        SubmitRatingRequest {
            score,
            categories: categories.iter().map(|c| c.to_string()).collect(),
            comment: comment.map(str::to_string),
        }
    }

    #[test]
    fn test_submit_rating_request_validation_valid() {
        let req = request(4, &["wifi_available"], Some("quiet corner tables"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_submit_rating_request_validation_score_out_of_range() {
        assert!(request(0, &[], None).validate().is_err());
        assert!(request(6, &[], None).validate().is_err());
    }

    #[test]
    fn test_submit_rating_request_validation_comment_too_long() {
        let long = "a".repeat(2001);
        assert!(request(3, &[], Some(&long)).validate().is_err());
    }

    #[test]
    fn test_submit_rating_request_accepts_repeated_categories() {
        let repeated = ["quiet_atmosphere"; 12];
        assert!(request(4, &repeated, None).validate().is_ok());
    }

    #[test]
    fn test_submit_rating_request_defaults_categories() {
        let req: SubmitRatingRequest = serde_json::from_str(r#"{"score": 5}"#).unwrap();
        assert!(req.categories.is_empty());
        assert!(req.comment.is_none());
    }

    #[test]
    fn test_rating_response_from_domain() {
        let rating = Rating::new(
            "cafe".to_string(),
            "alice".to_string(),
            5,
            &["single_seating"],
            None,
        )
        .unwrap();
        let id = rating.id;

        let json = serde_json::to_value(RatingResponse::from(rating)).unwrap();

        assert_eq!(json["id"], id.to_string());
        assert_eq!(json["categories"][0], "single_seating");
        assert!(json.get("comment").is_none());
    }
}
