use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

use crate::domain::rating::ValidationError;
use crate::repository::errors::RepositoryError;

#[derive(Debug, Error)]
pub enum UsecaseError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    InvalidInput(#[from] ValidationError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl UsecaseError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        UsecaseError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<RepositoryError> for UsecaseError {
    fn from(e: RepositoryError) -> Self {
        // A row that vanished mid-operation is a storage inconsistency, not a
        // caller error.
        UsecaseError::Storage(e.to_string())
    }
}

impl IntoResponse for UsecaseError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            UsecaseError::NotFound { .. } => StatusCode::NOT_FOUND,
            UsecaseError::InvalidInput(_) | UsecaseError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            UsecaseError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match &self {
            UsecaseError::Storage(_) => {
                tracing::error!(error = %self, "internal error");
            }
            UsecaseError::NotFound { .. } => {
                tracing::warn!(error = %self, "resource not found");
            }
            UsecaseError::InvalidInput(_) | UsecaseError::InvalidRequest(_) => {
                tracing::debug!(error = %self);
            }
        }

        (status, self.to_string()).into_response()
    }
}

/// Failure to refresh a spot's materialized statistics after its rating was
/// already stored. Never returned to the submitter.
#[derive(Debug, Error)]
pub enum AggregateSyncError {
    #[error("failed to sync aggregate for spot '{spot_id}': {source}")]
    Store {
        spot_id: String,
        #[source]
        source: RepositoryError,
    },

    #[error("aggregate sync for spot '{spot_id}' timed out after {timeout:?}")]
    Timeout { spot_id: String, timeout: Duration },

    #[error("aggregate sync for spot '{spot_id}' abandoned by a cancelled submission")]
    Abandoned { spot_id: String },
}

impl AggregateSyncError {
    pub fn spot_id(&self) -> &str {
        match self {
            AggregateSyncError::Store { spot_id, .. } => spot_id,
            AggregateSyncError::Timeout { spot_id, .. } => spot_id,
            AggregateSyncError::Abandoned { spot_id } => spot_id,
        }
    }
}
