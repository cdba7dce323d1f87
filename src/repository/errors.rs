use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("ratings storage failed: {0}")]
    DatabaseError(String),
    #[error("no spot or rating row matched")]
    NotFound,
}
