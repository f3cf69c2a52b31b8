use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database error: {0}")]
    Db(#[from] DbErr),

    #[error("{0} not found")]
    SubjectNotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
