use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use tracing::error;

use crate::engagement::EngagementError;
use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problems_needed: Option<i64>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("forbidden")] Forbidden,
    #[error("unauthorized")] Unauthorized,
    #[error("{0}")] BadRequest(String),
    #[error("rate limited")] TooManyRequests,
    #[error("not enough points")] InsufficientPoints { shortfall: i64, problems_needed: i64 },
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict => ApiError::Conflict,
            RepoError::Denied => ApiError::Forbidden,
            RepoError::Internal(msg) => {
                error!(error = %msg, "store failure");
                ApiError::Internal
            }
        }
    }
}

impl From<EngagementError> for ApiError {
    fn from(e: EngagementError) -> Self {
        match e {
            EngagementError::LoginRequired => ApiError::Unauthorized,
            EngagementError::InsufficientPoints { shortfall, problems_needed } => {
                ApiError::InsufficientPoints { shortfall, problems_needed }
            }
            EngagementError::PurchaseInFlight => ApiError::TooManyRequests,
            EngagementError::AlreadyOwned | EngagementError::AliasTaken => ApiError::Conflict,
            EngagementError::InvalidAlias(msg) => ApiError::BadRequest(msg),
            EngagementError::Store(e) => e.into(),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InsufficientPoints { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let (shortfall, problems_needed) = match self {
            ApiError::InsufficientPoints { shortfall, problems_needed } => (Some(*shortfall), Some(*problems_needed)),
            _ => (None, None),
        };
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string(), shortfall, problems_needed })
    }
}
