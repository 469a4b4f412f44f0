//! Handler-boundary error type.
//!
//! Every handler returns `Result<_, ApiError>`; the response body is always
//! `{ "error": ..., "details": ... }`.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::{evolution::GatewayError, store::StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("monthly message quota exceeded")]
    QuotaExceeded { limit: i64, used: i64 },

    #[error("blast limit exceeded")]
    BlastLimitExceeded { limit: i64, requested: i64 },

    #[error("failed to send message via gateway")]
    Provider(#[from] GatewayError),

    #[error("database error")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::QuotaExceeded { .. } | Self::BlastLimitExceeded { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Provider(_) | Self::Store(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn details(&self) -> Value {
        match self {
            Self::QuotaExceeded { limit, used } => json!({ "limit": limit, "used": used }),
            Self::BlastLimitExceeded { limit, requested } => {
                json!({ "limit": limit, "requested": requested })
            }
            Self::Provider(err) => err.details(),
            Self::Store(err) => json!(err.to_string()),
            _ => Value::Null,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// `Json` extractor whose rejection renders as an `ApiError` body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, details = %self.details(), "request failed");
        }
        (
            status,
            Json(json!({ "error": self.to_string(), "details": self.details() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::QuotaExceeded { limit: 10, used: 10 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from(sqlx::Error::RowNotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Provider(GatewayError::InvalidRequest("bad".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_quota_details_carry_counts() {
        let err = ApiError::QuotaExceeded { limit: 100, used: 100 };
        assert_eq!(err.details(), json!({ "limit": 100, "used": 100 }));
    }
}
