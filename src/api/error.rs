//! API error types with structured JSON responses.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::AuthError;
use crate::db::DatabaseError;
use crate::validation::{DomainError, FieldErrors};

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Token expired")]
    TokenExpired,
    #[error("Token invalid: {0}")]
    InvalidToken(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation failed")]
    Validation(FieldErrors),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
    /// 500 whose message is safe to show; detail was logged where it happened.
    #[error("{0}")]
    Failure(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, fields) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REQUIRED",
                "Authentication credentials were not provided".to_string(),
                None,
            ),
            ApiError::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "TOKEN_EXPIRED",
                "Token expired, re-authenticate".to_string(),
                None,
            ),
            ApiError::InvalidToken(detail) => {
                tracing::debug!(detail, "rejected token");
                (
                    StatusCode::UNAUTHORIZED,
                    "TOKEN_INVALID",
                    "Token is invalid or expired".to_string(),
                    None,
                )
            }
            ApiError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "No active account found with the given credentials".to_string(),
                None,
            ),
            ApiError::Forbidden(detail) => (StatusCode::FORBIDDEN, "FORBIDDEN", detail, None),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail, None),
            ApiError::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION",
                "Validation failed".to_string(),
                Some(fields),
            ),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail, None),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::Failure(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                message.to_string(),
                None,
            ),
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message, fields },
        };
        (status, Json(body)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(fields) => ApiError::Validation(fields),
            DomainError::NotFound(entity) => ApiError::NotFound(format!("{entity} not found")),
            DomainError::Unauthenticated => ApiError::Unauthorized,
            DomainError::Forbidden(detail) => ApiError::Forbidden(detail),
            DomainError::Internal(message) => ApiError::Failure(message),
            DomainError::Database(e) => e.into(),
            DomainError::Auth(e) => e.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => ApiError::InvalidCredentials,
            AuthError::TokenExpired => ApiError::TokenExpired,
            AuthError::TokenInvalid(detail) => ApiError::InvalidToken(detail),
            AuthError::TokenRevoked => ApiError::InvalidToken("token is blacklisted".into()),
            e @ AuthError::WrongTokenType { .. } => ApiError::InvalidToken(e.to_string()),
            e @ (AuthError::MalformedHash | AuthError::Signing(_)) => ApiError::Internal(e.to_string()),
            AuthError::Database(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn json_of(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_returns_401() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = json_of(response).await;
        assert_eq!(json["error"]["code"], "AUTH_REQUIRED");
        assert!(json["error"].get("fields").is_none());
    }

    #[tokio::test]
    async fn validation_returns_field_keyed_400() {
        let response = ApiError::from(DomainError::field("expiry_date", "Expiry date must be after issue date."))
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_of(response).await;
        assert_eq!(json["error"]["code"], "VALIDATION");
        assert_eq!(json["error"]["fields"]["expiry_date"][0], "Expiry date must be after issue date.");
    }

    #[tokio::test]
    async fn not_found_names_the_entity() {
        let response = ApiError::from(DomainError::NotFound("Medication")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = json_of(response).await;
        assert_eq!(json["error"]["message"], "Medication not found");
    }

    #[tokio::test]
    async fn forbidden_returns_403() {
        let response = ApiError::Forbidden("Only doctors may do this".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn internal_returns_500_without_detail() {
        let response = ApiError::Internal("disk I/O error".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_of(response).await;
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn failure_keeps_its_message() {
        let response = ApiError::from(DomainError::Internal("Failed to perform medication check")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_of(response).await;
        assert_eq!(json["error"]["message"], "Failed to perform medication check");
    }

    #[test]
    fn auth_errors_map_to_401_family() {
        assert!(matches!(ApiError::from(AuthError::TokenExpired), ApiError::TokenExpired));
        assert!(matches!(ApiError::from(AuthError::TokenRevoked), ApiError::InvalidToken(_)));
        assert!(matches!(
            ApiError::from(AuthError::WrongTokenType { expected: "refresh" }),
            ApiError::InvalidToken(_)
        ));
        assert!(matches!(ApiError::from(AuthError::MalformedHash), ApiError::Internal(_)));
    }

    #[test]
    fn database_not_found_is_internal_unless_scoped() {
        let err = DatabaseError::NotFound {
            entity_type: "User".into(),
            id: "x".into(),
        };
        assert!(matches!(ApiError::from(err), ApiError::Internal(_)));
    }
}
