//! Dispatch error types with HTTP status code mapping.
//!
//! [`DispatchError`] is the central error type for the dispatch core. Each
//! variant maps to a specific HTTP status code and structured JSON error
//! response. Errors are always returned to the immediate caller; the core
//! never retries on its own except for automatic re-scoring after an offer
//! is declined or expires.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2101,
///     "message": "conflict: vehicle has no free seat",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`DispatchError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category          | HTTP Status                  |
/// |-----------|-------------------|------------------------------|
/// | 1000–1999 | Validation        | 400 Bad Request              |
/// | 2000–2999 | State / Not Found | 404 / 409 / 410              |
/// | 3000–3999 | Server / Upstream | 500 / 503                    |
/// | 4000–4999 | Money             | 422 Unprocessable Entity     |
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Concurrent capacity or offer contention. The caller should re-score
    /// and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A deadline has already passed.
    #[error("expired: {0}")]
    Expired(String),

    /// The wallet cannot cover the requested amount.
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Amount the operation needed.
        requested: u64,
        /// Balance left after active holds.
        available: u64,
    },

    /// The entity was already accepted, declined, released, captured or
    /// otherwise closed.
    #[error("already resolved: {0}")]
    AlreadyResolved(String),

    /// No position sample is available for the given subject.
    #[error("geolocation unavailable for {0}")]
    GeolocationUnavailable(uuid::Uuid),

    /// Entity with the given id was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind (e.g. `"trip"`).
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The state machine does not allow the requested transition.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// The ETA/distance oracle could not answer.
    #[error("eta oracle unavailable: {0}")]
    EtaUnavailable(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Shorthand for [`DispatchError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`DispatchError::InvalidTransition`].
    pub fn invalid_transition(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        Self::InvalidTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::NotFound { .. } => 2001,
            Self::Conflict(_) => 2101,
            Self::AlreadyResolved(_) => 2102,
            Self::InvalidTransition { .. } => 2103,
            Self::Expired(_) => 2201,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::GeolocationUnavailable(_) => 3101,
            Self::EtaUnavailable(_) => 3102,
            Self::InsufficientBalance { .. } => 4001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::AlreadyResolved(_) | Self::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            Self::Expired(_) => StatusCode::GONE,
            Self::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::GeolocationUnavailable(_) | Self::EtaUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::PersistenceError(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_409() {
        let err = DispatchError::Conflict("last seat taken".to_string());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_code(), 2101);
    }

    #[test]
    fn insufficient_balance_message_carries_amounts() {
        let err = DispatchError::InsufficientBalance {
            requested: 2100,
            available: 1500,
        };
        let msg = err.to_string();
        assert!(msg.contains("2100"));
        assert!(msg.contains("1500"));
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn not_found_names_kind() {
        let err = DispatchError::not_found("trip", "abc");
        assert_eq!(err.to_string(), "trip not found: abc");
    }

    #[test]
    fn expired_is_gone() {
        assert_eq!(
            DispatchError::Expired("offer".into()).status_code(),
            StatusCode::GONE
        );
    }
}
