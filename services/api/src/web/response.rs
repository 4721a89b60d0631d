//! services/api/src/web/response.rs
//!
//! Maps core denials and errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use guide_access_core::{AccessError, Denial};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

/// The body of every failed request: `{"error": {"code", "message", "phase"}}`.
#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorDetail {
    /// Stable reason code, e.g. `QuotaExhausted`.
    pub code: String,
    pub message: String,
    /// Last gateway phase reached, for content requests only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// A failed request on its way out.
#[derive(Debug)]
pub struct ApiFailure {
    status: StatusCode,
    code: &'static str,
    message: String,
    phase: Option<&'static str>,
}

impl ApiFailure {
    pub fn unauthorized(message: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "Unauthorized",
            message: message.to_string(),
            phase: None,
        }
    }

    pub fn internal(message: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "Internal",
            message: message.to_string(),
            phase: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

pub fn status_for(err: &AccessError) -> StatusCode {
    match err {
        AccessError::TokenInvalid => StatusCode::UNAUTHORIZED,
        AccessError::ScopeViolation(_)
        | AccessError::ItemNotAllowed(_)
        | AccessError::QuotaExhausted
        | AccessError::TokenMismatch
        | AccessError::ItemMismatch => StatusCode::FORBIDDEN,
        AccessError::PaymentRequired | AccessError::NotPaid { .. } => StatusCode::PAYMENT_REQUIRED,
        AccessError::ItemNotFound(_)
        | AccessError::TokenNotFound(_)
        | AccessError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
        AccessError::AlreadyResolved { .. } => StatusCode::CONFLICT,
        AccessError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AccessError::CheckoutUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AccessError::Port(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<AccessError> for ApiFailure {
    fn from(err: AccessError) -> Self {
        let message = match &err {
            // Storage details stay in the logs.
            AccessError::Port(e) => {
                error!("Storage failure while serving request: {}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        Self {
            status: status_for(&err),
            code: err.code(),
            message,
            phase: None,
        }
    }
}

impl From<Denial> for ApiFailure {
    fn from(denial: Denial) -> Self {
        let phase = denial.phase.as_str();
        Self {
            phase: Some(phase),
            ..ApiFailure::from(denial.reason)
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
                phase: self.phase.map(str::to_string),
            },
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guide_access_core::{AccessPhase, PortError, TransactionStatus};
    use uuid::Uuid;

    #[test]
    fn denials_map_to_their_documented_statuses() {
        assert_eq!(status_for(&AccessError::TokenInvalid), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&AccessError::QuotaExhausted), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&AccessError::PaymentRequired), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            status_for(&AccessError::NotPaid {
                transaction_id: Uuid::new_v4(),
                status: TransactionStatus::Pending,
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_for(&AccessError::AlreadyResolved {
                transaction_id: Uuid::new_v4(),
                status: TransactionStatus::Paid,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&AccessError::CheckoutUnavailable("timeout".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn storage_details_are_not_exposed() {
        let failure = ApiFailure::from(AccessError::Port(PortError::Unexpected(
            "relation \"access_tokens\" does not exist".to_string(),
        )));
        assert_eq!(failure.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failure.code, "Internal");
        assert!(!failure.message.contains("access_tokens"));
    }

    #[test]
    fn denial_carries_its_phase() {
        let failure = ApiFailure::from(Denial {
            phase: AccessPhase::TokenResolved,
            reason: AccessError::QuotaExhausted,
        });
        assert_eq!(failure.phase, Some("token_resolved"));
        assert_eq!(failure.code, "QuotaExhausted");
    }
}
