//! crates/guide_access_core/src/error.rs
//!
//! Business-rule errors raised by the entitlement components.

use uuid::Uuid;

use crate::domain::TransactionStatus;
use crate::ports::PortError;

/// Every reason the core can refuse a request, plus storage failures.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// Unknown, inactive or expired credential.
    #[error("token is invalid, inactive or expired")]
    TokenInvalid,

    #[error("request is outside the token scope: {0}")]
    ScopeViolation(String),

    #[error("prepaid quota exhausted")]
    QuotaExhausted,

    #[error("this content requires a paid transaction")]
    PaymentRequired,

    #[error("transaction {transaction_id} is {status}, not paid")]
    NotPaid {
        transaction_id: Uuid,
        status: TransactionStatus,
    },

    #[error("item is not available to this token: {0}")]
    ItemNotAllowed(String),

    #[error("content item {0} not found")]
    ItemNotFound(Uuid),

    #[error("token {0} not found")]
    TokenNotFound(Uuid),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("transaction {transaction_id} is already {status}")]
    AlreadyResolved {
        transaction_id: Uuid,
        status: TransactionStatus,
    },

    #[error("transaction was issued for a different item")]
    ItemMismatch,

    #[error("transaction or operation does not belong to this token")]
    TokenMismatch,

    /// The payment provider could not open a session after bounded retries.
    #[error("checkout unavailable: {0}")]
    CheckoutUnavailable(String),

    #[error(transparent)]
    Port(#[from] PortError),
}

impl AccessError {
    /// Stable reason code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            AccessError::TokenInvalid => "TokenInvalid",
            AccessError::ScopeViolation(_) => "ScopeViolation",
            AccessError::QuotaExhausted => "QuotaExhausted",
            AccessError::PaymentRequired => "PaymentRequired",
            AccessError::NotPaid { .. } => "NotPaid",
            AccessError::ItemNotAllowed(_) => "ItemNotAllowed",
            AccessError::ItemNotFound(_) => "ItemNotFound",
            AccessError::TokenNotFound(_) => "TokenNotFound",
            AccessError::InvalidRequest(_) => "InvalidRequest",
            AccessError::TransactionNotFound(_) => "TransactionNotFound",
            AccessError::AlreadyResolved { .. } => "AlreadyResolved",
            AccessError::ItemMismatch => "ItemMismatch",
            AccessError::TokenMismatch => "TokenMismatch",
            AccessError::CheckoutUnavailable(_) => "CheckoutUnavailable",
            AccessError::Port(_) => "Internal",
        }
    }

    /// Only provider outages and transient storage failures are worth retrying.
    /// Business-rule denials never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            AccessError::CheckoutUnavailable(_) => true,
            AccessError::Port(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type AccessResult<T> = Result<T, AccessError>;
