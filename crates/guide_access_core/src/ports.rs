//! crates/guide_access_core/src/ports.rs
//!
//! Defines the service contracts (traits) the entitlement core depends on.
//! These traits form the boundary of the hexagonal architecture: the core never
//! talks to a database or a payment provider directly.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    CheckoutSession, ContentBody, ContentFormat, ContentItem, NewToken, Price, QuotaAccount,
    Token, Transaction, TransactionStatus,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A failure that may go away on retry (timeouts, 5xx, dropped connections).
    #[error("Service temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Unavailable(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Storage Outcomes
//=========================================================================================

/// Result of the atomic insert-if-absent + decrement on a (token, item) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The pair was new; a record was written and one unit deducted.
    Reserved { remaining_quota: u32 },
    /// A record already existed; nothing changed.
    AlreadyAccessed { remaining_quota: u32 },
    /// The pair was new but the balance is zero; nothing was written.
    Exhausted,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persists the token and, for prepaid tokens, its quota account in one unit.
    async fn insert_token(&self, new_token: NewToken) -> PortResult<Token>;

    async fn find_by_credential_hash(&self, credential_hash: &str) -> PortResult<Option<Token>>;

    async fn get_token(&self, token_id: Uuid) -> PortResult<Option<Token>>;

    async fn set_active(&self, token_id: Uuid, is_active: bool) -> PortResult<Token>;

    async fn set_allowed_categories(
        &self,
        token_id: Uuid,
        categories: BTreeSet<Uuid>,
    ) -> PortResult<Token>;
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Creates the access record and decrements the balance as one atomic unit,
    /// or reports that the pair was already charged. Concurrent calls for the
    /// same pair must produce exactly one `Reserved`.
    async fn reserve_first_access(
        &self,
        token_id: Uuid,
        item_id: Uuid,
        at: DateTime<Utc>,
    ) -> PortResult<ReserveOutcome>;

    async fn get_account(&self, token_id: Uuid) -> PortResult<Option<QuotaAccount>>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert_transaction(&self, transaction: Transaction) -> PortResult<Transaction>;

    async fn get_transaction(&self, transaction_id: Uuid) -> PortResult<Option<Transaction>>;

    /// Compare-and-swap from `pending` to `status`. Returns `None` when the
    /// transaction was not pending (or does not exist).
    async fn resolve_pending(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> PortResult<Option<Transaction>>;

    /// Moves every pending transaction whose deadline is at or before `now` to
    /// `expired`, returning how many changed.
    async fn expire_pending(&self, now: DateTime<Utc>) -> PortResult<u64>;
}

#[async_trait]
pub trait ContentCatalog: Send + Sync {
    async fn get_item(&self, item_id: Uuid) -> PortResult<Option<ContentItem>>;

    /// Fetches the stored body. `NotFound` when the item has no body in `format`.
    async fn fetch_content(&self, item_id: Uuid, format: ContentFormat) -> PortResult<ContentBody>;

    async fn upsert_item(
        &self,
        item: ContentItem,
        json: Option<String>,
        html: Option<String>,
    ) -> PortResult<ContentItem>;

    async fn store_pdf(&self, item_id: Uuid, pdf: Bytes) -> PortResult<()>;
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Opens a hosted checkout session for one transaction.
    async fn create_checkout_session(
        &self,
        transaction_id: Uuid,
        item: &ContentItem,
        price: &Price,
        expires_at: DateTime<Utc>,
    ) -> PortResult<CheckoutSession>;
}
