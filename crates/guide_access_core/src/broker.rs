//! crates/guide_access_core/src/broker.rs
//!
//! The Transaction Broker: opens checkout sessions for pay-per-item tokens,
//! resolves them exactly once, sweeps abandoned ones and authorizes paid
//! content against them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    CheckoutSession, CheckoutTicket, ContentFormat, ContentItem, PaymentMode, Price,
    ProviderResult, Token, Transaction, TransactionStatus,
};
use crate::error::{AccessError, AccessResult};
use crate::ports::{PaymentProvider, TransactionStore};

/// Default lifetime of a pending checkout.
pub const DEFAULT_CHECKOUT_EXPIRY_SECS: i64 = 1800;

/// Upper bound on a single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Bounded retry for the provider callout. Only transient failures are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(MAX_RETRY_DELAY)
    }
}

pub struct TransactionBroker {
    store: Arc<dyn TransactionStore>,
    provider: Arc<dyn PaymentProvider>,
    checkout_expiry: chrono::Duration,
    retry: RetryPolicy,
}

impl TransactionBroker {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        provider: Arc<dyn PaymentProvider>,
        checkout_expiry: chrono::Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            provider,
            checkout_expiry,
            retry,
        }
    }

    /// Opens a checkout for `item` and stores the pending transaction.
    pub async fn create_checkout(
        &self,
        token: &Token,
        item: &ContentItem,
        format: ContentFormat,
        price: Price,
    ) -> AccessResult<CheckoutTicket> {
        if token.payment_mode != PaymentMode::PayPerItem {
            return Err(AccessError::TokenMismatch);
        }
        if !token.permits_category(item.category_id) {
            return Err(AccessError::ItemNotAllowed(format!(
                "category {} is outside the token allowlist",
                item.category_id
            )));
        }
        if !token.permits_format(format) {
            return Err(AccessError::ItemNotAllowed(format!(
                "{} content is outside a {} token",
                format.as_str(),
                token.content_type.as_str()
            )));
        }
        if price.amount <= 0 {
            return Err(AccessError::InvalidRequest(
                "checkout amount must be positive".to_string(),
            ));
        }

        let transaction_id = Uuid::new_v4();
        let created_at = Utc::now();
        let expires_at = created_at + self.checkout_expiry;
        let session = self
            .open_session(transaction_id, item, &price, expires_at)
            .await?;

        let transaction = self
            .store
            .insert_transaction(Transaction {
                id: transaction_id,
                token_id: token.id,
                item_id: item.id,
                format,
                status: TransactionStatus::Pending,
                amount: price.amount,
                currency: price.currency,
                checkout_url: session.checkout_url,
                provider_reference: session.provider_reference,
                created_at,
                expires_at,
                paid_at: None,
                resolved_at: None,
            })
            .await?;

        info!(
            transaction_id = %transaction.id,
            token_id = %token.id,
            item_id = %item.id,
            amount = transaction.amount,
            currency = %transaction.currency,
            "Opened checkout"
        );
        Ok(CheckoutTicket {
            transaction_id: transaction.id,
            checkout_url: transaction.checkout_url,
            expires_in_seconds: self.checkout_expiry.num_seconds(),
            status: transaction.status,
        })
    }

    async fn open_session(
        &self,
        transaction_id: Uuid,
        item: &ContentItem,
        price: &Price,
        expires_at: DateTime<Utc>,
    ) -> AccessResult<CheckoutSession> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .provider
                .create_checkout_session(transaction_id, item, price, expires_at)
                .await
            {
                Ok(session) => return Ok(session),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        transaction_id = %transaction_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Payment provider unavailable, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        transaction_id = %transaction_id,
                        attempt,
                        "Checkout could not be opened: {}",
                        e
                    );
                    return Err(AccessError::CheckoutUnavailable(e.to_string()));
                }
            }
        }
    }

    /// Resolves a pending transaction. Re-delivery of the stored outcome is a
    /// no-op; a conflicting outcome is `AlreadyResolved`.
    pub async fn confirm_payment(
        &self,
        transaction_id: Uuid,
        result: ProviderResult,
    ) -> AccessResult<Transaction> {
        let target = result.target_status();
        if let Some(transaction) = self
            .store
            .resolve_pending(transaction_id, target, Utc::now())
            .await?
        {
            info!(transaction_id = %transaction_id, status = %target, "Resolved transaction");
            return Ok(transaction);
        }

        match self.store.get_transaction(transaction_id).await? {
            None => Err(AccessError::TransactionNotFound(transaction_id)),
            Some(transaction) if transaction.status == target => {
                debug!(transaction_id = %transaction_id, "Ignoring repeated payment confirmation");
                Ok(transaction)
            }
            Some(transaction) => Err(AccessError::AlreadyResolved {
                transaction_id,
                status: transaction.status,
            }),
        }
    }

    /// Expires every pending transaction past its deadline. Safe to overlap.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> AccessResult<u64> {
        let expired = self.store.expire_pending(now).await?;
        if expired > 0 {
            info!(expired, "Expired stale checkouts");
        }
        Ok(expired)
    }

    /// Checks that `transaction_id` is a paid purchase of `item_id` by `token_id`.
    pub async fn authorize(
        &self,
        transaction_id: Uuid,
        token_id: Uuid,
        item_id: Uuid,
    ) -> AccessResult<Transaction> {
        let transaction = self.status_for(transaction_id, token_id).await?;
        if transaction.item_id != item_id {
            return Err(AccessError::ItemMismatch);
        }
        if transaction.status != TransactionStatus::Paid {
            return Err(AccessError::NotPaid {
                transaction_id,
                status: transaction.status,
            });
        }
        Ok(transaction)
    }

    /// Returns a transaction to the token that opened it.
    pub async fn status_for(
        &self,
        transaction_id: Uuid,
        token_id: Uuid,
    ) -> AccessResult<Transaction> {
        let transaction = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or(AccessError::TransactionNotFound(transaction_id))?;
        if transaction.token_id != token_id {
            return Err(AccessError::TokenMismatch);
        }
        Ok(transaction)
    }
}
