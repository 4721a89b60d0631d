//! crates/guide_access_core/src/gateway.rs
//!
//! The Access Gateway: the single entry point content requests pass through.
//!
//! Each request moves `Received -> TokenResolved -> Authorized -> Released`.
//! Any failure short-circuits to a [`Denial`] that records the last phase the
//! request reached and the specific reason.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::TransactionBroker;
use crate::domain::{
    CheckoutTicket, ContentBody, ContentFormat, ContentItem, PaymentMode, Token, Transaction,
};
use crate::error::{AccessError, AccessResult};
use crate::ledger::QuotaLedger;
use crate::ports::{ContentCatalog, PortError};
use crate::registry::TokenRegistry;

//=========================================================================================
// Request, Outcome and Denial Types
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPhase {
    Received,
    TokenResolved,
    Authorized,
    Released,
}

impl AccessPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessPhase::Received => "received",
            AccessPhase::TokenResolved => "token_resolved",
            AccessPhase::Authorized => "authorized",
            AccessPhase::Released => "released",
        }
    }
}

impl fmt::Display for AccessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub credential: String,
    pub item_id: Uuid,
    pub format: ContentFormat,
    pub transaction_id: Option<Uuid>,
}

/// Metadata returned alongside released content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessInfo {
    Prepaid {
        first_access: bool,
        remaining_quota: u32,
    },
    PayPerItem {
        transaction: Transaction,
    },
}

#[derive(Debug, Clone)]
pub struct Released {
    pub token_id: Uuid,
    pub item: ContentItem,
    pub body: ContentBody,
    pub access: AccessInfo,
}

/// A refused request: where it stopped and why.
#[derive(Debug, thiserror::Error)]
#[error("access denied after {phase}: {reason}")]
pub struct Denial {
    pub phase: AccessPhase,
    #[source]
    pub reason: AccessError,
}

impl Denial {
    fn at(phase: AccessPhase) -> impl FnOnce(AccessError) -> Denial {
        move |reason| Denial { phase, reason }
    }
}

//=========================================================================================
// The Gateway
//=========================================================================================

pub struct AccessGateway {
    registry: Arc<TokenRegistry>,
    ledger: Arc<QuotaLedger>,
    broker: Arc<TransactionBroker>,
    catalog: Arc<dyn ContentCatalog>,
}

impl AccessGateway {
    pub fn new(
        registry: Arc<TokenRegistry>,
        ledger: Arc<QuotaLedger>,
        broker: Arc<TransactionBroker>,
        catalog: Arc<dyn ContentCatalog>,
    ) -> Self {
        Self {
            registry,
            ledger,
            broker,
            catalog,
        }
    }

    /// Authorizes a content request and releases the body.
    pub async fn access(&self, request: AccessRequest) -> Result<Released, Denial> {
        let outcome = self.run(&request).await;
        if let Err(denial) = &outcome {
            warn!(
                item_id = %request.item_id,
                format = request.format.as_str(),
                phase = %denial.phase,
                code = denial.reason.code(),
                "Denied content request: {}",
                denial.reason
            );
        }
        outcome
    }

    async fn run(&self, request: &AccessRequest) -> Result<Released, Denial> {
        // Received -> TokenResolved
        let token = self
            .registry
            .resolve(&request.credential)
            .await
            .map_err(Denial::at(AccessPhase::Received))?;

        // TokenResolved -> Authorized
        let item = self
            .scoped_item(&token, request.item_id, request.format)
            .await
            .map_err(Denial::at(AccessPhase::TokenResolved))?;
        // The body is loaded before any charge so a missing format costs nothing.
        let body = self
            .catalog
            .fetch_content(item.id, request.format)
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => AccessError::ItemNotFound(item.id),
                other => AccessError::Port(other),
            })
            .map_err(Denial::at(AccessPhase::TokenResolved))?;
        let access = self
            .authorize(&token, &item, request.transaction_id)
            .await
            .map_err(Denial::at(AccessPhase::TokenResolved))?;

        // Authorized -> Released

        info!(
            token_id = %token.id,
            item_id = %item.id,
            format = request.format.as_str(),
            "Released content"
        );
        Ok(Released {
            token_id: token.id,
            item,
            body,
            access,
        })
    }

    /// Looks up the item and checks it against the token's type and category scope.
    async fn scoped_item(
        &self,
        token: &Token,
        item_id: Uuid,
        format: ContentFormat,
    ) -> AccessResult<ContentItem> {
        let item = self
            .catalog
            .get_item(item_id)
            .await?
            .ok_or(AccessError::ItemNotFound(item_id))?;

        if !token.permits_format(format) {
            return Err(AccessError::ScopeViolation(format!(
                "{} token cannot read {} content",
                token.content_type.as_str(),
                format.as_str()
            )));
        }
        if !token.permits_category(item.category_id) {
            return Err(AccessError::ScopeViolation(format!(
                "category {} is outside the token allowlist",
                item.category_id
            )));
        }
        Ok(item)
    }

    async fn authorize(
        &self,
        token: &Token,
        item: &ContentItem,
        transaction_id: Option<Uuid>,
    ) -> AccessResult<AccessInfo> {
        match token.payment_mode {
            PaymentMode::Prepaid => {
                let reservation = self.ledger.check_and_reserve(token.id, item.id).await?;
                Ok(AccessInfo::Prepaid {
                    first_access: reservation.first_access,
                    remaining_quota: reservation.remaining_quota,
                })
            }
            PaymentMode::PayPerItem => {
                let transaction_id = transaction_id.ok_or(AccessError::PaymentRequired)?;
                let transaction = self
                    .broker
                    .authorize(transaction_id, token.id, item.id)
                    .await?;
                Ok(AccessInfo::PayPerItem { transaction })
            }
        }
    }

    /// Opens a checkout for an item, priced from the catalog.
    pub async fn checkout(
        &self,
        credential: &str,
        item_id: Uuid,
        format: ContentFormat,
    ) -> AccessResult<CheckoutTicket> {
        let token = self.registry.resolve(credential).await?;
        let item = self
            .catalog
            .get_item(item_id)
            .await?
            .ok_or(AccessError::ItemNotFound(item_id))?;
        let price = item.price.clone();
        self.broker.create_checkout(&token, &item, format, price).await
    }

    /// Remaining prepaid quota for the bearer.
    pub async fn quota(&self, credential: &str) -> AccessResult<u32> {
        let token = self.registry.resolve(credential).await?;
        match token.payment_mode {
            PaymentMode::Prepaid => self.ledger.get_remaining(token.id).await,
            PaymentMode::PayPerItem => Err(AccessError::ScopeViolation(
                "pay-per-item tokens have no quota".to_string(),
            )),
        }
    }

    /// A transaction as seen by the token that opened it.
    pub async fn transaction(
        &self,
        credential: &str,
        transaction_id: Uuid,
    ) -> AccessResult<Transaction> {
        let token = self.registry.resolve(credential).await?;
        self.broker.status_for(transaction_id, token.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::RetryPolicy;
    use crate::domain::{
        CheckoutSession, ContentType, Price, ProviderResult, TransactionStatus,
    };
    use crate::memory::MemoryStore;
    use crate::ports::{PaymentProvider, PortResult};
    use crate::registry::{IssuedToken, TokenSpec};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{DateTime, Utc};
    use std::collections::BTreeSet;
    use std::time::Duration;

    struct FixedProvider;

    #[async_trait]
    impl PaymentProvider for FixedProvider {
        async fn create_checkout_session(
            &self,
            transaction_id: Uuid,
            _item: &ContentItem,
            _price: &Price,
            _expires_at: DateTime<Utc>,
        ) -> PortResult<CheckoutSession> {
            Ok(CheckoutSession {
                checkout_url: format!("https://pay.example/{}", transaction_id),
                provider_reference: None,
            })
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<TokenRegistry>,
        broker: Arc<TransactionBroker>,
        gateway: AccessGateway,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let registry = Arc::new(TokenRegistry::new(store.clone(), Duration::from_secs(30)));
            let ledger = Arc::new(QuotaLedger::new(store.clone()));
            let broker = Arc::new(TransactionBroker::new(
                store.clone(),
                Arc::new(FixedProvider),
                chrono::Duration::seconds(1800),
                RetryPolicy::default(),
            ));
            let gateway =
                AccessGateway::new(registry.clone(), ledger, broker.clone(), store.clone());
            Self {
                store,
                registry,
                broker,
                gateway,
            }
        }

        async fn token(
            &self,
            content_type: ContentType,
            total_quota: Option<u32>,
            categories: &[Uuid],
        ) -> IssuedToken {
            let payment_mode = if total_quota.is_some() {
                PaymentMode::Prepaid
            } else {
                PaymentMode::PayPerItem
            };
            self.registry
                .issue(TokenSpec {
                    label: "fixture".to_string(),
                    content_type,
                    payment_mode,
                    allowed_categories: categories.iter().copied().collect::<BTreeSet<_>>(),
                    total_quota,
                    expires_at: None,
                })
                .await
                .unwrap()
        }

        async fn item(&self, category_id: Uuid) -> ContentItem {
            let item = ContentItem {
                id: Uuid::new_v4(),
                category_id,
                title: "Porto in two days".to_string(),
                price: Price {
                    amount: 999,
                    currency: "eur".to_string(),
                },
            };
            self.store
                .upsert_item(
                    item.clone(),
                    Some(r#"{"sections":[]}"#.to_string()),
                    Some("<h1>Porto</h1>".to_string()),
                )
                .await
                .unwrap();
            self.store
                .store_pdf(item.id, Bytes::from_static(b"%PDF-1.7"))
                .await
                .unwrap();
            item
        }
    }

    fn request(credential: &str, item_id: Uuid, format: ContentFormat) -> AccessRequest {
        AccessRequest {
            credential: credential.to_string(),
            item_id,
            format,
            transaction_id: None,
        }
    }

    #[tokio::test]
    async fn prepaid_first_access_then_free_repeat() {
        let fx = Fixture::new();
        let t1 = fx.token(ContentType::Pdf, Some(5), &[]).await;
        let i1 = fx.item(Uuid::new_v4()).await;

        let released = fx
            .gateway
            .access(request(&t1.credential, i1.id, ContentFormat::Pdf))
            .await
            .unwrap();
        assert_eq!(
            released.access,
            AccessInfo::Prepaid {
                first_access: true,
                remaining_quota: 4
            }
        );
        assert_eq!(released.body, ContentBody::Pdf(Bytes::from_static(b"%PDF-1.7")));

        let repeat = fx
            .gateway
            .access(request(&t1.credential, i1.id, ContentFormat::Pdf))
            .await
            .unwrap();
        assert_eq!(
            repeat.access,
            AccessInfo::Prepaid {
                first_access: false,
                remaining_quota: 4
            }
        );
    }

    #[tokio::test]
    async fn exhausted_quota_is_denied_after_token_resolution() {
        let fx = Fixture::new();
        let token = fx.token(ContentType::HtmlJson, Some(1), &[]).await;
        let first = fx.item(Uuid::new_v4()).await;
        let second = fx.item(Uuid::new_v4()).await;

        fx.gateway
            .access(request(&token.credential, first.id, ContentFormat::Json))
            .await
            .unwrap();
        let denial = fx
            .gateway
            .access(request(&token.credential, second.id, ContentFormat::Html))
            .await
            .unwrap_err();
        assert_eq!(denial.phase, AccessPhase::TokenResolved);
        assert_eq!(denial.reason.code(), "QuotaExhausted");
    }

    #[tokio::test]
    async fn unknown_credential_is_denied_on_receipt() {
        let fx = Fixture::new();
        let item = fx.item(Uuid::new_v4()).await;
        let denial = fx
            .gateway
            .access(request("gat_unknown", item.id, ContentFormat::Pdf))
            .await
            .unwrap_err();
        assert_eq!(denial.phase, AccessPhase::Received);
        assert_eq!(denial.reason.code(), "TokenInvalid");
    }

    #[tokio::test]
    async fn wrong_format_or_category_is_a_scope_violation_and_costs_nothing() {
        let fx = Fixture::new();
        let allowed = Uuid::new_v4();
        let token = fx.token(ContentType::Pdf, Some(3), &[allowed]).await;
        let inside = fx.item(allowed).await;
        let outside = fx.item(Uuid::new_v4()).await;

        let denial = fx
            .gateway
            .access(request(&token.credential, inside.id, ContentFormat::Json))
            .await
            .unwrap_err();
        assert_eq!(denial.reason.code(), "ScopeViolation");

        let denial = fx
            .gateway
            .access(request(&token.credential, outside.id, ContentFormat::Pdf))
            .await
            .unwrap_err();
        assert_eq!(denial.reason.code(), "ScopeViolation");

        assert_eq!(fx.gateway.quota(&token.credential).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn missing_item_is_reported() {
        let fx = Fixture::new();
        let token = fx.token(ContentType::Pdf, Some(3), &[]).await;
        let denial = fx
            .gateway
            .access(request(&token.credential, Uuid::new_v4(), ContentFormat::Pdf))
            .await
            .unwrap_err();
        assert_eq!(denial.reason.code(), "ItemNotFound");
    }

    #[tokio::test]
    async fn pay_per_item_requires_a_paid_transaction() {
        let fx = Fixture::new();
        let t2 = fx.token(ContentType::Pdf, None, &[]).await;
        let i5 = fx.item(Uuid::new_v4()).await;

        let denial = fx
            .gateway
            .access(request(&t2.credential, i5.id, ContentFormat::Pdf))
            .await
            .unwrap_err();
        assert_eq!(denial.reason.code(), "PaymentRequired");

        let ticket = fx
            .gateway
            .checkout(&t2.credential, i5.id, ContentFormat::Pdf)
            .await
            .unwrap();
        assert_eq!(ticket.status, TransactionStatus::Pending);

        let mut paid_request = request(&t2.credential, i5.id, ContentFormat::Pdf);
        paid_request.transaction_id = Some(ticket.transaction_id);
        let denial = fx.gateway.access(paid_request.clone()).await.unwrap_err();
        assert_eq!(denial.reason.code(), "NotPaid");

        fx.broker
            .confirm_payment(ticket.transaction_id, ProviderResult::Paid)
            .await
            .unwrap();

        let released = fx.gateway.access(paid_request).await.unwrap();
        match released.access {
            AccessInfo::PayPerItem { transaction } => {
                assert_eq!(transaction.id, ticket.transaction_id);
                assert_eq!(transaction.amount, 999);
                assert!(transaction.paid_at.is_some());
            }
            other => panic!("expected pay-per-item access, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn a_paid_transaction_does_not_unlock_other_items() {
        let fx = Fixture::new();
        let token = fx.token(ContentType::Pdf, None, &[]).await;
        let bought = fx.item(Uuid::new_v4()).await;
        let other = fx.item(Uuid::new_v4()).await;

        let ticket = fx
            .gateway
            .checkout(&token.credential, bought.id, ContentFormat::Pdf)
            .await
            .unwrap();
        fx.broker
            .confirm_payment(ticket.transaction_id, ProviderResult::Paid)
            .await
            .unwrap();

        let mut req = request(&token.credential, other.id, ContentFormat::Pdf);
        req.transaction_id = Some(ticket.transaction_id);
        let denial = fx.gateway.access(req).await.unwrap_err();
        assert_eq!(denial.reason.code(), "ItemMismatch");
    }

    #[tokio::test]
    async fn missing_body_is_item_not_found_and_costs_nothing() {
        let fx = Fixture::new();
        let token = fx.token(ContentType::HtmlJson, Some(2), &[]).await;
        let item = ContentItem {
            id: Uuid::new_v4(),
            category_id: Uuid::new_v4(),
            title: "Metadata only".to_string(),
            price: Price {
                amount: 100,
                currency: "eur".to_string(),
            },
        };
        fx.store.upsert_item(item.clone(), None, None).await.unwrap();

        let denial = fx
            .gateway
            .access(request(&token.credential, item.id, ContentFormat::Html))
            .await
            .unwrap_err();
        assert_eq!(denial.phase, AccessPhase::TokenResolved);
        assert_eq!(denial.reason.code(), "ItemNotFound");
        assert_eq!(fx.gateway.quota(&token.credential).await.unwrap(), 2);

        // The same guide is still a first access once its body exists.
        fx.store
            .upsert_item(item.clone(), None, Some("<p>Evora</p>".to_string()))
            .await
            .unwrap();
        let released = fx
            .gateway
            .access(request(&token.credential, item.id, ContentFormat::Html))
            .await
            .unwrap();
        assert_eq!(
            released.access,
            AccessInfo::Prepaid {
                first_access: true,
                remaining_quota: 1
            }
        );
    }

    #[tokio::test]
    async fn quota_lookup_is_only_for_prepaid_tokens() {
        let fx = Fixture::new();
        let token = fx.token(ContentType::Pdf, None, &[]).await;
        let err = fx.gateway.quota(&token.credential).await.unwrap_err();
        assert!(matches!(err, AccessError::ScopeViolation(_)));
    }

    #[tokio::test]
    async fn transactions_are_private_to_their_token() {
        let fx = Fixture::new();
        let owner = fx.token(ContentType::Pdf, None, &[]).await;
        let stranger = fx.token(ContentType::Pdf, None, &[]).await;
        let item = fx.item(Uuid::new_v4()).await;
        let ticket = fx
            .gateway
            .checkout(&owner.credential, item.id, ContentFormat::Pdf)
            .await
            .unwrap();

        let seen = fx
            .gateway
            .transaction(&owner.credential, ticket.transaction_id)
            .await
            .unwrap();
        assert_eq!(seen.status, TransactionStatus::Pending);

        let err = fx
            .gateway
            .transaction(&stranger.credential, ticket.transaction_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::TokenMismatch));
    }
}
