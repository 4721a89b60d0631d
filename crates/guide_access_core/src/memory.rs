//! crates/guide_access_core/src/memory.rs
//!
//! An in-process implementation of every storage port. Used by the test suites
//! and for running the service without a database.
//!
//! Reservations lock one shard per token so first accesses under different
//! tokens never contend; transaction resolution is a compare-and-swap under a
//! single short write lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::{
    AccessRecord, ContentBody, ContentFormat, ContentItem, NewToken, QuotaAccount, Token,
    Transaction, TransactionStatus,
};
use crate::ports::{
    ContentCatalog, PortError, PortResult, QuotaStore, ReserveOutcome, TokenStore,
    TransactionStore,
};

#[derive(Default)]
struct TokenTable {
    by_id: HashMap<Uuid, Token>,
    by_hash: HashMap<String, Uuid>,
}

struct QuotaShard {
    account: QuotaAccount,
    accessed: HashMap<Uuid, AccessRecord>,
}

struct CatalogEntry {
    item: ContentItem,
    pdf: Option<Bytes>,
    json: Option<String>,
    html: Option<String>,
}

/// In-memory store implementing `TokenStore`, `QuotaStore`, `TransactionStore`
/// and `ContentCatalog`.
#[derive(Default)]
pub struct MemoryStore {
    tokens: RwLock<TokenTable>,
    quotas: Mutex<HashMap<Uuid, Arc<Mutex<QuotaShard>>>>,
    transactions: RwLock<HashMap<Uuid, Transaction>>,
    catalog: RwLock<HashMap<Uuid, CatalogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn shard(&self, token_id: Uuid) -> Option<Arc<Mutex<QuotaShard>>> {
        self.quotas.lock().await.get(&token_id).cloned()
    }

    /// Number of (token, item) pairs charged so far for `token_id`.
    pub async fn access_record_count(&self, token_id: Uuid) -> usize {
        match self.shard(token_id).await {
            Some(shard) => shard.lock().await.accessed.len(),
            None => 0,
        }
    }

    pub async fn access_record(&self, token_id: Uuid, item_id: Uuid) -> Option<AccessRecord> {
        let shard = self.shard(token_id).await?;
        let shard = shard.lock().await;
        shard.accessed.get(&item_id).cloned()
    }
}

//=========================================================================================
// `TokenStore` Implementation
//=========================================================================================

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert_token(&self, new_token: NewToken) -> PortResult<Token> {
        let mut table = self.tokens.write().await;
        if table.by_hash.contains_key(&new_token.credential_hash) {
            return Err(PortError::Unexpected("credential hash collision".to_string()));
        }
        let token = new_token.token;

        if let Some(total_quota) = new_token.total_quota {
            let shard = QuotaShard {
                account: QuotaAccount {
                    token_id: token.id,
                    total_quota,
                    remaining_quota: total_quota,
                },
                accessed: HashMap::new(),
            };
            self.quotas
                .lock()
                .await
                .insert(token.id, Arc::new(Mutex::new(shard)));
        }

        table.by_hash.insert(new_token.credential_hash, token.id);
        table.by_id.insert(token.id, token.clone());
        Ok(token)
    }

    async fn find_by_credential_hash(&self, credential_hash: &str) -> PortResult<Option<Token>> {
        let table = self.tokens.read().await;
        Ok(table
            .by_hash
            .get(credential_hash)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn get_token(&self, token_id: Uuid) -> PortResult<Option<Token>> {
        Ok(self.tokens.read().await.by_id.get(&token_id).cloned())
    }

    async fn set_active(&self, token_id: Uuid, is_active: bool) -> PortResult<Token> {
        let mut table = self.tokens.write().await;
        let token = table
            .by_id
            .get_mut(&token_id)
            .ok_or_else(|| PortError::NotFound(format!("Token {} not found", token_id)))?;
        token.is_active = is_active;
        Ok(token.clone())
    }

    async fn set_allowed_categories(
        &self,
        token_id: Uuid,
        categories: BTreeSet<Uuid>,
    ) -> PortResult<Token> {
        let mut table = self.tokens.write().await;
        let token = table
            .by_id
            .get_mut(&token_id)
            .ok_or_else(|| PortError::NotFound(format!("Token {} not found", token_id)))?;
        token.allowed_categories = categories;
        Ok(token.clone())
    }
}

//=========================================================================================
// `QuotaStore` Implementation
//=========================================================================================

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn reserve_first_access(
        &self,
        token_id: Uuid,
        item_id: Uuid,
        at: DateTime<Utc>,
    ) -> PortResult<ReserveOutcome> {
        let shard = self.shard(token_id).await.ok_or_else(|| {
            PortError::NotFound(format!("Quota account for token {} not found", token_id))
        })?;
        let mut shard = shard.lock().await;

        if shard.accessed.contains_key(&item_id) {
            return Ok(ReserveOutcome::AlreadyAccessed {
                remaining_quota: shard.account.remaining_quota,
            });
        }
        if shard.account.remaining_quota == 0 {
            return Ok(ReserveOutcome::Exhausted);
        }

        shard.accessed.insert(
            item_id,
            AccessRecord {
                token_id,
                item_id,
                first_accessed_at: at,
            },
        );
        shard.account.remaining_quota -= 1;
        Ok(ReserveOutcome::Reserved {
            remaining_quota: shard.account.remaining_quota,
        })
    }

    async fn get_account(&self, token_id: Uuid) -> PortResult<Option<QuotaAccount>> {
        match self.shard(token_id).await {
            Some(shard) => Ok(Some(shard.lock().await.account)),
            None => Ok(None),
        }
    }
}

//=========================================================================================
// `TransactionStore` Implementation
//=========================================================================================

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert_transaction(&self, transaction: Transaction) -> PortResult<Transaction> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&transaction.id) {
            return Err(PortError::Unexpected(format!(
                "Transaction {} already exists",
                transaction.id
            )));
        }
        transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn get_transaction(&self, transaction_id: Uuid) -> PortResult<Option<Transaction>> {
        Ok(self.transactions.read().await.get(&transaction_id).cloned())
    }

    async fn resolve_pending(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> PortResult<Option<Transaction>> {
        let mut transactions = self.transactions.write().await;
        match transactions.get_mut(&transaction_id) {
            Some(tx) if !tx.status.is_terminal() => {
                tx.status = status;
                tx.resolved_at = Some(at);
                if status == TransactionStatus::Paid {
                    tx.paid_at = Some(at);
                }
                Ok(Some(tx.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expire_pending(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let mut transactions = self.transactions.write().await;
        let mut expired = 0;
        for tx in transactions.values_mut() {
            if !tx.status.is_terminal() && tx.expires_at <= now {
                tx.status = TransactionStatus::Expired;
                tx.resolved_at = Some(now);
                expired += 1;
            }
        }
        Ok(expired)
    }
}

//=========================================================================================
// `ContentCatalog` Implementation
//=========================================================================================

#[async_trait]
impl ContentCatalog for MemoryStore {
    async fn get_item(&self, item_id: Uuid) -> PortResult<Option<ContentItem>> {
        Ok(self
            .catalog
            .read()
            .await
            .get(&item_id)
            .map(|entry| entry.item.clone()))
    }

    async fn fetch_content(&self, item_id: Uuid, format: ContentFormat) -> PortResult<ContentBody> {
        let catalog = self.catalog.read().await;
        let entry = catalog
            .get(&item_id)
            .ok_or_else(|| PortError::NotFound(format!("Content item {} not found", item_id)))?;

        let body = match format {
            ContentFormat::Pdf => entry.pdf.clone().map(ContentBody::Pdf),
            ContentFormat::Json => entry.json.clone().map(ContentBody::Json),
            ContentFormat::Html => entry.html.clone().map(ContentBody::Html),
        };
        body.ok_or_else(|| {
            PortError::NotFound(format!(
                "Content item {} has no {} body",
                item_id,
                format.as_str()
            ))
        })
    }

    async fn upsert_item(
        &self,
        item: ContentItem,
        json: Option<String>,
        html: Option<String>,
    ) -> PortResult<ContentItem> {
        let mut catalog = self.catalog.write().await;
        match catalog.get_mut(&item.id) {
            Some(entry) => {
                entry.item = item.clone();
                if json.is_some() {
                    entry.json = json;
                }
                if html.is_some() {
                    entry.html = html;
                }
            }
            None => {
                catalog.insert(
                    item.id,
                    CatalogEntry {
                        item: item.clone(),
                        pdf: None,
                        json,
                        html,
                    },
                );
            }
        }
        Ok(item)
    }

    async fn store_pdf(&self, item_id: Uuid, pdf: Bytes) -> PortResult<()> {
        let mut catalog = self.catalog.write().await;
        let entry = catalog
            .get_mut(&item_id)
            .ok_or_else(|| PortError::NotFound(format!("Content item {} not found", item_id)))?;
        entry.pdf = Some(pdf);
        Ok(())
    }
}
