//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of the
//! storage ports from the `core` crate. It handles all interactions with the
//! PostgreSQL database using `sqlx`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use guide_access_core::domain::{
    ContentBody, ContentFormat, ContentItem, NewToken, Price, QuotaAccount, Token, Transaction,
    TransactionStatus,
};
use guide_access_core::ports::{
    ContentCatalog, PortError, PortResult, QuotaStore, ReserveOutcome, TokenStore,
    TransactionStore,
};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements every storage port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Pool exhaustion and dropped connections are worth retrying; everything else is not.
fn port_err(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn to_u32(value: i32, column: &str) -> PortResult<u32> {
    u32::try_from(value)
        .map_err(|_| PortError::Unexpected(format!("negative {} in database: {}", column, value)))
}

fn parse_label<T>(value: &str) -> PortResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| PortError::Unexpected(e.to_string()))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const TOKEN_COLUMNS: &str =
    "id, label, content_type, payment_mode, allowed_categories, is_active, expires_at, created_at";

#[derive(FromRow)]
struct TokenRecord {
    id: Uuid,
    label: String,
    content_type: String,
    payment_mode: String,
    allowed_categories: Vec<Uuid>,
    is_active: bool,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}
impl TokenRecord {
    fn to_domain(self) -> PortResult<Token> {
        Ok(Token {
            id: self.id,
            label: self.label,
            content_type: parse_label(&self.content_type)?,
            payment_mode: parse_label(&self.payment_mode)?,
            allowed_categories: self.allowed_categories.into_iter().collect(),
            is_active: self.is_active,
            expires_at: self.expires_at,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct QuotaRecord {
    token_id: Uuid,
    total_quota: i32,
    remaining_quota: i32,
}
impl QuotaRecord {
    fn to_domain(self) -> PortResult<QuotaAccount> {
        Ok(QuotaAccount {
            token_id: self.token_id,
            total_quota: to_u32(self.total_quota, "total_quota")?,
            remaining_quota: to_u32(self.remaining_quota, "remaining_quota")?,
        })
    }
}

const TRANSACTION_COLUMNS: &str = "id, token_id, item_id, content_format, status, amount, currency, \
     checkout_url, provider_reference, created_at, expires_at, paid_at, resolved_at";

#[derive(FromRow)]
struct TransactionRecord {
    id: Uuid,
    token_id: Uuid,
    item_id: Uuid,
    content_format: String,
    status: String,
    amount: i64,
    currency: String,
    checkout_url: String,
    provider_reference: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
}
impl TransactionRecord {
    fn to_domain(self) -> PortResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            token_id: self.token_id,
            item_id: self.item_id,
            format: parse_label(&self.content_format)?,
            status: parse_label(&self.status)?,
            amount: self.amount,
            currency: self.currency,
            checkout_url: self.checkout_url,
            provider_reference: self.provider_reference,
            created_at: self.created_at,
            expires_at: self.expires_at,
            paid_at: self.paid_at,
            resolved_at: self.resolved_at,
        })
    }
}

#[derive(FromRow)]
struct ContentItemRecord {
    id: Uuid,
    category_id: Uuid,
    title: String,
    price_amount: i64,
    currency: String,
}
impl ContentItemRecord {
    fn to_domain(self) -> ContentItem {
        ContentItem {
            id: self.id,
            category_id: self.category_id,
            title: self.title,
            price: Price {
                amount: self.price_amount,
                currency: self.currency,
            },
        }
    }
}

//=========================================================================================
// `TokenStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl TokenStore for DbAdapter {
    async fn insert_token(&self, new_token: NewToken) -> PortResult<Token> {
        let token = new_token.token;
        let categories: Vec<Uuid> = token.allowed_categories.iter().copied().collect();

        let mut tx = self.pool.begin().await.map_err(port_err)?;
        let record = sqlx::query_as::<_, TokenRecord>(&format!(
            "INSERT INTO access_tokens \
             (id, credential_hash, label, content_type, payment_mode, allowed_categories, is_active, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(token.id)
        .bind(&new_token.credential_hash)
        .bind(&token.label)
        .bind(token.content_type.as_str())
        .bind(token.payment_mode.as_str())
        .bind(&categories)
        .bind(token.is_active)
        .bind(token.expires_at)
        .bind(token.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err)?;

        if let Some(total_quota) = new_token.total_quota {
            let total = i32::try_from(total_quota)
                .map_err(|_| PortError::Unexpected(format!("quota {} too large", total_quota)))?;
            sqlx::query(
                "INSERT INTO quota_accounts (token_id, total_quota, remaining_quota) VALUES ($1, $2, $2)",
            )
            .bind(token.id)
            .bind(total)
            .execute(&mut *tx)
            .await
            .map_err(port_err)?;
        }

        tx.commit().await.map_err(port_err)?;
        record.to_domain()
    }

    async fn find_by_credential_hash(&self, credential_hash: &str) -> PortResult<Option<Token>> {
        sqlx::query_as::<_, TokenRecord>(&format!(
            "SELECT {} FROM access_tokens WHERE credential_hash = $1",
            TOKEN_COLUMNS
        ))
        .bind(credential_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_err)?
        .map(TokenRecord::to_domain)
        .transpose()
    }

    async fn get_token(&self, token_id: Uuid) -> PortResult<Option<Token>> {
        sqlx::query_as::<_, TokenRecord>(&format!(
            "SELECT {} FROM access_tokens WHERE id = $1",
            TOKEN_COLUMNS
        ))
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_err)?
        .map(TokenRecord::to_domain)
        .transpose()
    }

    async fn set_active(&self, token_id: Uuid, is_active: bool) -> PortResult<Token> {
        sqlx::query_as::<_, TokenRecord>(&format!(
            "UPDATE access_tokens SET is_active = $2 WHERE id = $1 RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(token_id)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_err)?
        .ok_or_else(|| PortError::NotFound(format!("Token {} not found", token_id)))?
        .to_domain()
    }

    async fn set_allowed_categories(
        &self,
        token_id: Uuid,
        categories: BTreeSet<Uuid>,
    ) -> PortResult<Token> {
        let categories: Vec<Uuid> = categories.into_iter().collect();
        sqlx::query_as::<_, TokenRecord>(&format!(
            "UPDATE access_tokens SET allowed_categories = $2 WHERE id = $1 RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(token_id)
        .bind(&categories)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_err)?
        .ok_or_else(|| PortError::NotFound(format!("Token {} not found", token_id)))?
        .to_domain()
    }
}

//=========================================================================================
// `QuotaStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl QuotaStore for DbAdapter {
    /// Runs the insert and the conditional decrement in one transaction. A
    /// concurrent insert of the same pair blocks on the primary key until the
    /// first transaction ends, then falls through to `DO NOTHING`.
    async fn reserve_first_access(
        &self,
        token_id: Uuid,
        item_id: Uuid,
        at: DateTime<Utc>,
    ) -> PortResult<ReserveOutcome> {
        let mut tx = self.pool.begin().await.map_err(port_err)?;

        let inserted = sqlx::query(
            "INSERT INTO access_records (token_id, item_id, first_accessed_at) VALUES ($1, $2, $3) \
             ON CONFLICT (token_id, item_id) DO NOTHING",
        )
        .bind(token_id)
        .bind(item_id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(port_err)?
        .rows_affected();

        if inserted == 0 {
            let remaining: i32 = sqlx::query_scalar(
                "SELECT remaining_quota FROM quota_accounts WHERE token_id = $1",
            )
            .bind(token_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(port_err)?
            .ok_or_else(|| {
                PortError::NotFound(format!("Quota account for token {} not found", token_id))
            })?;
            tx.commit().await.map_err(port_err)?;
            return Ok(ReserveOutcome::AlreadyAccessed {
                remaining_quota: to_u32(remaining, "remaining_quota")?,
            });
        }

        let decremented: Option<i32> = sqlx::query_scalar(
            "UPDATE quota_accounts SET remaining_quota = remaining_quota - 1 \
             WHERE token_id = $1 AND remaining_quota > 0 RETURNING remaining_quota",
        )
        .bind(token_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(port_err)?;

        match decremented {
            Some(remaining) => {
                tx.commit().await.map_err(port_err)?;
                Ok(ReserveOutcome::Reserved {
                    remaining_quota: to_u32(remaining, "remaining_quota")?,
                })
            }
            None => {
                // Undo the access record: no deduction, no record.
                tx.rollback().await.map_err(port_err)?;
                match self.get_account(token_id).await? {
                    Some(_) => Ok(ReserveOutcome::Exhausted),
                    None => Err(PortError::NotFound(format!(
                        "Quota account for token {} not found",
                        token_id
                    ))),
                }
            }
        }
    }

    async fn get_account(&self, token_id: Uuid) -> PortResult<Option<QuotaAccount>> {
        sqlx::query_as::<_, QuotaRecord>(
            "SELECT token_id, total_quota, remaining_quota FROM quota_accounts WHERE token_id = $1",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_err)?
        .map(QuotaRecord::to_domain)
        .transpose()
    }
}

//=========================================================================================
// `TransactionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl TransactionStore for DbAdapter {
    async fn insert_transaction(&self, transaction: Transaction) -> PortResult<Transaction> {
        sqlx::query_as::<_, TransactionRecord>(&format!(
            "INSERT INTO transactions \
             (id, token_id, item_id, content_format, status, amount, currency, checkout_url, \
              provider_reference, created_at, expires_at, paid_at, resolved_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction.id)
        .bind(transaction.token_id)
        .bind(transaction.item_id)
        .bind(transaction.format.as_str())
        .bind(transaction.status.as_str())
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(&transaction.checkout_url)
        .bind(&transaction.provider_reference)
        .bind(transaction.created_at)
        .bind(transaction.expires_at)
        .bind(transaction.paid_at)
        .bind(transaction.resolved_at)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err)?
        .to_domain()
    }

    async fn get_transaction(&self, transaction_id: Uuid) -> PortResult<Option<Transaction>> {
        sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_err)?
        .map(TransactionRecord::to_domain)
        .transpose()
    }

    async fn resolve_pending(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> PortResult<Option<Transaction>> {
        sqlx::query_as::<_, TransactionRecord>(&format!(
            "UPDATE transactions SET status = $2, resolved_at = $3, \
             paid_at = CASE WHEN $2 = 'paid' THEN $3 ELSE paid_at END \
             WHERE id = $1 AND status = 'pending' RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(status.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_err)?
        .map(TransactionRecord::to_domain)
        .transpose()
    }

    async fn expire_pending(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'expired', resolved_at = $1 \
             WHERE status = 'pending' AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(port_err)?;
        Ok(result.rows_affected())
    }
}

//=========================================================================================
// `ContentCatalog` Trait Implementation
//=========================================================================================

#[async_trait]
impl ContentCatalog for DbAdapter {
    async fn get_item(&self, item_id: Uuid) -> PortResult<Option<ContentItem>> {
        let record = sqlx::query_as::<_, ContentItemRecord>(
            "SELECT id, category_id, title, price_amount, currency FROM content_items WHERE id = $1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_err)?;
        Ok(record.map(ContentItemRecord::to_domain))
    }

    async fn fetch_content(&self, item_id: Uuid, format: ContentFormat) -> PortResult<ContentBody> {
        let missing = || {
            PortError::NotFound(format!(
                "Content item {} has no {} body",
                item_id,
                format.as_str()
            ))
        };

        match format {
            ContentFormat::Pdf => {
                let pdf: Option<Option<Vec<u8>>> =
                    sqlx::query_scalar("SELECT pdf FROM content_items WHERE id = $1")
                        .bind(item_id)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(port_err)?;
                pdf.flatten()
                    .map(|bytes| ContentBody::Pdf(Bytes::from(bytes)))
                    .ok_or_else(missing)
            }
            ContentFormat::Json | ContentFormat::Html => {
                let column = if format == ContentFormat::Json { "data_json" } else { "html" };
                let text: Option<Option<String>> = sqlx::query_scalar(&format!(
                    "SELECT {} FROM content_items WHERE id = $1",
                    column
                ))
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(port_err)?;
                let text = text.flatten().ok_or_else(missing)?;
                Ok(if format == ContentFormat::Json {
                    ContentBody::Json(text)
                } else {
                    ContentBody::Html(text)
                })
            }
        }
    }

    async fn upsert_item(
        &self,
        item: ContentItem,
        json: Option<String>,
        html: Option<String>,
    ) -> PortResult<ContentItem> {
        let record = sqlx::query_as::<_, ContentItemRecord>(
            "INSERT INTO content_items (id, category_id, title, price_amount, currency, data_json, html) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET \
                category_id = EXCLUDED.category_id, \
                title = EXCLUDED.title, \
                price_amount = EXCLUDED.price_amount, \
                currency = EXCLUDED.currency, \
                data_json = COALESCE(EXCLUDED.data_json, content_items.data_json), \
                html = COALESCE(EXCLUDED.html, content_items.html), \
                updated_at = NOW() \
             RETURNING id, category_id, title, price_amount, currency",
        )
        .bind(item.id)
        .bind(item.category_id)
        .bind(&item.title)
        .bind(item.price.amount)
        .bind(&item.price.currency)
        .bind(json)
        .bind(html)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err)?;
        Ok(record.to_domain())
    }

    async fn store_pdf(&self, item_id: Uuid, pdf: Bytes) -> PortResult<()> {
        let result =
            sqlx::query("UPDATE content_items SET pdf = $2, updated_at = NOW() WHERE id = $1")
                .bind(item_id)
                .bind(pdf.as_ref())
                .execute(&self.pool)
                .await
                .map_err(port_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Content item {} not found", item_id)));
        }
        Ok(())
    }
}
