//! crates/guide_access_core/src/domain.rs
//!
//! Defines the pure, core data structures for the entitlement service.
//! These structs are independent of any database or serialization format.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

//=========================================================================================
// Token Scope
//=========================================================================================

/// The family of content a token may unlock. Fixed at issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Pdf,
    HtmlJson,
}

/// The concrete representation a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentFormat {
    Pdf,
    Json,
    Html,
}

/// How a token pays for content. Fixed at issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentMode {
    Prepaid,
    PayPerItem,
}

impl ContentType {
    /// Whether a request for `format` falls inside this content type.
    pub fn admits(self, format: ContentFormat) -> bool {
        matches!(
            (self, format),
            (ContentType::Pdf, ContentFormat::Pdf)
                | (ContentType::HtmlJson, ContentFormat::Json)
                | (ContentType::HtmlJson, ContentFormat::Html)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Pdf => "pdf",
            ContentType::HtmlJson => "html_json",
        }
    }
}

impl ContentFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentFormat::Pdf => "pdf",
            ContentFormat::Json => "json",
            ContentFormat::Html => "html",
        }
    }
}

impl PaymentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMode::Prepaid => "prepaid",
            PaymentMode::PayPerItem => "pay_per_item",
        }
    }
}

/// Error returned when a stored or submitted enum label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl FromStr for ContentType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(ContentType::Pdf),
            "html_json" => Ok(ContentType::HtmlJson),
            other => Err(UnknownVariant::new("content type", other)),
        }
    }
}

impl FromStr for ContentFormat {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(ContentFormat::Pdf),
            "json" => Ok(ContentFormat::Json),
            "html" => Ok(ContentFormat::Html),
            other => Err(UnknownVariant::new("content format", other)),
        }
    }
}

impl FromStr for PaymentMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepaid" => Ok(PaymentMode::Prepaid),
            "pay_per_item" => Ok(PaymentMode::PayPerItem),
            other => Err(UnknownVariant::new("payment mode", other)),
        }
    }
}

//=========================================================================================
// Tokens and Quota
//=========================================================================================

/// An access token as resolved from its bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: Uuid,
    pub label: String,
    pub content_type: ContentType,
    pub payment_mode: PaymentMode,
    /// Empty means every category is allowed.
    pub allowed_categories: BTreeSet<Uuid>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Token {
    /// Active and not past its expiry at `now`.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |expires_at| now <= expires_at)
    }

    pub fn permits_category(&self, category_id: Uuid) -> bool {
        self.allowed_categories.is_empty() || self.allowed_categories.contains(&category_id)
    }

    pub fn permits_format(&self, format: ContentFormat) -> bool {
        self.content_type.admits(format)
    }
}

/// Everything needed to persist a freshly issued token.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub token: Token,
    pub credential_hash: String,
    /// Present exactly when the token is prepaid.
    pub total_quota: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaAccount {
    pub token_id: Uuid,
    pub total_quota: u32,
    pub remaining_quota: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub token_id: Uuid,
    pub item_id: Uuid,
    pub first_accessed_at: DateTime<Utc>,
}

//=========================================================================================
// Transactions
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    Pending,
    Paid,
    Failed,
    Expired,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Paid => "paid",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "paid" => Ok(TransactionStatus::Paid),
            "failed" => Ok(TransactionStatus::Failed),
            "expired" => Ok(TransactionStatus::Expired),
            other => Err(UnknownVariant::new("transaction status", other)),
        }
    }
}

/// The outcome a payment provider reports for a checkout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderResult {
    Paid,
    Failed,
}

impl ProviderResult {
    pub fn target_status(self) -> TransactionStatus {
        match self {
            ProviderResult::Paid => TransactionStatus::Paid,
            ProviderResult::Failed => TransactionStatus::Failed,
        }
    }
}

/// A price in minor currency units (cents for EUR).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Price {
    pub amount: i64,
    pub currency: String,
}

/// A pay-per-item purchase bound to one token and one content item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: Uuid,
    pub token_id: Uuid,
    pub item_id: Uuid,
    pub format: ContentFormat,
    pub status: TransactionStatus,
    pub amount: i64,
    pub currency: String,
    pub checkout_url: String,
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// What a payment provider hands back when a checkout session is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub provider_reference: Option<String>,
}

/// Returned to the client after a checkout has been opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutTicket {
    pub transaction_id: Uuid,
    pub checkout_url: String,
    pub expires_in_seconds: i64,
    pub status: TransactionStatus,
}

//=========================================================================================
// Catalog
//=========================================================================================

/// A catalog entry. The service only needs its category and price; bodies are
/// fetched separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub id: Uuid,
    pub category_id: Uuid,
    pub title: String,
    pub price: Price,
}

/// A released content body.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBody {
    Pdf(Bytes),
    Json(String),
    Html(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(content_type: ContentType, categories: &[Uuid]) -> Token {
        Token {
            id: Uuid::new_v4(),
            label: "test".to_string(),
            content_type,
            payment_mode: PaymentMode::Prepaid,
            allowed_categories: categories.iter().copied().collect(),
            is_active: true,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn pdf_tokens_only_admit_pdf() {
        let t = token(ContentType::Pdf, &[]);
        assert!(t.permits_format(ContentFormat::Pdf));
        assert!(!t.permits_format(ContentFormat::Json));
        assert!(!t.permits_format(ContentFormat::Html));
    }

    #[test]
    fn html_json_tokens_admit_both_digital_formats() {
        let t = token(ContentType::HtmlJson, &[]);
        assert!(!t.permits_format(ContentFormat::Pdf));
        assert!(t.permits_format(ContentFormat::Json));
        assert!(t.permits_format(ContentFormat::Html));
    }

    #[test]
    fn empty_allowlist_permits_every_category() {
        let t = token(ContentType::Pdf, &[]);
        assert!(t.permits_category(Uuid::new_v4()));

        let allowed = Uuid::new_v4();
        let scoped = token(ContentType::Pdf, &[allowed]);
        assert!(scoped.permits_category(allowed));
        assert!(!scoped.permits_category(Uuid::new_v4()));
    }

    #[test]
    fn expired_or_inactive_tokens_are_unusable() {
        let now = Utc::now();
        let mut t = token(ContentType::Pdf, &[]);
        assert!(t.is_usable_at(now));

        t.expires_at = Some(now - Duration::seconds(1));
        assert!(!t.is_usable_at(now));

        t.expires_at = Some(now + Duration::hours(1));
        t.is_active = false;
        assert!(!t.is_usable_at(now));
    }

    #[test]
    fn labels_parse_back_into_variants() {
        assert_eq!("html_json".parse::<ContentType>(), Ok(ContentType::HtmlJson));
        assert_eq!("pay_per_item".parse::<PaymentMode>(), Ok(PaymentMode::PayPerItem));
        assert_eq!("expired".parse::<TransactionStatus>(), Ok(TransactionStatus::Expired));
        assert!("epub".parse::<ContentFormat>().is_err());
    }
}
