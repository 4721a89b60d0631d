//! services/api/src/web/protocol.rs
//!
//! Request and response payloads for the REST API.

use chrono::{DateTime, Utc};
use guide_access_core::{
    AccessInfo, CheckoutTicket, ContentFormat, ContentItem, ContentType, PaymentMode, Token,
    Transaction,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

//=========================================================================================
// Client Payloads
//=========================================================================================

/// Query string of the pay-per-item download routes.
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SecureContentQuery {
    /// Omitted when nothing has been bought yet; the request is then denied
    /// with `PaymentRequired`.
    pub transaction_id: Option<Uuid>,
    pub guide_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct PdfCheckoutRequest {
    pub guide_id: Uuid,
}

/// The two bodies a digital guide can be bought in.
#[derive(Deserialize, Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DigitalFormat {
    Json,
    Html,
}

impl From<DigitalFormat> for ContentFormat {
    fn from(format: DigitalFormat) -> Self {
        match format {
            DigitalFormat::Json => ContentFormat::Json,
            DigitalFormat::Html => ContentFormat::Html,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct DigitalCheckoutRequest {
    pub guide_id: Uuid,
    pub content_type: DigitalFormat,
}

#[derive(Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub transaction_id: Uuid,
    pub checkout_url: String,
    pub expires_in_seconds: i64,
    pub status: String,
}

impl From<CheckoutTicket> for CheckoutResponse {
    fn from(ticket: CheckoutTicket) -> Self {
        Self {
            transaction_id: ticket.transaction_id,
            checkout_url: ticket.checkout_url,
            expires_in_seconds: ticket.expires_in_seconds,
            status: ticket.status.as_str().to_string(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug, PartialEq, Eq)]
pub struct AccessInfoBody {
    pub first_access: bool,
    pub remaining_quota: u32,
}

#[derive(Serialize, ToSchema, Debug, PartialEq, Eq)]
pub struct PaidTransactionBody {
    pub transaction_id: Uuid,
    pub paid_at: Option<DateTime<Utc>>,
    pub amount: i64,
    pub currency: String,
}

/// A JSON guide together with the access metadata of the request.
#[derive(Serialize, ToSchema)]
pub struct DigitalDataResponse {
    pub guide_id: Uuid,
    pub title: String,
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_info: Option<AccessInfoBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<PaidTransactionBody>,
}

impl DigitalDataResponse {
    pub fn new(item: ContentItem, data: serde_json::Value, access: AccessInfo) -> Self {
        let mut response = Self {
            guide_id: item.id,
            title: item.title,
            data,
            access_info: None,
            transaction: None,
        };
        match access {
            AccessInfo::Prepaid {
                first_access,
                remaining_quota,
            } => {
                response.access_info = Some(AccessInfoBody {
                    first_access,
                    remaining_quota,
                })
            }
            AccessInfo::PayPerItem { transaction } => {
                response.transaction = Some(PaidTransactionBody {
                    transaction_id: transaction.id,
                    paid_at: transaction.paid_at,
                    amount: transaction.amount,
                    currency: transaction.currency,
                })
            }
        }
        response
    }
}

#[derive(Serialize, ToSchema)]
pub struct QuotaResponse {
    pub remaining_quota: u32,
}

#[derive(Serialize, ToSchema)]
pub struct TransactionResponse {
    pub transaction_id: Uuid,
    pub guide_id: Uuid,
    pub content_format: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub checkout_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<Transaction> for TransactionResponse {
    fn from(transaction: Transaction) -> Self {
        Self {
            transaction_id: transaction.id,
            guide_id: transaction.item_id,
            content_format: transaction.format.as_str().to_string(),
            status: transaction.status.as_str().to_string(),
            amount: transaction.amount,
            currency: transaction.currency,
            checkout_url: transaction.checkout_url,
            created_at: transaction.created_at,
            expires_at: transaction.expires_at,
            paid_at: transaction.paid_at,
        }
    }
}

//=========================================================================================
// Payment Provider Webhook
//=========================================================================================

#[derive(Deserialize, Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Paid,
    Failed,
}

#[derive(Deserialize, ToSchema)]
pub struct PaymentWebhookRequest {
    pub transaction_id: Uuid,
    pub result: PaymentOutcome,
}

#[derive(Serialize, ToSchema)]
pub struct PaymentWebhookResponse {
    pub transaction_id: Uuid,
    pub status: String,
}

//=========================================================================================
// Admin Payloads
//=========================================================================================

#[derive(Deserialize, Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentTypeBody {
    Pdf,
    HtmlJson,
}

impl From<ContentTypeBody> for ContentType {
    fn from(body: ContentTypeBody) -> Self {
        match body {
            ContentTypeBody::Pdf => ContentType::Pdf,
            ContentTypeBody::HtmlJson => ContentType::HtmlJson,
        }
    }
}

#[derive(Deserialize, Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentModeBody {
    Prepaid,
    PayPerItem,
}

impl From<PaymentModeBody> for PaymentMode {
    fn from(body: PaymentModeBody) -> Self {
        match body {
            PaymentModeBody::Prepaid => PaymentMode::Prepaid,
            PaymentModeBody::PayPerItem => PaymentMode::PayPerItem,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct IssueTokenRequest {
    #[serde(default)]
    pub label: String,
    pub content_type: ContentTypeBody,
    pub payment_mode: PaymentModeBody,
    /// Empty allows every category.
    #[serde(default)]
    pub allowed_categories: Vec<Uuid>,
    /// Required for prepaid tokens, rejected for pay-per-item ones.
    pub total_quota: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, ToSchema)]
pub struct TokenResponse {
    pub id: Uuid,
    pub label: String,
    pub content_type: String,
    pub payment_mode: String,
    pub allowed_categories: Vec<Uuid>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_quota: Option<u32>,
}

impl TokenResponse {
    pub fn new(token: Token, remaining_quota: Option<u32>) -> Self {
        Self {
            id: token.id,
            label: token.label,
            content_type: token.content_type.as_str().to_string(),
            payment_mode: token.payment_mode.as_str().to_string(),
            allowed_categories: token.allowed_categories.into_iter().collect(),
            is_active: token.is_active,
            expires_at: token.expires_at,
            created_at: token.created_at,
            remaining_quota,
        }
    }
}

/// Returned once at issuance; the plaintext credential is never stored.
#[derive(Serialize, ToSchema)]
pub struct IssuedTokenResponse {
    pub credential: String,
    pub token: TokenResponse,
}

#[derive(Deserialize, ToSchema)]
pub struct CategoriesRequest {
    pub allowed_categories: Vec<Uuid>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpsertItemRequest {
    pub category_id: Uuid,
    pub title: String,
    /// Minor currency units.
    pub price_amount: i64,
    pub currency: String,
    #[schema(value_type = Option<Object>)]
    pub data: Option<serde_json::Value>,
    pub html: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ItemResponse {
    pub id: Uuid,
    pub category_id: Uuid,
    pub title: String,
    pub price_amount: i64,
    pub currency: String,
}

impl From<ContentItem> for ItemResponse {
    fn from(item: ContentItem) -> Self {
        Self {
            id: item.id,
            category_id: item.category_id,
            title: item.title,
            price_amount: item.price.amount,
            currency: item.price.currency,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SweepResponse {
    pub expired: u64,
}
