//! services/api/src/web/content.rs
//!
//! Handlers that release guide content through the access gateway, plus the
//! bearer's own quota and transaction lookups.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::{Html, IntoResponse, Json, Response},
    Extension,
};
use guide_access_core::{AccessInfo, AccessRequest, ContentBody, ContentFormat, Released};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::web::middleware::Credential;
use crate::web::protocol::{
    DigitalDataResponse, QuotaResponse, SecureContentQuery, TransactionResponse,
};
use crate::web::response::{ApiFailure, ErrorResponse};
use crate::web::state::AppState;

pub const FIRST_ACCESS_HEADER: &str = "x-first-access";
pub const REMAINING_QUOTA_HEADER: &str = "x-remaining-quota";
pub const TRANSACTION_ID_HEADER: &str = "x-transaction-id";

//=========================================================================================
// Rendering
//=========================================================================================

async fn release(
    state: &AppState,
    credential: Credential,
    item_id: Uuid,
    format: ContentFormat,
    transaction_id: Option<Uuid>,
) -> Result<Response, ApiFailure> {
    let released = state
        .gateway
        .access(AccessRequest {
            credential: credential.0,
            item_id,
            format,
            transaction_id,
        })
        .await?;
    render(released)
}

/// Access metadata as response headers, for bodies that are not JSON.
fn access_headers(access: &AccessInfo) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match access {
        AccessInfo::Prepaid {
            first_access,
            remaining_quota,
        } => {
            headers.insert(
                HeaderName::from_static(FIRST_ACCESS_HEADER),
                HeaderValue::from_static(if *first_access { "true" } else { "false" }),
            );
            headers.insert(
                HeaderName::from_static(REMAINING_QUOTA_HEADER),
                HeaderValue::from(*remaining_quota),
            );
        }
        AccessInfo::PayPerItem { transaction } => {
            if let Ok(value) = HeaderValue::from_str(&transaction.id.to_string()) {
                headers.insert(HeaderName::from_static(TRANSACTION_ID_HEADER), value);
            }
        }
    }
    headers
}

fn render(released: Released) -> Result<Response, ApiFailure> {
    let Released {
        item, body, access, ..
    } = released;

    match body {
        ContentBody::Pdf(bytes) => {
            let mut headers = access_headers(&access);
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
            if let Ok(value) =
                HeaderValue::from_str(&format!("inline; filename=\"{}.pdf\"", item.id))
            {
                headers.insert(header::CONTENT_DISPOSITION, value);
            }
            Ok((headers, bytes).into_response())
        }
        ContentBody::Html(html) => Ok((access_headers(&access), Html(html)).into_response()),
        ContentBody::Json(raw) => {
            let data: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
                error!(item_id = %item.id, "Stored guide data is not valid JSON: {}", e);
                ApiFailure::internal("stored guide data is corrupt")
            })?;
            Ok(Json(DigitalDataResponse::new(item, data, access)).into_response())
        }
    }
}

//=========================================================================================
// Prepaid Content
//=========================================================================================

/// GET /api/v1/pdf/content/{item_id} - Download a PDF guide with a prepaid token
#[utoipa::path(
    get,
    path = "/api/v1/pdf/content/{item_id}",
    params(("item_id" = Uuid, Path, description = "The guide to download.")),
    responses(
        (status = 200, description = "The PDF, with x-first-access and x-remaining-quota headers"),
        (status = 401, description = "Token invalid", body = ErrorResponse),
        (status = 403, description = "Outside token scope or quota exhausted", body = ErrorResponse),
        (status = 404, description = "Guide not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub async fn pdf_content_handler(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path(item_id): Path<Uuid>,
) -> Result<Response, ApiFailure> {
    release(&state, credential, item_id, ContentFormat::Pdf, None).await
}

/// GET /api/v1/digital/content/data/{item_id} - Read a guide as JSON with a prepaid token
#[utoipa::path(
    get,
    path = "/api/v1/digital/content/data/{item_id}",
    params(("item_id" = Uuid, Path, description = "The guide to read.")),
    responses(
        (status = 200, description = "Guide data with access_info", body = DigitalDataResponse),
        (status = 401, description = "Token invalid", body = ErrorResponse),
        (status = 403, description = "Outside token scope or quota exhausted", body = ErrorResponse),
        (status = 404, description = "Guide not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub async fn digital_data_handler(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path(item_id): Path<Uuid>,
) -> Result<Response, ApiFailure> {
    release(&state, credential, item_id, ContentFormat::Json, None).await
}

/// GET /api/v1/digital/content/view/{item_id} - Read a guide as HTML with a prepaid token
#[utoipa::path(
    get,
    path = "/api/v1/digital/content/view/{item_id}",
    params(("item_id" = Uuid, Path, description = "The guide to view.")),
    responses(
        (status = 200, description = "The rendered guide, with access headers"),
        (status = 401, description = "Token invalid", body = ErrorResponse),
        (status = 403, description = "Outside token scope or quota exhausted", body = ErrorResponse),
        (status = 404, description = "Guide not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub async fn digital_view_handler(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path(item_id): Path<Uuid>,
) -> Result<Response, ApiFailure> {
    release(&state, credential, item_id, ContentFormat::Html, None).await
}

//=========================================================================================
// Pay-per-item Content
//=========================================================================================

/// GET /api/v1/pdf/secure/download - Download a purchased PDF guide
#[utoipa::path(
    get,
    path = "/api/v1/pdf/secure/download",
    params(SecureContentQuery),
    responses(
        (status = 200, description = "The PDF, with an x-transaction-id header"),
        (status = 401, description = "Token invalid", body = ErrorResponse),
        (status = 402, description = "Transaction not paid", body = ErrorResponse),
        (status = 403, description = "Transaction belongs to another token or guide", body = ErrorResponse),
        (status = 404, description = "Guide or transaction not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub async fn pdf_download_handler(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(query): Query<SecureContentQuery>,
) -> Result<Response, ApiFailure> {
    release(
        &state,
        credential,
        query.guide_id,
        ContentFormat::Pdf,
        query.transaction_id,
    )
    .await
}

/// GET /api/v1/digital/secure/data - Read a purchased guide as JSON
#[utoipa::path(
    get,
    path = "/api/v1/digital/secure/data",
    params(SecureContentQuery),
    responses(
        (status = 200, description = "Guide data with the paid transaction", body = DigitalDataResponse),
        (status = 401, description = "Token invalid", body = ErrorResponse),
        (status = 402, description = "Transaction not paid", body = ErrorResponse),
        (status = 403, description = "Transaction belongs to another token or guide", body = ErrorResponse),
        (status = 404, description = "Guide or transaction not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub async fn digital_secure_data_handler(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(query): Query<SecureContentQuery>,
) -> Result<Response, ApiFailure> {
    release(
        &state,
        credential,
        query.guide_id,
        ContentFormat::Json,
        query.transaction_id,
    )
    .await
}

/// GET /api/v1/digital/secure/view - View a purchased guide as HTML
#[utoipa::path(
    get,
    path = "/api/v1/digital/secure/view",
    params(SecureContentQuery),
    responses(
        (status = 200, description = "The rendered guide, with an x-transaction-id header"),
        (status = 401, description = "Token invalid", body = ErrorResponse),
        (status = 402, description = "Transaction not paid", body = ErrorResponse),
        (status = 403, description = "Transaction belongs to another token or guide", body = ErrorResponse),
        (status = 404, description = "Guide or transaction not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub async fn digital_secure_view_handler(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(query): Query<SecureContentQuery>,
) -> Result<Response, ApiFailure> {
    release(
        &state,
        credential,
        query.guide_id,
        ContentFormat::Html,
        query.transaction_id,
    )
    .await
}

//=========================================================================================
// Bearer Lookups
//=========================================================================================

/// GET /api/v1/quota - Remaining prepaid quota of the bearer
#[utoipa::path(
    get,
    path = "/api/v1/quota",
    responses(
        (status = 200, description = "Remaining quota", body = QuotaResponse),
        (status = 401, description = "Token invalid", body = ErrorResponse),
        (status = 403, description = "Token is not prepaid", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub async fn quota_handler(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
) -> Result<Json<QuotaResponse>, ApiFailure> {
    let remaining_quota = state.gateway.quota(&credential.0).await?;
    Ok(Json(QuotaResponse { remaining_quota }))
}

/// GET /api/v1/transactions/{transaction_id} - Status of one of the bearer's checkouts
#[utoipa::path(
    get,
    path = "/api/v1/transactions/{transaction_id}",
    params(("transaction_id" = Uuid, Path, description = "The transaction to look up.")),
    responses(
        (status = 200, description = "The transaction", body = TransactionResponse),
        (status = 401, description = "Token invalid", body = ErrorResponse),
        (status = 403, description = "Transaction belongs to another token", body = ErrorResponse),
        (status = 404, description = "Transaction not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub async fn transaction_handler(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, ApiFailure> {
    let transaction = state
        .gateway
        .transaction(&credential.0, transaction_id)
        .await?;
    Ok(Json(TransactionResponse::from(transaction)))
}
