//! services/api/src/web/admin.rs
//!
//! Operator endpoints: token issuance and revocation, catalog maintenance and
//! on-demand expiry sweeps. Mounted only when an admin key is configured.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use guide_access_core::{
    AccessError, ContentItem, PaymentMode, PortError, Price, Token, TokenSpec,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::web::protocol::{
    CategoriesRequest, IssueTokenRequest, IssuedTokenResponse, ItemResponse, SweepResponse,
    TokenResponse, UpsertItemRequest,
};
use crate::web::response::{ApiFailure, ErrorResponse};
use crate::web::state::AppState;

/// Attaches the remaining balance to prepaid tokens.
async fn token_response(state: &AppState, token: Token) -> Result<TokenResponse, ApiFailure> {
    let remaining_quota = match token.payment_mode {
        PaymentMode::Prepaid => Some(state.ledger.get_remaining(token.id).await?),
        PaymentMode::PayPerItem => None,
    };
    Ok(TokenResponse::new(token, remaining_quota))
}

//=========================================================================================
// Tokens
//=========================================================================================

/// POST /admin/tokens - Issue a new access token
///
/// The plaintext credential is returned once and never stored.
#[utoipa::path(
    post,
    path = "/admin/tokens",
    request_body = IssueTokenRequest,
    responses(
        (status = 201, description = "Token issued", body = IssuedTokenResponse),
        (status = 400, description = "Quota does not match the payment mode", body = ErrorResponse),
        (status = 401, description = "Missing or wrong admin key", body = ErrorResponse)
    ),
    security(("admin_key" = []))
)]
pub async fn issue_token_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IssueTokenRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let issued = state
        .registry
        .issue(TokenSpec {
            label: req.label,
            content_type: req.content_type.into(),
            payment_mode: req.payment_mode.into(),
            allowed_categories: req.allowed_categories.into_iter().collect(),
            total_quota: req.total_quota,
            expires_at: req.expires_at,
        })
        .await?;

    let token = TokenResponse::new(issued.token, req.total_quota);
    Ok((
        StatusCode::CREATED,
        Json(IssuedTokenResponse {
            credential: issued.credential,
            token,
        }),
    ))
}

/// GET /admin/tokens/{token_id} - Inspect a token
#[utoipa::path(
    get,
    path = "/admin/tokens/{token_id}",
    params(("token_id" = Uuid, Path, description = "The token to inspect.")),
    responses(
        (status = 200, description = "The token", body = TokenResponse),
        (status = 401, description = "Missing or wrong admin key", body = ErrorResponse),
        (status = 404, description = "Token not found", body = ErrorResponse)
    ),
    security(("admin_key" = []))
)]
pub async fn get_token_handler(
    State(state): State<Arc<AppState>>,
    Path(token_id): Path<Uuid>,
) -> Result<Json<TokenResponse>, ApiFailure> {
    let token = state.registry.get(token_id).await?;
    Ok(Json(token_response(&state, token).await?))
}

/// POST /admin/tokens/{token_id}/deactivate - Revoke a token
#[utoipa::path(
    post,
    path = "/admin/tokens/{token_id}/deactivate",
    params(("token_id" = Uuid, Path, description = "The token to revoke.")),
    responses(
        (status = 200, description = "Token deactivated", body = TokenResponse),
        (status = 401, description = "Missing or wrong admin key", body = ErrorResponse),
        (status = 404, description = "Token not found", body = ErrorResponse)
    ),
    security(("admin_key" = []))
)]
pub async fn deactivate_token_handler(
    State(state): State<Arc<AppState>>,
    Path(token_id): Path<Uuid>,
) -> Result<Json<TokenResponse>, ApiFailure> {
    let token = state.registry.deactivate(token_id).await?;
    Ok(Json(token_response(&state, token).await?))
}

/// PUT /admin/tokens/{token_id}/categories - Replace a token's category allowlist
#[utoipa::path(
    put,
    path = "/admin/tokens/{token_id}/categories",
    params(("token_id" = Uuid, Path, description = "The token to update.")),
    request_body = CategoriesRequest,
    responses(
        (status = 200, description = "Allowlist replaced", body = TokenResponse),
        (status = 401, description = "Missing or wrong admin key", body = ErrorResponse),
        (status = 404, description = "Token not found", body = ErrorResponse)
    ),
    security(("admin_key" = []))
)]
pub async fn set_categories_handler(
    State(state): State<Arc<AppState>>,
    Path(token_id): Path<Uuid>,
    Json(req): Json<CategoriesRequest>,
) -> Result<Json<TokenResponse>, ApiFailure> {
    let token = state
        .registry
        .set_allowed_categories(token_id, req.allowed_categories.into_iter().collect())
        .await?;
    Ok(Json(token_response(&state, token).await?))
}

//=========================================================================================
// Catalog
//=========================================================================================

/// PUT /admin/items/{item_id} - Create or update a guide and its digital bodies
///
/// Omitted bodies keep their stored value.
#[utoipa::path(
    put,
    path = "/admin/items/{item_id}",
    params(("item_id" = Uuid, Path, description = "The guide to store.")),
    request_body = UpsertItemRequest,
    responses(
        (status = 200, description = "Guide stored", body = ItemResponse),
        (status = 400, description = "Invalid price or title", body = ErrorResponse),
        (status = 401, description = "Missing or wrong admin key", body = ErrorResponse)
    ),
    security(("admin_key" = []))
)]
pub async fn upsert_item_handler(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<Uuid>,
    Json(req): Json<UpsertItemRequest>,
) -> Result<Json<ItemResponse>, ApiFailure> {
    if req.price_amount <= 0 {
        return Err(
            AccessError::InvalidRequest("price_amount must be positive".to_string()).into(),
        );
    }
    if req.title.trim().is_empty() || req.currency.trim().is_empty() {
        return Err(
            AccessError::InvalidRequest("title and currency are required".to_string()).into(),
        );
    }

    let item = ContentItem {
        id: item_id,
        category_id: req.category_id,
        title: req.title,
        price: Price {
            amount: req.price_amount,
            currency: req.currency.trim().to_lowercase(),
        },
    };
    let json = req.data.map(|data| data.to_string());
    let item = state
        .catalog
        .upsert_item(item, json, req.html)
        .await
        .map_err(AccessError::from)?;

    info!(item_id = %item.id, category_id = %item.category_id, "Stored guide");
    Ok(Json(ItemResponse::from(item)))
}

/// PUT /admin/items/{item_id}/pdf - Upload the PDF body of a guide
#[utoipa::path(
    put,
    path = "/admin/items/{item_id}/pdf",
    params(("item_id" = Uuid, Path, description = "The guide the PDF belongs to.")),
    request_body(content = Vec<u8>, content_type = "application/pdf", description = "The raw PDF."),
    responses(
        (status = 204, description = "PDF stored"),
        (status = 400, description = "Empty body", body = ErrorResponse),
        (status = 401, description = "Missing or wrong admin key", body = ErrorResponse),
        (status = 404, description = "Guide not found", body = ErrorResponse)
    ),
    security(("admin_key" = []))
)]
pub async fn upload_pdf_handler(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<Uuid>,
    body: Bytes,
) -> Result<StatusCode, ApiFailure> {
    if body.is_empty() {
        return Err(AccessError::InvalidRequest("PDF body is empty".to_string()).into());
    }
    let size = body.len();
    state
        .catalog
        .store_pdf(item_id, body)
        .await
        .map_err(|e| match e {
            PortError::NotFound(_) => AccessError::ItemNotFound(item_id),
            other => AccessError::Port(other),
        })?;

    info!(item_id = %item_id, size, "Stored guide PDF");
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Transactions
//=========================================================================================

/// POST /admin/transactions/sweep - Expire stale checkouts now
#[utoipa::path(
    post,
    path = "/admin/transactions/sweep",
    responses(
        (status = 200, description = "Number of checkouts expired", body = SweepResponse),
        (status = 401, description = "Missing or wrong admin key", body = ErrorResponse)
    ),
    security(("admin_key" = []))
)]
pub async fn sweep_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SweepResponse>, ApiFailure> {
    let expired = state.broker.expire_stale(Utc::now()).await?;
    Ok(Json(SweepResponse { expired }))
}
