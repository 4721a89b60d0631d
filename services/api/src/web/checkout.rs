//! services/api/src/web/checkout.rs
//!
//! Checkout creation for pay-per-item tokens and the payment provider webhook.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use guide_access_core::{ContentFormat, ProviderResult};
use std::sync::Arc;

use crate::web::middleware::Credential;
use crate::web::protocol::{
    CheckoutResponse, DigitalCheckoutRequest, PaymentOutcome, PaymentWebhookRequest,
    PaymentWebhookResponse, PdfCheckoutRequest,
};
use crate::web::response::{ApiFailure, ErrorResponse};
use crate::web::state::AppState;

/// POST /api/v1/pdf/secure/checkout - Open a checkout for a PDF guide
#[utoipa::path(
    post,
    path = "/api/v1/pdf/secure/checkout",
    request_body = PdfCheckoutRequest,
    responses(
        (status = 201, description = "Checkout opened", body = CheckoutResponse),
        (status = 401, description = "Token invalid", body = ErrorResponse),
        (status = 403, description = "Token is not pay-per-item or guide is outside its scope", body = ErrorResponse),
        (status = 404, description = "Guide not found", body = ErrorResponse),
        (status = 503, description = "Payment provider unavailable", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub async fn pdf_checkout_handler(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Json(req): Json<PdfCheckoutRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let ticket = state
        .gateway
        .checkout(&credential.0, req.guide_id, ContentFormat::Pdf)
        .await?;
    Ok((StatusCode::CREATED, Json(CheckoutResponse::from(ticket))))
}

/// POST /api/v1/digital/secure/checkout - Open a checkout for a digital guide
#[utoipa::path(
    post,
    path = "/api/v1/digital/secure/checkout",
    request_body = DigitalCheckoutRequest,
    responses(
        (status = 201, description = "Checkout opened", body = CheckoutResponse),
        (status = 401, description = "Token invalid", body = ErrorResponse),
        (status = 403, description = "Token is not pay-per-item or guide is outside its scope", body = ErrorResponse),
        (status = 404, description = "Guide not found", body = ErrorResponse),
        (status = 503, description = "Payment provider unavailable", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub async fn digital_checkout_handler(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Json(req): Json<DigitalCheckoutRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let ticket = state
        .gateway
        .checkout(&credential.0, req.guide_id, req.content_type.into())
        .await?;
    Ok((StatusCode::CREATED, Json(CheckoutResponse::from(ticket))))
}

/// POST /api/v1/payments/webhook - Payment provider reports a checkout outcome
///
/// Redelivery of the outcome already stored is acknowledged with 200.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = PaymentWebhookRequest,
    responses(
        (status = 200, description = "Outcome recorded", body = PaymentWebhookResponse),
        (status = 401, description = "Missing or wrong webhook secret", body = ErrorResponse),
        (status = 404, description = "Transaction not found", body = ErrorResponse),
        (status = 409, description = "Transaction already resolved differently", body = ErrorResponse)
    ),
    params(
        ("x-webhook-secret" = String, Header, description = "Shared secret of the payment provider.")
    )
)]
pub async fn payment_webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PaymentWebhookRequest>,
) -> Result<Json<PaymentWebhookResponse>, ApiFailure> {
    let result = match req.result {
        PaymentOutcome::Paid => ProviderResult::Paid,
        PaymentOutcome::Failed => ProviderResult::Failed,
    };
    let transaction = state
        .broker
        .confirm_payment(req.transaction_id, result)
        .await?;
    Ok(Json(PaymentWebhookResponse {
        transaction_id: transaction.id,
        status: transaction.status.to_string(),
    }))
}
