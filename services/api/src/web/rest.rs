//! services/api/src/web/rest.rs
//!
//! Builds the REST router and holds the master definition for the OpenAPI
//! specification.

use crate::web::{admin, checkout, content};
use crate::web::middleware::{require_admin, require_bearer, require_webhook_secret};
use crate::web::protocol::{
    AccessInfoBody, CategoriesRequest, CheckoutResponse, ContentTypeBody, DigitalCheckoutRequest,
    DigitalDataResponse, DigitalFormat, IssueTokenRequest, IssuedTokenResponse, ItemResponse,
    PaidTransactionBody, PaymentModeBody, PaymentOutcome, PaymentWebhookRequest,
    PaymentWebhookResponse, PdfCheckoutRequest, QuotaResponse, SweepResponse, TokenResponse,
    TransactionResponse, UpsertItemRequest,
};
use crate::web::response::{ErrorDetail, ErrorResponse};
use crate::web::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Largest request body accepted, sized for guide PDF uploads.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        content::pdf_content_handler,
        content::digital_data_handler,
        content::digital_view_handler,
        content::pdf_download_handler,
        content::digital_secure_data_handler,
        content::digital_secure_view_handler,
        content::quota_handler,
        content::transaction_handler,
        checkout::pdf_checkout_handler,
        checkout::digital_checkout_handler,
        checkout::payment_webhook_handler,
        admin::issue_token_handler,
        admin::get_token_handler,
        admin::deactivate_token_handler,
        admin::set_categories_handler,
        admin::upsert_item_handler,
        admin::upload_pdf_handler,
        admin::sweep_handler,
    ),
    components(
        schemas(
            ErrorResponse, ErrorDetail,
            PdfCheckoutRequest, DigitalCheckoutRequest, DigitalFormat, CheckoutResponse,
            DigitalDataResponse, AccessInfoBody, PaidTransactionBody,
            QuotaResponse, TransactionResponse,
            PaymentWebhookRequest, PaymentWebhookResponse, PaymentOutcome,
            IssueTokenRequest, IssuedTokenResponse, TokenResponse, ContentTypeBody, PaymentModeBody,
            CategoriesRequest, UpsertItemRequest, ItemResponse, SweepResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Guide Access API", description = "Token-scoped access to guide content, checkouts and payment callbacks.")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
            components.add_security_scheme(
                "admin_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-admin-key"))),
            );
        }
    }
}

//=========================================================================================
// Router
//=========================================================================================

/// Builds the full API router over `state`.
///
/// Client routes live under `/api/v1` behind bearer extraction. The webhook is
/// guarded by the shared provider secret. Admin routes are only mounted when
/// an admin key is configured.
pub fn build_router(state: Arc<AppState>) -> Router {
    let client_routes = Router::new()
        .route("/pdf/content/{item_id}", get(content::pdf_content_handler))
        .route("/pdf/secure/checkout", post(checkout::pdf_checkout_handler))
        .route("/pdf/secure/download", get(content::pdf_download_handler))
        .route("/digital/content/data/{item_id}", get(content::digital_data_handler))
        .route("/digital/content/view/{item_id}", get(content::digital_view_handler))
        .route("/digital/secure/checkout", post(checkout::digital_checkout_handler))
        .route("/digital/secure/data", get(content::digital_secure_data_handler))
        .route("/digital/secure/view", get(content::digital_secure_view_handler))
        .route("/quota", get(content::quota_handler))
        .route("/transactions/{transaction_id}", get(content::transaction_handler))
        .route_layer(axum_middleware::from_fn(require_bearer));

    let webhook_routes = Router::new()
        .route("/payments/webhook", post(checkout::payment_webhook_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_webhook_secret,
        ));

    let mut router = Router::new().nest("/api/v1", client_routes.merge(webhook_routes));

    if state.config.admin_api_key.is_some() {
        let admin_routes = Router::new()
            .route("/tokens", post(admin::issue_token_handler))
            .route("/tokens/{token_id}", get(admin::get_token_handler))
            .route("/tokens/{token_id}/deactivate", post(admin::deactivate_token_handler))
            .route("/tokens/{token_id}/categories", put(admin::set_categories_handler))
            .route("/items/{item_id}", put(admin::upsert_item_handler))
            .route("/items/{item_id}/pdf", put(admin::upload_pdf_handler))
            .route("/transactions/sweep", post(admin::sweep_handler))
            .route_layer(axum_middleware::from_fn_with_state(
                state.clone(),
                require_admin,
            ));
        router = router.nest("/admin", admin_routes);
    }

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
