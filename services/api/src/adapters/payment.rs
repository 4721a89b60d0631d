//! services/api/src/adapters/payment.rs
//!
//! HTTP client for the hosted checkout provider. Implements the `PaymentProvider`
//! port by opening one checkout session per transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guide_access_core::domain::{CheckoutSession, ContentItem, Price};
use guide_access_core::ports::{PaymentProvider, PortError, PortResult};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Default HTTP timeout for provider requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    /// Echoed back by the provider in its webhook so we can find the transaction.
    client_reference_id: Uuid,
    amount: i64,
    currency: &'a str,
    description: &'a str,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    url: String,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Clone)]
pub struct HttpCheckoutAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpCheckoutAdapter {
    pub fn new(base_url: &str, api_key: Option<String>) -> PortResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| PortError::Unexpected(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

/// 5xx, 429 and network failures are transient; any other non-success is not.
fn classify_status(status: StatusCode, body: String) -> PortError {
    let message = format!("payment provider returned {}: {}", status, body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        PortError::Unavailable(message)
    } else {
        PortError::Unexpected(message)
    }
}

#[async_trait]
impl PaymentProvider for HttpCheckoutAdapter {
    async fn create_checkout_session(
        &self,
        transaction_id: Uuid,
        item: &ContentItem,
        price: &Price,
        expires_at: DateTime<Utc>,
    ) -> PortResult<CheckoutSession> {
        let url = format!("{}/checkout/sessions", self.base_url);
        debug!(url = %url, transaction_id = %transaction_id, "Opening checkout session");

        let request = CreateSessionRequest {
            client_reference_id: transaction_id,
            amount: price.amount,
            currency: &price.currency,
            description: &item.title,
            expires_at,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PortError::Unavailable(format!("payment provider unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let session: CreateSessionResponse = response.json().await.map_err(|e| {
            PortError::Unexpected(format!("failed to parse checkout session response: {}", e))
        })?;

        Ok(CheckoutSession {
            checkout_url: session.url,
            provider_reference: session.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_transient() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
    }

    #[test]
    fn client_errors_are_not_retried() {
        let err = classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad currency".to_string());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("bad currency"));
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let adapter = HttpCheckoutAdapter::new("https://pay.example/", None).unwrap();
        assert_eq!(adapter.base_url, "https://pay.example");
    }
}
