//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use guide_access_core::ports::{
    ContentCatalog, PaymentProvider, QuotaStore, TokenStore, TransactionStore,
};
use guide_access_core::{AccessGateway, QuotaLedger, RetryPolicy, TokenRegistry, TransactionBroker};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<AccessGateway>,
    pub registry: Arc<TokenRegistry>,
    pub ledger: Arc<QuotaLedger>,
    pub broker: Arc<TransactionBroker>,
    pub catalog: Arc<dyn ContentCatalog>,
    pub config: Arc<Config>,
}

/// The storage ports the service runs on. Postgres in production, the
/// in-memory store in tests.
pub struct Stores {
    pub tokens: Arc<dyn TokenStore>,
    pub quotas: Arc<dyn QuotaStore>,
    pub transactions: Arc<dyn TransactionStore>,
    pub catalog: Arc<dyn ContentCatalog>,
}

impl AppState {
    /// Wires the four components over the given stores and payment provider.
    pub fn new(config: Arc<Config>, stores: Stores, provider: Arc<dyn PaymentProvider>) -> Self {
        let registry = Arc::new(TokenRegistry::new(stores.tokens, config.token_cache_ttl));
        let ledger = Arc::new(QuotaLedger::new(stores.quotas));

        let checkout_expiry = chrono::Duration::seconds(
            i64::try_from(config.checkout_expiry.as_secs()).unwrap_or(i64::MAX / 1000),
        );
        let retry = RetryPolicy {
            max_attempts: config.checkout_max_attempts,
            ..RetryPolicy::default()
        };
        let broker = Arc::new(TransactionBroker::new(
            stores.transactions,
            provider,
            checkout_expiry,
            retry,
        ));

        let gateway = Arc::new(AccessGateway::new(
            registry.clone(),
            ledger.clone(),
            broker.clone(),
            stores.catalog.clone(),
        ));

        Self {
            gateway,
            registry,
            ledger,
            broker,
            catalog: stores.catalog,
            config,
        }
    }
}
