pub mod broker;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod memory;
pub mod ports;
pub mod registry;

pub use broker::{RetryPolicy, TransactionBroker, DEFAULT_CHECKOUT_EXPIRY_SECS};
pub use domain::{
    CheckoutSession, CheckoutTicket, ContentBody, ContentFormat, ContentItem, ContentType,
    PaymentMode, Price, ProviderResult, QuotaAccount, Token, Transaction, TransactionStatus,
};
pub use error::{AccessError, AccessResult};
pub use gateway::{AccessGateway, AccessInfo, AccessPhase, AccessRequest, Denial, Released};
pub use ledger::{QuotaLedger, Reservation};
pub use memory::MemoryStore;
pub use ports::{
    ContentCatalog, PaymentProvider, PortError, PortResult, QuotaStore, ReserveOutcome,
    TokenStore, TransactionStore,
};
pub use registry::{hash_credential, IssuedToken, TokenRegistry, TokenSpec};
