//! crates/guide_access_core/src/ledger.rs
//!
//! The Quota Ledger for prepaid tokens. A unit is charged on the first access to
//! an item and never again for the same (token, item) pair.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AccessError, AccessResult};
use crate::ports::{QuotaStore, ReserveOutcome};

/// What a successful reservation reports back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub first_access: bool,
    pub remaining_quota: u32,
}

pub struct QuotaLedger {
    store: Arc<dyn QuotaStore>,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn QuotaStore>) -> Self {
        Self { store }
    }

    /// Charges the pair on first access; repeat calls are free and report
    /// `first_access = false`. Fails with `QuotaExhausted` only for a new pair
    /// when the balance is zero.
    pub async fn check_and_reserve(
        &self,
        token_id: Uuid,
        item_id: Uuid,
    ) -> AccessResult<Reservation> {
        match self
            .store
            .reserve_first_access(token_id, item_id, Utc::now())
            .await?
        {
            ReserveOutcome::Reserved { remaining_quota } => {
                info!(
                    token_id = %token_id,
                    item_id = %item_id,
                    remaining_quota,
                    "Charged first access"
                );
                Ok(Reservation {
                    first_access: true,
                    remaining_quota,
                })
            }
            ReserveOutcome::AlreadyAccessed { remaining_quota } => Ok(Reservation {
                first_access: false,
                remaining_quota,
            }),
            ReserveOutcome::Exhausted => {
                warn!(token_id = %token_id, item_id = %item_id, "Quota exhausted");
                Err(AccessError::QuotaExhausted)
            }
        }
    }

    pub async fn get_remaining(&self, token_id: Uuid) -> AccessResult<u32> {
        self.store
            .get_account(token_id)
            .await?
            .map(|account| account.remaining_quota)
            .ok_or_else(|| AccessError::ScopeViolation("token has no prepaid quota".to_string()))
    }
}
