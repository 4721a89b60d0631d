//! crates/guide_access_core/src/registry.rs
//!
//! The Token Registry: turns bearer credentials into scoped tokens and handles
//! the administrative token lifecycle.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{ContentType, NewToken, PaymentMode, Token};
use crate::error::{AccessError, AccessResult};
use crate::ports::{PortError, TokenStore};

/// Upper bound on how long a resolved token may be served from memory.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(60);

/// Hash a credential for storage (raw credentials are never persisted).
pub fn hash_credential(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_credential() -> String {
    format!(
        "gat_{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// Administrative request for a new token.
#[derive(Debug, Clone)]
pub struct TokenSpec {
    pub label: String,
    pub content_type: ContentType,
    pub payment_mode: PaymentMode,
    pub allowed_categories: BTreeSet<Uuid>,
    pub total_quota: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A new token together with the only copy of its credential.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: Token,
    pub credential: String,
}

struct CachedToken {
    token: Token,
    fetched_at: Instant,
}

pub struct TokenRegistry {
    store: Arc<dyn TokenStore>,
    cache: RwLock<HashMap<String, CachedToken>>,
    cache_ttl: Duration,
}

impl TokenRegistry {
    /// `cache_ttl` is clamped to [`MAX_CACHE_TTL`]; zero disables caching.
    pub fn new(store: Arc<dyn TokenStore>, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: cache_ttl.min(MAX_CACHE_TTL),
        }
    }

    pub async fn resolve(&self, credential: &str) -> AccessResult<Token> {
        self.resolve_at(credential, Utc::now()).await
    }

    /// Resolves a credential as of `now`. Activity and expiry are checked on
    /// every call, cached or not.
    pub async fn resolve_at(&self, credential: &str, now: DateTime<Utc>) -> AccessResult<Token> {
        let credential_hash = hash_credential(credential);

        let cached = self.cached(&credential_hash).await;
        let token = match cached {
            Some(token) => token,
            None => {
                let token = self
                    .store
                    .find_by_credential_hash(&credential_hash)
                    .await?
                    .ok_or(AccessError::TokenInvalid)?;
                if !self.cache_ttl.is_zero() {
                    self.cache.write().await.insert(
                        credential_hash,
                        CachedToken {
                            token: token.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                }
                token
            }
        };

        if !token.is_usable_at(now) {
            debug!(token_id = %token.id, "Rejected inactive or expired token");
            return Err(AccessError::TokenInvalid);
        }
        Ok(token)
    }

    async fn cached(&self, credential_hash: &str) -> Option<Token> {
        let cache = self.cache.read().await;
        cache
            .get(credential_hash)
            .filter(|entry| entry.fetched_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.token.clone())
    }

    async fn evict(&self, token_id: Uuid) {
        self.cache
            .write()
            .await
            .retain(|_, entry| entry.token.id != token_id);
    }

    /// Issues a token. Prepaid tokens must carry a quota; pay-per-item tokens
    /// must not.
    pub async fn issue(&self, spec: TokenSpec) -> AccessResult<IssuedToken> {
        match (spec.payment_mode, spec.total_quota) {
            (PaymentMode::Prepaid, None) => {
                return Err(AccessError::InvalidRequest(
                    "prepaid tokens need a total_quota".to_string(),
                ))
            }
            (PaymentMode::PayPerItem, Some(_)) => {
                return Err(AccessError::InvalidRequest(
                    "pay-per-item tokens do not carry a quota".to_string(),
                ))
            }
            _ => {}
        }

        let credential = generate_credential();
        let token = Token {
            id: Uuid::new_v4(),
            label: spec.label,
            content_type: spec.content_type,
            payment_mode: spec.payment_mode,
            allowed_categories: spec.allowed_categories,
            is_active: true,
            expires_at: spec.expires_at,
            created_at: Utc::now(),
        };
        let token = self
            .store
            .insert_token(NewToken {
                token,
                credential_hash: hash_credential(&credential),
                total_quota: spec.total_quota,
            })
            .await?;

        info!(
            token_id = %token.id,
            content_type = token.content_type.as_str(),
            payment_mode = token.payment_mode.as_str(),
            "Issued access token"
        );
        Ok(IssuedToken { token, credential })
    }

    pub async fn get(&self, token_id: Uuid) -> AccessResult<Token> {
        self.store
            .get_token(token_id)
            .await?
            .ok_or(AccessError::TokenNotFound(token_id))
    }

    pub async fn deactivate(&self, token_id: Uuid) -> AccessResult<Token> {
        let token = self
            .store
            .set_active(token_id, false)
            .await
            .map_err(|e| not_found_as(e, token_id))?;
        self.evict(token_id).await;
        info!(token_id = %token_id, "Deactivated access token");
        Ok(token)
    }

    pub async fn set_allowed_categories(
        &self,
        token_id: Uuid,
        categories: BTreeSet<Uuid>,
    ) -> AccessResult<Token> {
        let token = self
            .store
            .set_allowed_categories(token_id, categories)
            .await
            .map_err(|e| not_found_as(e, token_id))?;
        self.evict(token_id).await;
        info!(
            token_id = %token_id,
            categories = token.allowed_categories.len(),
            "Updated token category scope"
        );
        Ok(token)
    }
}

fn not_found_as(e: PortError, token_id: Uuid) -> AccessError {
    match e {
        PortError::NotFound(_) => AccessError::TokenNotFound(token_id),
        other => AccessError::Port(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::Duration as ChronoDuration;

    fn registry(ttl: Duration) -> TokenRegistry {
        TokenRegistry::new(Arc::new(MemoryStore::new()), ttl)
    }

    fn prepaid_spec(quota: u32) -> TokenSpec {
        TokenSpec {
            label: "guide app".to_string(),
            content_type: ContentType::Pdf,
            payment_mode: PaymentMode::Prepaid,
            allowed_categories: BTreeSet::new(),
            total_quota: Some(quota),
            expires_at: None,
        }
    }

    #[test]
    fn credential_hash_is_stable_hex() {
        let h1 = hash_credential("same-token");
        let h2 = hash_credential("same-token");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, hash_credential("different-token"));
    }

    #[tokio::test]
    async fn issued_credential_resolves_to_token() {
        let registry = registry(Duration::from_secs(30));
        let issued = registry.issue(prepaid_spec(5)).await.unwrap();

        assert!(issued.credential.starts_with("gat_"));
        let token = registry.resolve(&issued.credential).await.unwrap();
        assert_eq!(token.id, issued.token.id);
        assert_eq!(token.payment_mode, PaymentMode::Prepaid);
    }

    #[tokio::test]
    async fn unknown_credential_is_invalid() {
        let registry = registry(Duration::from_secs(30));
        let err = registry.resolve("gat_nope").await.unwrap_err();
        assert!(matches!(err, AccessError::TokenInvalid));
    }

    #[tokio::test]
    async fn expired_token_is_invalid_even_when_cached() {
        let registry = registry(Duration::from_secs(30));
        let mut spec = prepaid_spec(1);
        let expires_at = Utc::now() + ChronoDuration::minutes(5);
        spec.expires_at = Some(expires_at);
        let issued = registry.issue(spec).await.unwrap();

        registry.resolve(&issued.credential).await.unwrap();
        let later = expires_at + ChronoDuration::seconds(1);
        let err = registry
            .resolve_at(&issued.credential, later)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::TokenInvalid));
    }

    #[tokio::test]
    async fn deactivation_takes_effect_despite_cache() {
        let registry = registry(Duration::from_secs(60));
        let issued = registry.issue(prepaid_spec(1)).await.unwrap();
        registry.resolve(&issued.credential).await.unwrap();

        registry.deactivate(issued.token.id).await.unwrap();

        let err = registry.resolve(&issued.credential).await.unwrap_err();
        assert!(matches!(err, AccessError::TokenInvalid));
    }

    #[tokio::test]
    async fn category_update_is_visible_immediately() {
        let registry = registry(Duration::from_secs(60));
        let issued = registry.issue(prepaid_spec(1)).await.unwrap();
        registry.resolve(&issued.credential).await.unwrap();

        let category = Uuid::new_v4();
        registry
            .set_allowed_categories(issued.token.id, BTreeSet::from([category]))
            .await
            .unwrap();

        let token = registry.resolve(&issued.credential).await.unwrap();
        assert!(token.permits_category(category));
        assert!(!token.permits_category(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn quota_must_match_payment_mode() {
        let registry = registry(Duration::ZERO);
        let mut spec = prepaid_spec(1);
        spec.total_quota = None;
        assert!(matches!(
            registry.issue(spec).await.unwrap_err(),
            AccessError::InvalidRequest(_)
        ));

        let mut spec = prepaid_spec(1);
        spec.payment_mode = PaymentMode::PayPerItem;
        assert!(matches!(
            registry.issue(spec).await.unwrap_err(),
            AccessError::InvalidRequest(_)
        ));
    }

    #[tokio::test]
    async fn lifecycle_calls_on_unknown_token_report_not_found() {
        let registry = registry(Duration::ZERO);
        let id = Uuid::new_v4();
        assert!(matches!(
            registry.deactivate(id).await.unwrap_err(),
            AccessError::TokenNotFound(found) if found == id
        ));
        assert!(matches!(
            registry.get(id).await.unwrap_err(),
            AccessError::TokenNotFound(_)
        ));
    }

    #[test]
    fn cache_ttl_is_capped() {
        let registry = registry(Duration::from_secs(600));
        assert_eq!(registry.cache_ttl, MAX_CACHE_TTL);
    }
}
