//! Transport token acquisition and caching
//!
//! Tokens are short-lived credentials issued per (channel, uid). The
//! provider caches them and refetches when expiry is within a safety margin
//! or on forced refresh. Fetches are single-flight per key: concurrent
//! callers for the same (channel, uid) serialize on a per-key async mutex,
//! so exactly one network request happens and late arrivals observe the
//! fresh cache entry.

use crate::error::TokenFetchError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A transport authentication token for one (channel, uid)
#[derive(Debug, Clone)]
pub struct Token {
    pub channel: String,
    pub uid: u32,
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Valid if expiry is further away than the safety margin
    fn is_fresh(&self, margin: ChronoDuration) -> bool {
        self.expires_at - margin > Utc::now()
    }
}

/// Request forwarded to the token endpoint
#[derive(Debug, Clone, serde::Serialize)]
pub struct TokenRequest {
    pub channel: String,
    pub uid: u32,
    pub tenant: String,
    pub purpose: &'static str,
}

/// Trait for token endpoint implementations
#[async_trait::async_trait]
pub trait TokenFetcher: Send + Sync {
    /// Fetch a fresh token; failures are always retryable
    async fn fetch(&self, request: &TokenRequest) -> Result<Token, TokenFetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TokenKey {
    channel: String,
    uid: u32,
}

/// Caching, single-flight token provider
pub struct TokenProvider {
    fetcher: Arc<dyn TokenFetcher>,
    tenant: String,
    margin: ChronoDuration,
    // Outer lock hands out per-key slots and is held only briefly; the slot
    // lock is held across the fetch, which is what makes fetches single-flight.
    slots: Mutex<HashMap<TokenKey, Arc<Mutex<Option<Token>>>>>,
}

impl TokenProvider {
    pub fn new(fetcher: Arc<dyn TokenFetcher>, tenant: String, margin_secs: u64) -> Self {
        Self {
            fetcher,
            tenant,
            margin: ChronoDuration::seconds(margin_secs as i64),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return a cached token if unexpired, otherwise fetch and cache one.
    ///
    /// `force_refresh` bypasses the cache but still updates it, so later
    /// callers see the renewed token.
    pub async fn get_token(
        &self,
        channel: &str,
        uid: u32,
        force_refresh: bool,
    ) -> Result<Token, TokenFetchError> {
        let key = TokenKey {
            channel: channel.to_string(),
            uid,
        };

        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(key).or_default())
        };

        let mut cached = slot.lock().await;

        if !force_refresh {
            if let Some(token) = cached.as_ref() {
                if token.is_fresh(self.margin) {
                    tracing::trace!("Token cache hit for channel {:?} uid {}", channel, uid);
                    return Ok(token.clone());
                }
                tracing::debug!(
                    "Cached token for channel {:?} uid {} is within the refresh margin",
                    channel,
                    uid
                );
            }
        }

        let request = TokenRequest {
            channel: channel.to_string(),
            uid,
            tenant: self.tenant.clone(),
            purpose: "ptt",
        };

        tracing::debug!(
            "Fetching token for channel {:?} uid {} (forced: {})",
            channel,
            uid,
            force_refresh
        );
        let token = self.fetcher.fetch(&request).await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

/// Token endpoint response contract
#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

/// HTTP token fetcher
///
/// The endpoint call is blocking (ureq), driven from a blocking task so the
/// actor runtime never stalls on it.
pub struct HttpTokenFetcher {
    endpoint: String,
}

impl HttpTokenFetcher {
    pub fn new(endpoint: String) -> Self {
        Self { endpoint }
    }
}

#[async_trait::async_trait]
impl TokenFetcher for HttpTokenFetcher {
    async fn fetch(&self, request: &TokenRequest) -> Result<Token, TokenFetchError> {
        let endpoint = self.endpoint.clone();
        let request = request.clone();

        let response = tokio::task::spawn_blocking(move || {
            let payload = serde_json::json!({
                "channel": request.channel,
                "uid": request.uid.to_string(),
                "tenant": request.tenant,
                "purpose": request.purpose,
            });

            match ureq::post(&endpoint).send_json(payload) {
                Ok(resp) => resp
                    .into_json::<TokenResponse>()
                    .map(|body| (request, body))
                    .map_err(|e| TokenFetchError::InvalidResponse(e.to_string())),
                Err(ureq::Error::Status(code, resp)) => {
                    let body = resp.into_string().unwrap_or_default();
                    Err(TokenFetchError::Auth(format!("HTTP {}: {}", code, body)))
                }
                Err(e) => Err(TokenFetchError::Network(e.to_string())),
            }
        })
        .await
        .map_err(|e| TokenFetchError::Network(format!("fetch task failed: {}", e)))??;

        let (request, body) = response;
        Ok(Token {
            channel: request.channel,
            uid: request.uid,
            value: body.token,
            expires_at: body.expires_at,
        })
    }
}
